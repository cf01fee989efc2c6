use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{SinkStatus, TelemetrySink, TelemetryUpdate, UpdateReason};

pub const DEFAULT_DASHBOARD_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct DashboardConfig {
    /// Base URL of the dashboard, e.g. `http://127.0.0.1:8000`.
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct CreatedRecord {
    id: i64,
}

/// Pushes session totals to the web dashboard.
///
/// The first count of a session is POSTed and the returned record id is
/// kept; later counts PUT to that record. A stop forgets the id.
pub struct DashboardSink {
    cfg: DashboardConfig,
    agent: ureq::Agent,
    record_id: Option<i64>,
    last_saved_total: u64,
}

impl DashboardSink {
    pub fn new(cfg: DashboardConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(cfg.timeout).build();
        Self {
            cfg,
            agent,
            record_id: None,
            last_saved_total: 0,
        }
    }

    fn create_url(&self) -> String {
        format!("{}/api/save_count_data/", self.cfg.base_url.trim_end_matches('/'))
    }

    fn update_url(&self, id: i64) -> String {
        format!(
            "{}/api/update_count_data/{}/",
            self.cfg.base_url.trim_end_matches('/'),
            id
        )
    }

    fn push(&mut self, update: &TelemetryUpdate) -> Result<()> {
        let body = json!({
            "suitable_count": update.suitable_count,
            "unsuitable_count": update.unsuitable_count,
            "status": update.status.as_str(),
        });
        match self.record_id {
            Some(id) => {
                self.agent
                    .put(&self.update_url(id))
                    .send_json(body)
                    .map_err(|e| anyhow!("dashboard update failed: {}", e))?;
            }
            None => {
                let created: CreatedRecord = self
                    .agent
                    .post(&self.create_url())
                    .send_json(body)
                    .map_err(|e| anyhow!("dashboard create failed: {}", e))?
                    .into_json()
                    .map_err(|e| anyhow!("dashboard returned invalid body: {}", e))?;
                log::info!("dashboard record {} created", created.id);
                self.record_id = Some(created.id);
            }
        }
        self.last_saved_total = update.total_count();
        Ok(())
    }
}

impl TelemetrySink for DashboardSink {
    fn name(&self) -> &'static str {
        "dashboard"
    }

    fn publish(&mut self, update: &TelemetryUpdate) -> Result<()> {
        match (update.reason, update.status) {
            (UpdateReason::Count, _) if update.total_count() != self.last_saved_total => {
                self.push(update)
            }
            (UpdateReason::StatusChange, SinkStatus::Stopped) => {
                self.record_id = None;
                self.last_saved_total = 0;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
