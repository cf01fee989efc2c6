use anyhow::{anyhow, Result};

use super::{SinkStatus, TelemetrySink, TelemetryUpdate, UpdateReason};
use crate::storage::{CrossingEvent, NewCountRecord, SharedStore};

/// Persists one record per counting session.
///
/// The first count of a session inserts a record; later counts update it
/// while the total changes. A stop closes the record with its final totals
/// and the next session starts a fresh one. Every crossing is also appended
/// to the event log, tagged with the open record.
pub struct StoreSink {
    store: SharedStore,
    record_id: Option<i64>,
    last_saved_total: u64,
    last_counts: (u64, u64),
}

impl StoreSink {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            record_id: None,
            last_saved_total: 0,
            last_counts: (0, 0),
        }
    }

    /// Id of the record for the session in progress.
    pub fn record_id(&self) -> Option<i64> {
        self.record_id
    }

    fn write(&mut self, record: NewCountRecord) -> Result<()> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| anyhow!("snapshot store lock poisoned"))?;
        match self.record_id {
            Some(id) => store.update(id, &record)?,
            None => {
                let id = store.insert(&record)?;
                log::info!("session record {} created", id);
                self.record_id = Some(id);
            }
        }
        self.last_saved_total = record.suitable_count + record.unsuitable_count;
        Ok(())
    }
}

impl TelemetrySink for StoreSink {
    fn name(&self) -> &'static str {
        "store"
    }

    fn publish(&mut self, update: &TelemetryUpdate) -> Result<()> {
        match (update.reason, update.status) {
            (UpdateReason::Count, _) => {
                self.last_counts = (update.suitable_count, update.unsuitable_count);
                if update.total_count() == self.last_saved_total {
                    return Ok(());
                }
                self.write(NewCountRecord::now(
                    update.suitable_count,
                    update.unsuitable_count,
                    update.status.as_str(),
                )?)
            }
            (UpdateReason::StatusChange, SinkStatus::Stopped) => {
                // Stop updates carry post-reset zeros; close with the last totals seen.
                let result = match self.record_id {
                    Some(_) => {
                        let (suitable, unsuitable) = self.last_counts;
                        self.write(NewCountRecord::now(
                            suitable,
                            unsuitable,
                            SinkStatus::Stopped.as_str(),
                        )?)
                    }
                    None => Ok(()),
                };
                self.record_id = None;
                self.last_saved_total = 0;
                self.last_counts = (0, 0);
                result
            }
            (UpdateReason::StatusChange, status) => {
                if self.record_id.is_none() {
                    return Ok(());
                }
                let (suitable, unsuitable) = self.last_counts;
                self.write(NewCountRecord::now(suitable, unsuitable, status.as_str())?)
            }
        }
    }

    fn record_crossing(&mut self, event: &CrossingEvent) -> Result<()> {
        let event = CrossingEvent {
            session_record: self.record_id,
            ..*event
        };
        self.store
            .lock()
            .map_err(|_| anyhow!("snapshot store lock poisoned"))?
            .insert_crossing(&event)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BunchClass;
    use crate::engine::CountDelta;
    use crate::storage::{shared, InMemorySnapshotStore};

    fn update(
        suitable: u64,
        unsuitable: u64,
        status: SinkStatus,
        reason: UpdateReason,
    ) -> TelemetryUpdate {
        TelemetryUpdate {
            suitable_count: suitable,
            unsuitable_count: unsuitable,
            status,
            reason,
            frame_number: 0,
        }
    }

    #[test]
    fn one_record_per_session() -> Result<()> {
        let store = shared(InMemorySnapshotStore::new());
        let mut sink = StoreSink::new(store.clone());

        sink.publish(&update(0, 0, SinkStatus::Running, UpdateReason::StatusChange))?;
        assert!(sink.record_id().is_none());

        sink.publish(&update(1, 0, SinkStatus::Running, UpdateReason::Count))?;
        sink.publish(&update(1, 1, SinkStatus::Running, UpdateReason::Count))?;
        let first = sink.record_id().expect("record created");

        sink.publish(&update(0, 0, SinkStatus::Stopped, UpdateReason::StatusChange))?;
        assert!(sink.record_id().is_none());

        sink.publish(&update(1, 0, SinkStatus::Running, UpdateReason::Count))?;
        let second = sink.record_id().expect("second session record");
        assert_ne!(first, second);

        let mut guard = store.lock().unwrap();
        let closed = guard.get(first)?.expect("first record");
        assert_eq!(closed.suitable_count, 1);
        assert_eq!(closed.unsuitable_count, 1);
        assert_eq!(closed.status, "stopped");
        assert_eq!(guard.list(10)?.len(), 2);
        Ok(())
    }

    #[test]
    fn pause_marks_open_record() -> Result<()> {
        let store = shared(InMemorySnapshotStore::new());
        let mut sink = StoreSink::new(store.clone());
        sink.publish(&update(2, 0, SinkStatus::Running, UpdateReason::Count))?;
        sink.publish(&update(2, 0, SinkStatus::Paused, UpdateReason::StatusChange))?;
        let id = sink.record_id().unwrap();
        let record = store.lock().unwrap().get(id)?.unwrap();
        assert_eq!(record.status, "paused");
        assert_eq!(record.suitable_count, 2);
        Ok(())
    }

    #[test]
    fn crossings_are_tagged_with_the_open_record() -> Result<()> {
        let store = shared(InMemorySnapshotStore::new());
        let mut sink = StoreSink::new(store.clone());
        let delta = CountDelta {
            class: BunchClass::Suitable,
            new_total: 1,
            frame_number: 12,
            confidence: 0.8,
        };

        sink.publish(&update(1, 0, SinkStatus::Running, UpdateReason::Count))?;
        sink.record_crossing(&CrossingEvent::from_delta(&delta, 1_700_000_000))?;
        let id = sink.record_id();
        assert!(id.is_some());

        let crossings = store.lock().unwrap().list_crossings(10)?;
        assert_eq!(crossings.len(), 1);
        assert_eq!(crossings[0].event.session_record, id);
        assert_eq!(crossings[0].event.frame_number, 12);
        Ok(())
    }
}
