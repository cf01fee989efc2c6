use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::detect::BunchClass;
use crate::engine::CountDelta;

/// A persisted count snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CountRecord {
    pub id: i64,
    /// Seconds since the Unix epoch.
    pub recorded_at: u64,
    pub suitable_count: u64,
    pub unsuitable_count: u64,
    pub total_count: u64,
    pub status: String,
}

/// Values for a new or updated record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewCountRecord {
    pub recorded_at: u64,
    pub suitable_count: u64,
    pub unsuitable_count: u64,
    pub status: String,
}

impl NewCountRecord {
    pub fn now(suitable_count: u64, unsuitable_count: u64, status: &str) -> Result<Self> {
        Ok(Self {
            recorded_at: crate::now_s()?,
            suitable_count,
            unsuitable_count,
            status: status.to_string(),
        })
    }

    fn total_count(&self) -> u64 {
        self.suitable_count + self.unsuitable_count
    }
}

/// One counted crossing.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CrossingEvent {
    /// Seconds since the Unix epoch.
    pub recorded_at: u64,
    pub frame_number: u64,
    pub class: BunchClass,
    pub label: &'static str,
    pub confidence: f32,
    /// Class total after this crossing.
    pub new_total: u64,
    /// Session record the crossing belongs to, when one is open.
    pub session_record: Option<i64>,
}

impl CrossingEvent {
    pub fn from_delta(delta: &CountDelta, recorded_at: u64) -> Self {
        Self {
            recorded_at,
            frame_number: delta.frame_number,
            class: delta.class,
            label: delta.class.label(),
            confidence: delta.confidence,
            new_total: delta.new_total,
            session_record: None,
        }
    }
}

/// A persisted crossing.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CrossingRecord {
    pub id: i64,
    #[serde(flatten)]
    pub event: CrossingEvent,
}

pub trait SnapshotStore {
    /// Insert a record and return its id.
    fn insert(&mut self, record: &NewCountRecord) -> Result<i64>;

    /// Overwrite counts, status and timestamp of an existing record.
    fn update(&mut self, id: i64, record: &NewCountRecord) -> Result<()>;

    fn get(&mut self, id: i64) -> Result<Option<CountRecord>>;

    /// Most recent records first.
    fn list(&mut self, limit: usize) -> Result<Vec<CountRecord>>;

    /// Append a crossing to the event log and return its id.
    fn insert_crossing(&mut self, event: &CrossingEvent) -> Result<i64>;

    /// Most recent crossings first.
    fn list_crossings(&mut self, limit: usize) -> Result<Vec<CrossingRecord>>;
}

/// Store shared between the capture thread's sinks and the API thread.
pub type SharedStore = Arc<Mutex<dyn SnapshotStore + Send>>;

pub fn shared<S: SnapshotStore + Send + 'static>(store: S) -> SharedStore {
    Arc::new(Mutex::new(store))
}

pub struct SqliteSnapshotStore {
    conn: Connection,
}

impl SqliteSnapshotStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = if db_path.starts_with("file:") {
            Connection::open_with_flags(
                db_path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI,
            )?
        } else {
            Connection::open(db_path)?
        };
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS count_snapshots (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              recorded_at INTEGER NOT NULL,
              suitable_count INTEGER NOT NULL,
              unsuitable_count INTEGER NOT NULL,
              total_count INTEGER NOT NULL,
              status TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_snapshots_recorded ON count_snapshots(recorded_at);

            CREATE TABLE IF NOT EXISTS crossing_events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              recorded_at INTEGER NOT NULL,
              frame_number INTEGER NOT NULL,
              class_id INTEGER NOT NULL,
              confidence REAL NOT NULL,
              new_total INTEGER NOT NULL,
              session_record INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_crossings_session ON crossing_events(session_record);
            "#,
        )?;
        Ok(())
    }
}

fn to_i64(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("{} exceeds i64 range", field))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CountRecord> {
    let recorded_at: i64 = row.get(1)?;
    let suitable: i64 = row.get(2)?;
    let unsuitable: i64 = row.get(3)?;
    let total: i64 = row.get(4)?;
    Ok(CountRecord {
        id: row.get(0)?,
        recorded_at: recorded_at.max(0) as u64,
        suitable_count: suitable.max(0) as u64,
        unsuitable_count: unsuitable.max(0) as u64,
        total_count: total.max(0) as u64,
        status: row.get(5)?,
    })
}

fn crossing_from_row(row: &Row<'_>) -> rusqlite::Result<CrossingRecord> {
    let recorded_at: i64 = row.get(1)?;
    let frame_number: i64 = row.get(2)?;
    let class_id: i64 = row.get(3)?;
    let confidence: f64 = row.get(4)?;
    let new_total: i64 = row.get(5)?;
    let class =
        BunchClass::from_id(class_id).ok_or(rusqlite::Error::IntegralValueOutOfRange(3, class_id))?;
    Ok(CrossingRecord {
        id: row.get(0)?,
        event: CrossingEvent {
            recorded_at: recorded_at.max(0) as u64,
            frame_number: frame_number.max(0) as u64,
            class,
            label: class.label(),
            confidence: confidence as f32,
            new_total: new_total.max(0) as u64,
            session_record: row.get(6)?,
        },
    })
}

impl SnapshotStore for SqliteSnapshotStore {
    fn insert(&mut self, record: &NewCountRecord) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO count_snapshots(recorded_at, suitable_count, unsuitable_count, total_count, status)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                to_i64(record.recorded_at, "recorded_at")?,
                to_i64(record.suitable_count, "suitable_count")?,
                to_i64(record.unsuitable_count, "unsuitable_count")?,
                to_i64(record.total_count(), "total_count")?,
                record.status,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update(&mut self, id: i64, record: &NewCountRecord) -> Result<()> {
        let changed = self.conn.execute(
            r#"
            UPDATE count_snapshots
            SET recorded_at = ?1, suitable_count = ?2, unsuitable_count = ?3, total_count = ?4, status = ?5
            WHERE id = ?6
            "#,
            params![
                to_i64(record.recorded_at, "recorded_at")?,
                to_i64(record.suitable_count, "suitable_count")?,
                to_i64(record.unsuitable_count, "unsuitable_count")?,
                to_i64(record.total_count(), "total_count")?,
                record.status,
                id
            ],
        )?;
        if changed == 0 {
            return Err(anyhow!("count snapshot {} not found", id));
        }
        Ok(())
    }

    fn get(&mut self, id: i64) -> Result<Option<CountRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, recorded_at, suitable_count, unsuitable_count, total_count, status FROM count_snapshots WHERE id = ?1",
                params![id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn list(&mut self, limit: usize) -> Result<Vec<CountRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, recorded_at, suitable_count, unsuitable_count, total_count, status FROM count_snapshots ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], record_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn insert_crossing(&mut self, event: &CrossingEvent) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO crossing_events(recorded_at, frame_number, class_id, confidence, new_total, session_record)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                to_i64(event.recorded_at, "recorded_at")?,
                to_i64(event.frame_number, "frame_number")?,
                event.class.id(),
                event.confidence as f64,
                to_i64(event.new_total, "new_total")?,
                event.session_record,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list_crossings(&mut self, limit: usize) -> Result<Vec<CrossingRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, recorded_at, frame_number, class_id, confidence, new_total, session_record FROM crossing_events ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], crossing_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemorySnapshotStore {
    records: Vec<CountRecord>,
    next_id: i64,
    crossings: Vec<CrossingRecord>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn insert(&mut self, record: &NewCountRecord) -> Result<i64> {
        self.next_id += 1;
        self.records.push(CountRecord {
            id: self.next_id,
            recorded_at: record.recorded_at,
            suitable_count: record.suitable_count,
            unsuitable_count: record.unsuitable_count,
            total_count: record.total_count(),
            status: record.status.clone(),
        });
        Ok(self.next_id)
    }

    fn update(&mut self, id: i64, record: &NewCountRecord) -> Result<()> {
        let existing = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| anyhow!("count snapshot {} not found", id))?;
        existing.recorded_at = record.recorded_at;
        existing.suitable_count = record.suitable_count;
        existing.unsuitable_count = record.unsuitable_count;
        existing.total_count = record.total_count();
        existing.status = record.status.clone();
        Ok(())
    }

    fn get(&mut self, id: i64) -> Result<Option<CountRecord>> {
        Ok(self.records.iter().find(|r| r.id == id).cloned())
    }

    fn list(&mut self, limit: usize) -> Result<Vec<CountRecord>> {
        Ok(self.records.iter().rev().take(limit).cloned().collect())
    }

    fn insert_crossing(&mut self, event: &CrossingEvent) -> Result<i64> {
        let id = self.crossings.len() as i64 + 1;
        self.crossings.push(CrossingRecord { id, event: *event });
        Ok(id)
    }

    fn list_crossings(&mut self, limit: usize) -> Result<Vec<CrossingRecord>> {
        Ok(self.crossings.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(suitable: u64, unsuitable: u64, status: &str) -> NewCountRecord {
        NewCountRecord {
            recorded_at: 1_700_000_000,
            suitable_count: suitable,
            unsuitable_count: unsuitable,
            status: status.to_string(),
        }
    }

    fn exercise(store: &mut dyn SnapshotStore) -> Result<()> {
        let first = store.insert(&record(1, 0, "running"))?;
        let second = store.insert(&record(4, 2, "running"))?;
        assert_ne!(first, second);

        store.update(first, &record(3, 1, "stopped"))?;
        let updated = store.get(first)?.expect("first record");
        assert_eq!(updated.total_count, 4);
        assert_eq!(updated.status, "stopped");

        let listed = store.list(10)?;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second);
        assert_eq!(store.list(1)?.len(), 1);

        assert!(store.get(999)?.is_none());
        assert!(store.update(999, &record(0, 0, "running")).is_err());

        let delta = CountDelta {
            class: BunchClass::Unsuitable,
            new_total: 2,
            frame_number: 41,
            confidence: 0.75,
        };
        let mut event = CrossingEvent::from_delta(&delta, 1_700_000_100);
        event.session_record = Some(first);
        let early = store.insert_crossing(&CrossingEvent::from_delta(&delta, 1_700_000_050))?;
        let late = store.insert_crossing(&event)?;
        assert_ne!(early, late);

        let crossings = store.list_crossings(10)?;
        assert_eq!(crossings.len(), 2);
        assert_eq!(crossings[0].id, late);
        assert_eq!(crossings[0].event, event);
        assert_eq!(crossings[0].event.label, "Unripe");
        assert_eq!(crossings[1].event.session_record, None);
        assert_eq!(store.list_crossings(1)?.len(), 1);
        Ok(())
    }

    #[test]
    fn sqlite_store_round_trips_records() -> Result<()> {
        let mut store = SqliteSnapshotStore::open(":memory:")?;
        exercise(&mut store)
    }

    #[test]
    fn in_memory_store_matches_sqlite_behavior() -> Result<()> {
        let mut store = InMemorySnapshotStore::new();
        exercise(&mut store)
    }
}
