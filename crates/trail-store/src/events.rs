use tracing::instrument;
use trail_core::{EventId, EventRecord, EventType};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, from_micros, to_micros};

const COLUMNS: &str = "id, timestamp, event_type, file_path, metadata";

/// Append-only event log.
pub struct EventRepo {
    db: Database,
}

impl EventRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub fn insert(&self, event: &EventRecord) -> Result<(), StoreError> {
        let metadata = serde_json::to_string(&event.metadata)?;
        self.db.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO events ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                rusqlite::params![
                    event.id.as_str(),
                    to_micros(&event.timestamp),
                    event.event_type.as_str(),
                    event.file_path,
                    metadata,
                ],
            )?;
            Ok(())
        })
    }

    /// Newest first; equal timestamps fall back to insertion order.
    #[instrument(skip(self))]
    pub fn recent(&self, limit: usize) -> Result<Vec<EventRecord>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM events ORDER BY timestamp DESC, rowid DESC LIMIT ?1"
            ))?;
            let mut rows = stmt.query([limit])?;
            let mut events = Vec::new();
            while let Some(row) = rows.next()? {
                events.push(row_to_event(row)?);
            }
            Ok(events)
        })
    }

    /// Path of the newest open/edit event.
    #[instrument(skip(self))]
    pub fn last_active_file(&self) -> Result<Option<String>, StoreError> {
        let kinds: Vec<&str> = EventType::ALL
            .iter()
            .filter(|t| t.touches_active_file())
            .map(|t| t.as_str())
            .collect();
        let placeholders = (1..=kinds.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT file_path FROM events WHERE event_type IN ({placeholders})
                 ORDER BY timestamp DESC, rowid DESC LIMIT 1"
            ))?;
            let mut rows = stmt.query(rusqlite::params_from_iter(kinds.iter()))?;
            match rows.next()? {
                Some(row) => Ok(Some(row_helpers::get(row, 0, "events", "file_path")?)),
                None => Ok(None),
            }
        })
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> Result<EventRecord, StoreError> {
    let id: String = row_helpers::get(row, 0, "events", "id")?;
    let ts: i64 = row_helpers::get(row, 1, "events", "timestamp")?;
    let event_type: String = row_helpers::get(row, 2, "events", "event_type")?;
    let metadata: String = row_helpers::get(row, 4, "events", "metadata")?;
    Ok(EventRecord {
        id: EventId::from_raw(id),
        timestamp: from_micros(ts, "events", "timestamp")?,
        event_type: row_helpers::parse_enum(&event_type, "events", "event_type")?,
        file_path: row_helpers::get(row, 3, "events", "file_path")?,
        metadata: row_helpers::parse_json(&metadata, "events", "metadata")?,
    })
}
