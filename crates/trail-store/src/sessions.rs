use chrono::{DateTime, Utc};
use tracing::instrument;
use trail_core::{SessionId, SessionRecord};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, from_micros, to_micros};
use crate::vector::{blob_to_f32_vec, f32_slice_to_blob};

const COLUMNS: &str = "id, timestamp, summary, embedding, project, event_count";

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, summary, embedding), fields(project))]
    pub fn create(
        &self,
        summary: &str,
        project: &str,
        embedding: Vec<f32>,
        timestamp: DateTime<Utc>,
    ) -> Result<SessionRecord, StoreError> {
        let record = SessionRecord {
            id: SessionId::new(),
            timestamp,
            summary: summary.to_string(),
            embedding,
            project: project.to_string(),
            event_count: 0,
        };
        self.db.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO sessions ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, 0)"),
                rusqlite::params![
                    record.id.as_str(),
                    to_micros(&record.timestamp),
                    record.summary,
                    f32_slice_to_blob(&record.embedding),
                    record.project,
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM sessions WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Overwrite summary and embedding in place and refresh `event_count`
    /// from the actions attributed to the session.
    #[instrument(skip(self, summary, embedding), fields(session_id = %id))]
    pub fn update_summary(
        &self,
        id: &SessionId,
        summary: &str,
        embedding: &[f32],
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sessions
                 SET summary = ?2,
                     embedding = ?3,
                     event_count = (SELECT COUNT(*) FROM actions WHERE session_id = ?1)
                 WHERE id = ?1",
                rusqlite::params![id.as_str(), summary, f32_slice_to_blob(embedding)],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }

    /// Every session, for brute-force similarity ranking.
    pub fn all(&self) -> Result<Vec<SessionRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM sessions ORDER BY timestamp DESC"))?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_session(row)?);
            }
            Ok(out)
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRecord, StoreError> {
    let id: String = row_helpers::get(row, 0, "sessions", "id")?;
    let ts: i64 = row_helpers::get(row, 1, "sessions", "timestamp")?;
    let blob: Vec<u8> = row_helpers::get(row, 3, "sessions", "embedding")?;
    let count: i64 = row_helpers::get(row, 5, "sessions", "event_count")?;
    Ok(SessionRecord {
        id: SessionId::from_raw(id),
        timestamp: from_micros(ts, "sessions", "timestamp")?,
        summary: row_helpers::get(row, 2, "sessions", "summary")?,
        embedding: blob_to_f32_vec(&blob),
        project: row_helpers::get(row, 4, "sessions", "project")?,
        event_count: u64::try_from(count).unwrap_or(0),
    })
}
