use tracing::instrument;
use trail_core::{ActionId, ActionRecord, NewAction, SessionId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, from_micros, to_micros};
use crate::vector::{blob_to_f32_vec, f32_slice_to_blob};

const COLUMNS: &str = "id, session_id, timestamp, description, diff, files, embedding";

pub struct ActionRepo {
    db: Database,
}

impl ActionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist `action` with its precomputed embedding.
    #[instrument(skip(self, action, embedding), fields(session_id = %action.session_id))]
    pub fn insert(&self, action: NewAction, embedding: Vec<f32>) -> Result<ActionRecord, StoreError> {
        let record = ActionRecord {
            id: ActionId::new(),
            session_id: action.session_id,
            timestamp: action.timestamp,
            description: action.description,
            diff: action.diff,
            files: action.files,
            embedding,
        };
        let files = serde_json::to_string(&record.files)?;
        self.db.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO actions ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                rusqlite::params![
                    record.id.as_str(),
                    record.session_id.as_str(),
                    to_micros(&record.timestamp),
                    record.description,
                    record.diff,
                    files,
                    f32_slice_to_blob(&record.embedding),
                ],
            )?;
            Ok(())
        })?;
        Ok(record)
    }

    /// Oldest first.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn for_session(&self, session_id: &SessionId) -> Result<Vec<ActionRecord>, StoreError> {
        self.query(
            &format!("SELECT {COLUMNS} FROM actions WHERE session_id = ?1 ORDER BY timestamp ASC, rowid ASC"),
            &[&session_id.as_str()],
        )
    }

    pub fn all(&self) -> Result<Vec<ActionRecord>, StoreError> {
        self.query(&format!("SELECT {COLUMNS} FROM actions ORDER BY timestamp DESC"), &[])
    }

    fn query(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<ActionRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query(params)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_action(row)?);
            }
            Ok(out)
        })
    }
}

fn row_to_action(row: &rusqlite::Row<'_>) -> Result<ActionRecord, StoreError> {
    let id: String = row_helpers::get(row, 0, "actions", "id")?;
    let session_id: String = row_helpers::get(row, 1, "actions", "session_id")?;
    let ts: i64 = row_helpers::get(row, 2, "actions", "timestamp")?;
    let files: String = row_helpers::get(row, 5, "actions", "files")?;
    let blob: Vec<u8> = row_helpers::get(row, 6, "actions", "embedding")?;
    Ok(ActionRecord {
        id: ActionId::from_raw(id),
        session_id: SessionId::from_raw(session_id),
        timestamp: from_micros(ts, "actions", "timestamp")?,
        description: row_helpers::get(row, 3, "actions", "description")?,
        diff: row_helpers::get(row, 4, "actions", "diff")?,
        files: row_helpers::parse_json(&files, "actions", "files")?,
        embedding: blob_to_f32_vec(&blob),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_list_for_session() {
        let repo = ActionRepo::new(Database::in_memory().unwrap());
        let sess = SessionId::from_raw("sess_a");
        let other = SessionId::from_raw("sess_b");
        repo.insert(NewAction::new(sess.clone(), "Modified function: login", vec!["auth.rs".into()]), vec![1.0])
            .unwrap();
        repo.insert(NewAction::new(other, "Committed: fix", vec![]).with_diff("+x"), vec![0.0])
            .unwrap();

        let actions = repo.for_session(&sess).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].files, vec!["auth.rs".to_string()]);
        assert_eq!(actions[0].embedding, vec![1.0]);
        assert_eq!(repo.all().unwrap().len(), 2);
    }
}
