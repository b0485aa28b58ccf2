pub mod actions;
pub mod database;
pub mod error;
pub mod events;
pub mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod sqlite;
pub mod storage;
pub mod vector;

pub use database::Database;
pub use error::StoreError;
pub use sqlite::SqliteStorage;
pub use storage::{Scored, Storage};
