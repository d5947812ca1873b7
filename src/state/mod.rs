// State management module
// SQLite-backed feature datasets and file system helpers

pub mod db;
pub mod models;
pub mod storage;
pub mod store;

pub use db::{DbError, DbResult};
pub use models::{Dataset, FeatureLabels, FeatureRecord, FolderEntry};
pub use store::{FeatureStore, SqliteFeatureStore};
