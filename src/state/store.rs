// Feature dataset store
// Folder-keyed append of feature records and multi-pass on-disk shuffle

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use super::db::{open_db, open_in_memory_db, DbError, DbResult};
use super::models::{FeatureLabels, FeatureRecord, FolderEntry};
use crate::audio::LabelKind;

const FEATURE_LENGTH_KEY: &str = "feature_length";
const FINGERPRINT_KEY: &str = "config_fingerprint";

/// Persistent dataset the compiler appends folders to
pub trait FeatureStore {
    /// Names of the folders already in the dataset
    fn folders(&self) -> DbResult<Vec<String>>;

    /// Append every record of one folder. Either all records are stored or none.
    fn append(&mut self, records: &[FeatureRecord], folder: &str) -> DbResult<()>;

    /// Reorder stored records. `on_progress` receives non-decreasing values in
    /// [0, 1], the last being 1.0.
    fn shuffle(
        &mut self,
        chunk_size: usize,
        passes: usize,
        on_progress: &mut dyn FnMut(f64),
    ) -> DbResult<()>;
}

/// SQLite-backed feature dataset
pub struct SqliteFeatureStore {
    conn: Connection,
    run_id: Uuid,
    rng: StdRng,
}

impl SqliteFeatureStore {
    pub fn open(path: &Path, overwrite: bool) -> DbResult<Self> {
        Ok(Self::from_connection(open_db(path, overwrite)?))
    }

    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self::from_connection(open_in_memory_db()?))
    }

    fn from_connection(conn: Connection) -> Self {
        SqliteFeatureStore {
            conn,
            run_id: Uuid::new_v4(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Make shuffles reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Identifier stamped on every folder appended through this handle
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Number of values per record, fixed by the first non-empty append
    pub fn feature_length(&self) -> DbResult<Option<usize>> {
        let value = self.metadata(FEATURE_LENGTH_KEY)?;
        value
            .map(|v| {
                v.parse::<usize>()
                    .map_err(|_| DbError::CorruptRecord(format!("feature length {:?}", v)))
            })
            .transpose()
    }

    /// Record the configuration fingerprint on first use.
    /// Returns false when the dataset was built with a different one.
    pub fn check_fingerprint(&mut self, fingerprint: &str) -> DbResult<bool> {
        match self.metadata(FINGERPRINT_KEY)? {
            Some(existing) => Ok(existing == fingerprint),
            None => {
                self.conn.execute(
                    "INSERT INTO metadata (key, value) VALUES (?1, ?2)",
                    params![FINGERPRINT_KEY, fingerprint],
                )?;
                Ok(true)
            }
        }
    }

    pub fn record_count(&self) -> DbResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Folder rows with their bookkeeping, oldest first
    pub fn folder_entries(&self) -> DbResult<Vec<FolderEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, run_id, appended_at, record_count
             FROM folders ORDER BY appended_at, name",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(name, run_id, appended_at, record_count)| -> DbResult<FolderEntry> {
                Ok(FolderEntry {
                    run_id: Uuid::parse_str(&run_id)
                        .map_err(|e| DbError::CorruptRecord(format!("run id of {}: {}", name, e)))?,
                    appended_at: appended_at
                        .parse()
                        .map_err(|e| DbError::CorruptRecord(format!("timestamp of {}: {}", name, e)))?,
                    name,
                    record_count,
                })
            })
            .collect()
    }

    /// All records in their current on-disk order
    pub fn records(&self) -> DbResult<Vec<FeatureRecord>> {
        self.query_records("SELECT labels, features FROM records ORDER BY position", [])
    }

    pub fn records_for_folder(&self, folder: &str) -> DbResult<Vec<FeatureRecord>> {
        self.query_records(
            "SELECT labels, features FROM records WHERE folder = ?1 ORDER BY position",
            [folder],
        )
    }

    /// How many records carry each label
    pub fn label_counts(&self) -> DbResult<HashMap<LabelKind, usize>> {
        let mut counts = HashMap::new();
        for record in self.records()? {
            for kind in record.labels.kinds() {
                *counts.entry(kind).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    fn query_records<P: rusqlite::Params>(&self, sql: &str, params: P) -> DbResult<Vec<FeatureRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(labels, features)| -> DbResult<FeatureRecord> {
                Ok(FeatureRecord {
                    labels: serde_json::from_str::<FeatureLabels>(&labels)?,
                    features: decode_features(&features)?,
                })
            })
            .collect()
    }

    fn metadata(&self, key: &str) -> DbResult<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| row.get(0))
            .optional()?)
    }
}

impl FeatureStore for SqliteFeatureStore {
    fn folders(&self) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM folders ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn append(&mut self, records: &[FeatureRecord], folder: &str) -> DbResult<()> {
        let expected = match (self.feature_length()?, records.first()) {
            (Some(length), _) => Some(length),
            (None, Some(first)) => Some(first.features.len()),
            (None, None) => None,
        };
        if let Some(expected) = expected {
            if let Some(bad) = records.iter().find(|r| r.features.len() != expected) {
                return Err(DbError::FeatureLengthMismatch {
                    expected,
                    found: bad.features.len(),
                });
            }
        }

        let tx = self.conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM folders WHERE name = ?1)",
            [folder],
            |row| row.get(0),
        )?;
        if exists {
            return Err(DbError::DuplicateFolder(folder.to_string()));
        }

        tx.execute(
            "INSERT INTO folders (name, run_id, appended_at, record_count)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                folder,
                self.run_id.to_string(),
                Utc::now().to_rfc3339(),
                records.len() as i64,
            ],
        )?;

        if let Some(expected) = expected {
            tx.execute(
                "INSERT OR IGNORE INTO metadata (key, value) VALUES (?1, ?2)",
                params![FEATURE_LENGTH_KEY, expected.to_string()],
            )?;
        }

        let mut position: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM records",
            [],
            |row| row.get(0),
        )?;

        {
            let mut insert = tx.prepare(
                "INSERT INTO records (folder, position, labels, features)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for record in records {
                insert.execute(params![
                    folder,
                    position,
                    serde_json::to_string(&record.labels)?,
                    encode_features(&record.features),
                ])?;
                position += 1;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn shuffle(
        &mut self,
        chunk_size: usize,
        passes: usize,
        on_progress: &mut dyn FnMut(f64),
    ) -> DbResult<()> {
        if chunk_size == 0 {
            return Err(DbError::InvalidShuffle("chunk size must be positive".to_string()));
        }

        let count = self.record_count()?;
        if count < 2 || passes == 0 {
            on_progress(1.0);
            return Ok(());
        }

        let chunks = (count + chunk_size - 1) / chunk_size;
        let total_steps = (chunks * passes) as f64;

        for pass in 0..passes {
            log::info!("Shuffle pass {}/{} over {} records", pass + 1, passes, count);

            for chunk in 0..chunks {
                let start = chunk * chunk_size;
                let end = (start + chunk_size).min(count);

                let tx = self.conn.transaction()?;
                // Fisher-Yates: each position swaps with a random one at or after it
                for position in start..end {
                    let other = self.rng.gen_range(position..count);
                    if other != position {
                        swap_positions(&tx, position as i64, other as i64)?;
                    }
                }
                tx.commit()?;

                let step = pass * chunks + chunk + 1;
                on_progress(step as f64 / total_steps);
            }
        }

        Ok(())
    }
}

fn swap_positions(conn: &Connection, a: i64, b: i64) -> DbResult<()> {
    conn.execute("UPDATE records SET position = -1 WHERE position = ?1", [a])?;
    conn.execute("UPDATE records SET position = ?1 WHERE position = ?2", [a, b])?;
    conn.execute("UPDATE records SET position = ?1 WHERE position = -1", [b])?;
    Ok(())
}

/// Little-endian f32 blob
fn encode_features(features: &[f32]) -> Vec<u8> {
    features.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_features(bytes: &[u8]) -> DbResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(DbError::CorruptRecord(format!(
            "feature blob of {} bytes",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
