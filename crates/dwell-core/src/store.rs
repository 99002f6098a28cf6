//! Profile persistence.
//!
//! The whole profile collection lives as one JSON blob under a single key of
//! a key-value store. It is loaded once and rewritten in full after every
//! mutation; there is no incremental update and no transaction log.

use crate::embedding::EMBEDDING_DIM;
use crate::types::{BestMatch, Embedding, MatchReport, Matcher, StoredProfile};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

pub const PROFILES_STORAGE_KEY: &str = "face-embeddings-v1";
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.82;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// String-keyed blob storage.
pub trait KvStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Volatile store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    values: HashMap<String, String>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// SQLite-backed key-value table.
pub struct SqliteKvStore {
    conn: Connection,
}

impl SqliteKvStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened profile database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }
}

impl KvStore for SqliteKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

/// How the collection came out of storage at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded(usize),
    Empty,
    /// Stored blob was unreadable; started with no profiles.
    Degraded,
}

impl LoadStatus {
    /// Operator-facing summary line.
    pub fn describe(&self) -> String {
        match self {
            LoadStatus::Loaded(n) => {
                format!("Loaded {n} stored embedding{}", if *n == 1 { "" } else { "s" })
            }
            LoadStatus::Empty => "No stored embeddings yet".to_string(),
            LoadStatus::Degraded => "Error loading embeddings (see console)".to_string(),
        }
    }
}

/// Result of [`ProfileStore::match_or_enroll`].
#[derive(Debug)]
pub struct MatchOutcome {
    pub report: MatchReport,
    /// Set when the in-memory update could not be written back.
    pub persist_error: Option<StoreError>,
}

/// In-memory profile collection mirrored to a [`KvStore`].
pub struct ProfileStore<S: KvStore> {
    kv: S,
    profiles: Vec<StoredProfile>,
    threshold: f32,
}

impl<S: KvStore> ProfileStore<S> {
    /// Load the collection from `kv`. Unreadable data degrades to an empty
    /// collection instead of failing.
    pub fn load(kv: S, threshold: f32) -> (Self, LoadStatus) {
        let (profiles, status) = match kv.get(PROFILES_STORAGE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<StoredProfile>>(&raw) {
                Ok(profiles) => {
                    let n = profiles.len();
                    (profiles, LoadStatus::Loaded(n))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stored profiles are malformed; starting empty");
                    (Vec::new(), LoadStatus::Degraded)
                }
            },
            Ok(None) => (Vec::new(), LoadStatus::Empty),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read stored profiles; starting empty");
                (Vec::new(), LoadStatus::Degraded)
            }
        };

        tracing::info!(count = profiles.len(), threshold, "profile store ready");
        (
            Self {
                kv,
                profiles,
                threshold,
            },
            status,
        )
    }

    pub fn profiles(&self) -> &[StoredProfile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Match `candidate` against the collection, updating or appending a
    /// profile, then rewrite the whole collection.
    pub fn match_or_enroll(&mut self, candidate: Embedding, matcher: &dyn Matcher) -> MatchOutcome {
        let now = chrono::Utc::now();
        let now_text = now.to_rfc3339();

        let report = match matcher.best_match(&candidate, &self.profiles) {
            Some(BestMatch { index, similarity }) if similarity >= self.threshold => {
                let profile = &mut self.profiles[index];
                profile.last_seen_at = now_text;
                profile.visits += 1;
                tracing::debug!(id = %profile.id, similarity, visits = profile.visits, "matched profile");
                MatchReport {
                    id: profile.id.clone(),
                    similarity: Some(similarity),
                    is_new: false,
                    total: self.profiles.len(),
                }
            }
            _ => {
                if candidate.len() != EMBEDDING_DIM {
                    tracing::debug!(len = candidate.len(), "enrolling non-standard embedding length");
                }
                let profile = StoredProfile {
                    id: self.next_profile_id(now.timestamp_millis()),
                    vector: candidate.values,
                    created_at: now_text.clone(),
                    last_seen_at: now_text,
                    visits: 1,
                };
                let id = profile.id.clone();
                self.profiles.push(profile);
                MatchReport {
                    id,
                    similarity: None,
                    is_new: true,
                    total: self.profiles.len(),
                }
            }
        };

        let persist_error = self.persist().err();
        if let Some(e) = &persist_error {
            tracing::warn!(error = %e, "failed to persist profiles");
        }

        MatchOutcome {
            report,
            persist_error,
        }
    }

    /// `user-<epoch ms>`, bumped past any id already in the collection.
    fn next_profile_id(&self, now_ms: i64) -> String {
        let mut millis = now_ms;
        loop {
            let id = format!("user-{millis}");
            if !self.profiles.iter().any(|p| p.id == id) {
                return id;
            }
            millis += 1;
        }
    }

    /// Overwrite the stored blob with the current collection.
    pub fn persist(&mut self) -> Result<(), StoreError> {
        let blob = serde_json::to_string(&self.profiles)?;
        self.kv.set(PROFILES_STORAGE_KEY, &blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CosineMatcher;

    fn unit_vector(hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[hot] = 1.0;
        v
    }

    fn seeded_kv(profiles: &[StoredProfile]) -> MemoryKvStore {
        let mut kv = MemoryKvStore::new();
        kv.set(PROFILES_STORAGE_KEY, &serde_json::to_string(profiles).unwrap())
            .unwrap();
        kv
    }

    fn user_one() -> StoredProfile {
        StoredProfile {
            id: "user-1".into(),
            vector: unit_vector(0),
            created_at: "2025-11-01T00:00:00Z".into(),
            last_seen_at: "2025-11-01T00:00:00Z".into(),
            visits: 1,
        }
    }

    struct FailingKv;

    impl KvStore for FailingKv {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }
        fn set(&mut self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }
    }

    #[test]
    fn test_identical_vector_matches_existing_profile() {
        let (mut store, status) = ProfileStore::load(seeded_kv(&[user_one()]), DEFAULT_MATCH_THRESHOLD);
        assert_eq!(status, LoadStatus::Loaded(1));

        let outcome = store.match_or_enroll(Embedding::new(unit_vector(0)), &CosineMatcher);
        assert!(!outcome.report.is_new);
        assert_eq!(outcome.report.id, "user-1");
        assert!((outcome.report.similarity.unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(outcome.report.total, 1);
        assert_eq!(store.profiles()[0].visits, 2);
        assert_ne!(store.profiles()[0].last_seen_at, "2025-11-01T00:00:00Z");
    }

    #[test]
    fn test_empty_collection_enrolls_new_profile() {
        let (mut store, status) = ProfileStore::load(MemoryKvStore::new(), DEFAULT_MATCH_THRESHOLD);
        assert_eq!(status, LoadStatus::Empty);

        let outcome = store.match_or_enroll(Embedding::new(unit_vector(3)), &CosineMatcher);
        assert!(outcome.report.is_new);
        assert_eq!(outcome.report.similarity, None);
        assert_eq!(outcome.report.total, 1);
        assert!(outcome.report.id.starts_with("user-"));
        assert_eq!(store.profiles()[0].visits, 1);
    }

    #[test]
    fn test_below_threshold_appends() {
        let (mut store, _) = ProfileStore::load(seeded_kv(&[user_one()]), DEFAULT_MATCH_THRESHOLD);
        let outcome = store.match_or_enroll(Embedding::new(unit_vector(1)), &CosineMatcher);
        assert!(outcome.report.is_new);
        assert_eq!(store.len(), 2);
        assert_eq!(store.profiles()[0].visits, 1);
    }

    #[test]
    fn test_back_to_back_enrollments_get_distinct_ids() {
        let (mut store, _) = ProfileStore::load(MemoryKvStore::new(), DEFAULT_MATCH_THRESHOLD);
        let first = store.match_or_enroll(Embedding::new(unit_vector(0)), &CosineMatcher);
        let second = store.match_or_enroll(Embedding::new(unit_vector(1)), &CosineMatcher);

        assert!(first.report.is_new && second.report.is_new);
        assert_ne!(first.report.id, second.report.id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_next_profile_id_skips_taken_millis() {
        let mut taken = user_one();
        taken.id = "user-5000".into();
        let (store, _) = ProfileStore::load(seeded_kv(&[taken]), DEFAULT_MATCH_THRESHOLD);
        assert_eq!(store.next_profile_id(5000), "user-5001");
        assert_eq!(store.next_profile_id(7000), "user-7000");
    }

    #[test]
    fn test_mutation_rewrites_whole_collection() {
        let (mut store, _) = ProfileStore::load(MemoryKvStore::new(), DEFAULT_MATCH_THRESHOLD);
        store.match_or_enroll(Embedding::new(unit_vector(0)), &CosineMatcher);
        store.match_or_enroll(Embedding::new(unit_vector(0)), &CosineMatcher);

        let raw = store.kv.get(PROFILES_STORAGE_KEY).unwrap().unwrap();
        let persisted: Vec<StoredProfile> = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted, store.profiles());
        assert_eq!(persisted[0].visits, 2);
    }

    #[test]
    fn test_malformed_blob_degrades_to_empty() {
        let mut kv = MemoryKvStore::new();
        kv.set(PROFILES_STORAGE_KEY, "{not json").unwrap();
        let (store, status) = ProfileStore::load(kv, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(status, LoadStatus::Degraded);
        assert!(store.is_empty());
    }

    #[test]
    fn test_persist_failure_still_reports_match() {
        let (mut store, status) = ProfileStore::load(FailingKv, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(status, LoadStatus::Degraded);
        let outcome = store.match_or_enroll(Embedding::new(unit_vector(0)), &CosineMatcher);
        assert!(outcome.report.is_new);
        assert!(outcome.persist_error.is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sqlite_round_trip_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("profiles.db");

        {
            let kv = SqliteKvStore::open(&path).unwrap();
            let (mut store, _) = ProfileStore::load(kv, DEFAULT_MATCH_THRESHOLD);
            store.match_or_enroll(Embedding::new(unit_vector(5)), &CosineMatcher);
        }

        let kv = SqliteKvStore::open(&path).unwrap();
        let (store, status) = ProfileStore::load(kv, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(status, LoadStatus::Loaded(1));
        assert_eq!(store.profiles()[0].vector, unit_vector(5));
    }

    #[test]
    fn test_sqlite_set_overwrites_key() {
        let mut kv = SqliteKvStore::open_in_memory().unwrap();
        kv.set("k", "one").unwrap();
        kv.set("k", "two").unwrap();
        assert_eq!(kv.get("k").unwrap().as_deref(), Some("two"));
        assert_eq!(kv.get("missing").unwrap(), None);
    }

    #[test]
    fn test_load_status_wording() {
        assert_eq!(LoadStatus::Loaded(1).describe(), "Loaded 1 stored embedding");
        assert_eq!(LoadStatus::Loaded(3).describe(), "Loaded 3 stored embeddings");
        assert_eq!(LoadStatus::Empty.describe(), "No stored embeddings yet");
    }
}
