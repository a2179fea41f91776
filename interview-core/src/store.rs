//! Session store: flat JSON document mapping interview id → record
//!
//! The whole document is read on every access and rewritten wholesale on
//! every save. Saves go to a temporary file in the same directory which is
//! then renamed over the original, so readers never see a partial document.
//!
//! `load`/`save` are last-writer-wins across callers holding stale snapshots.
//! `update`/`insert`/`upsert` serialise their own load-modify-save cycles
//! inside one process; separate processes still race. Entries that do not
//! parse as records are left out of [`load`](SessionStore::load) but written
//! back untouched by those helpers.
//!
//! Every operation touches the filesystem synchronously. Async callers use
//! the `*_async` variants, which run on tokio's blocking pool.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::models::InterviewRecord;

pub type Sessions = BTreeMap<Uuid, InterviewRecord>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize store: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Parsed records plus the raw entries that did not parse.
#[derive(Debug, Default)]
struct Document {
    sessions: Sessions,
    unreadable: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole document. Missing, empty or unparsable files yield an
    /// empty mapping; individual records that fail to parse are skipped.
    pub fn load(&self) -> Sessions {
        self.read_document().sessions
    }

    /// Replace the whole document atomically.
    pub fn save(&self, sessions: &Sessions) -> Result<(), StoreError> {
        self.write_document(&Document {
            sessions: sessions.clone(),
            unreadable: Map::new(),
        })
    }

    pub fn get(&self, id: &Uuid) -> Option<InterviewRecord> {
        self.load().remove(id)
    }

    /// Insert or replace one record.
    pub fn insert(&self, record: InterviewRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut doc = self.read_document();
        doc.unreadable.remove(&record.id.to_string());
        doc.sessions.insert(record.id, record);
        self.write_document(&doc)
    }

    /// Apply `f` to the record with `id` and save. Returns the updated record,
    /// or `None` (nothing written) when the id is unknown.
    pub fn update<F>(&self, id: &Uuid, f: F) -> Result<Option<InterviewRecord>, StoreError>
    where
        F: FnOnce(&mut InterviewRecord),
    {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut doc = self.read_document();
        let updated = match doc.sessions.get_mut(id) {
            Some(record) => {
                f(record);
                record.clone()
            }
            None => return Ok(None),
        };
        self.write_document(&doc)?;
        Ok(Some(updated))
    }

    /// Like [`update`](Self::update) but creates the record with `init` when
    /// it does not exist yet.
    pub fn upsert<I, F>(&self, id: &Uuid, init: I, f: F) -> Result<InterviewRecord, StoreError>
    where
        I: FnOnce() -> InterviewRecord,
        F: FnOnce(&mut InterviewRecord),
    {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut doc = self.read_document();
        doc.unreadable.remove(&id.to_string());
        let record = doc.sessions.entry(*id).or_insert_with(init);
        f(record);
        let updated = record.clone();
        self.write_document(&doc)?;
        Ok(updated)
    }

    pub async fn get_async(&self, id: Uuid) -> Result<Option<InterviewRecord>, StoreError> {
        let store = self.clone();
        Ok(tokio::task::spawn_blocking(move || store.get(&id)).await?)
    }

    pub async fn insert_async(&self, record: InterviewRecord) -> Result<(), StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.insert(record)).await?
    }

    pub async fn update_async<F>(&self, id: Uuid, f: F) -> Result<Option<InterviewRecord>, StoreError>
    where
        F: FnOnce(&mut InterviewRecord) + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.update(&id, f)).await?
    }

    pub async fn upsert_async<I, F>(&self, id: Uuid, init: I, f: F) -> Result<InterviewRecord, StoreError>
    where
        I: FnOnce() -> InterviewRecord + Send + 'static,
        F: FnOnce(&mut InterviewRecord) + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.upsert(&id, init, f)).await?
    }

    fn read_document(&self) -> Document {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Document::default(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read session store");
                return Document::default();
            }
        };

        if content.trim().is_empty() {
            return Document::default();
        }

        let entries: Map<String, Value> = match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Session store is not a JSON object, treating as empty"
                );
                return Document::default();
            }
        };

        let mut doc = Document::default();
        for (key, value) in entries {
            let parsed = Uuid::parse_str(&key)
                .map_err(|e| e.to_string())
                .and_then(|id| {
                    serde_json::from_value::<InterviewRecord>(value.clone())
                        .map(|record| (id, record))
                        .map_err(|e| e.to_string())
                });
            match parsed {
                Ok((id, record)) => {
                    doc.sessions.insert(id, record);
                }
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), key = %key, error = %e, "Skipping unreadable session record");
                    doc.unreadable.insert(key, value);
                }
            }
        }
        doc
    }

    fn write_document(&self, doc: &Document) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut entries = doc.unreadable.clone();
        for (id, record) in &doc.sessions {
            entries.insert(id.to_string(), serde_json::to_value(record)?);
        }
        let body = serde_json::to_string_pretty(&entries)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".interview-store")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| self.io_error(e))?;
        tmp.write_all(body.as_bytes()).map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}
