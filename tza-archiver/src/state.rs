//! Persistent processed/errored identifier sets
//!
//! Two JSON files live in the data folder:
//! - `processed_cids.json`: identifiers archived (or found already archived)
//! - `errors_cids.json`: identifiers whose submission failed
//!
//! Each file is a sorted, pretty-printed array of unique strings. Every mark
//! rewrites the affected file atomically while holding the store lock, so
//! concurrent completions never interleave writes and a mark that returned
//! `Ok` survives an abrupt exit.
//!
//! Loading fails soft: a missing file is an empty set, a corrupt or unreadable
//! file is an empty set plus a warning.

use crate::cid::ContentId;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const PROCESSED_FILE: &str = "processed_cids.json";
pub const ERRORS_FILE: &str = "errors_cids.json";

/// Which of the two records an identifier belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Processed,
    Errored,
}

impl RecordKind {
    pub fn file_name(self) -> &'static str {
        match self {
            RecordKind::Processed => PROCESSED_FILE,
            RecordKind::Errored => ERRORS_FILE,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Processed => f.write_str("processed"),
            RecordKind::Errored => f.write_str("errored"),
        }
    }
}

/// State store errors
#[derive(Debug, Error)]
pub enum StateError {
    #[error("{id} is already recorded as {existing}")]
    Conflict { id: ContentId, existing: RecordKind },

    #[error("Failed to encode {file}: {source}")]
    Encode {
        file: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to persist {file}: {source}")]
    Persist {
        file: &'static str,
        #[source]
        source: tza_common::Error,
    },
}

/// Processed and errored identifier sets
///
/// The two sets are always disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    processed: HashSet<ContentId>,
    errored: HashSet<ContentId>,
}

impl SessionState {
    pub fn processed(&self) -> &HashSet<ContentId> {
        &self.processed
    }

    pub fn errored(&self) -> &HashSet<ContentId> {
        &self.errored
    }

    pub fn is_processed(&self, id: &ContentId) -> bool {
        self.processed.contains(id)
    }

    pub fn is_errored(&self, id: &ContentId) -> bool {
        self.errored.contains(id)
    }

    /// Sorted copy of one record
    pub fn sorted(&self, kind: RecordKind) -> Vec<ContentId> {
        let set = match kind {
            RecordKind::Processed => &self.processed,
            RecordKind::Errored => &self.errored,
        };
        let mut ids: Vec<ContentId> = set.iter().cloned().collect();
        ids.sort();
        ids
    }
}

/// Durable owner of the session state
pub struct StateStore {
    processed_path: PathBuf,
    errors_path: PathBuf,
    state: Mutex<SessionState>,
}

impl StateStore {
    /// Load both records from `data_dir`
    pub fn load(data_dir: &Path) -> Self {
        let processed_path = data_dir.join(PROCESSED_FILE);
        let errors_path = data_dir.join(ERRORS_FILE);

        let processed = load_set(&processed_path);
        let mut errored = load_set(&errors_path);

        // Hand-edited files can overlap; success wins
        let overlap = errored.iter().filter(|id| processed.contains(*id)).count();
        if overlap > 0 {
            warn!(
                overlap,
                "Identifiers present in both records, treating them as processed"
            );
            errored.retain(|id| !processed.contains(id));
        }

        info!("Loaded {} processed CIDs", processed.len());
        info!("Loaded {} error CIDs", errored.len());

        Self {
            processed_path,
            errors_path,
            state: Mutex::new(SessionState { processed, errored }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // A panic while holding the lock cannot leave the sets half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn path_for(&self, kind: RecordKind) -> &Path {
        match kind {
            RecordKind::Processed => &self.processed_path,
            RecordKind::Errored => &self.errors_path,
        }
    }

    pub fn is_processed(&self, id: &ContentId) -> bool {
        self.lock().is_processed(id)
    }

    pub fn is_errored(&self, id: &ContentId) -> bool {
        self.lock().is_errored(id)
    }

    /// In either record
    pub fn is_known(&self, id: &ContentId) -> bool {
        let state = self.lock();
        state.is_processed(id) || state.is_errored(id)
    }

    /// Record a successful archive and persist the processed set
    ///
    /// Returns `Ok(false)` if the identifier was already processed.
    pub fn mark_processed(&self, id: &ContentId) -> Result<bool, StateError> {
        self.mark(id, RecordKind::Processed)
    }

    /// Record a failed archive and persist the error set
    ///
    /// Returns `Ok(false)` if the identifier was already errored.
    pub fn mark_errored(&self, id: &ContentId) -> Result<bool, StateError> {
        self.mark(id, RecordKind::Errored)
    }

    fn mark(&self, id: &ContentId, kind: RecordKind) -> Result<bool, StateError> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let (target, other) = match kind {
            RecordKind::Processed => (&mut state.processed, &state.errored),
            RecordKind::Errored => (&mut state.errored, &state.processed),
        };

        if other.contains(id) {
            let existing = match kind {
                RecordKind::Processed => RecordKind::Errored,
                RecordKind::Errored => RecordKind::Processed,
            };
            return Err(StateError::Conflict {
                id: id.clone(),
                existing,
            });
        }

        if !target.insert(id.clone()) {
            return Ok(false);
        }

        // The in-memory insert stands even if the write fails, so this run
        // never dispatches the identifier again.
        write_set(self.path_for(kind), kind, target)?;
        debug!(cid = %id, record = %kind, "State persisted");
        Ok(true)
    }

    /// Rewrite both records
    pub fn flush(&self) -> Result<(), StateError> {
        let state = self.lock();
        write_set(&self.processed_path, RecordKind::Processed, &state.processed)?;
        write_set(&self.errors_path, RecordKind::Errored, &state.errored)?;
        Ok(())
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> SessionState {
        self.lock().clone()
    }

    /// (processed, errored)
    pub fn counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.processed.len(), state.errored.len())
    }

    pub fn processed_path(&self) -> &Path {
        &self.processed_path
    }

    pub fn errors_path(&self) -> &Path {
        &self.errors_path
    }
}

fn load_set(path: &Path) -> HashSet<ContentId> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("{} not found, starting empty", name);
            return HashSet::new();
        }
        Err(e) => {
            warn!("Failed to read {}: {}. Starting with an empty set", name, e);
            return HashSet::new();
        }
    };

    match serde_json::from_str::<Vec<String>>(&content) {
        Ok(ids) => ids.into_iter().map(ContentId::from).collect(),
        Err(e) => {
            warn!("Failed to load {}: {}. Starting with an empty set", name, e);
            HashSet::new()
        }
    }
}

fn write_set(path: &Path, kind: RecordKind, set: &HashSet<ContentId>) -> Result<(), StateError> {
    let mut ids: Vec<&str> = set.iter().map(ContentId::as_str).collect();
    ids.sort_unstable();

    let encoded = serde_json::to_vec_pretty(&ids).map_err(|source| StateError::Encode {
        file: kind.file_name(),
        source,
    })?;

    tza_common::fs::write_atomic(path, &encoded).map_err(|source| {
        error!("Failed to save {}: {}", kind.file_name(), source);
        StateError::Persist {
            file: kind.file_name(),
            source,
        }
    })
}
