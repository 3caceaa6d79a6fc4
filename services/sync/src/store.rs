//! Persisted monitor store
//!
//! The store holds the authoritative local view of all monitors behind a
//! copy-on-write map: readers grab an `Arc` snapshot without blocking
//! writers, and every mutation swaps in a new map. Mutations are mirrored
//! to a persistence backend best-effort; a failed write is logged and the
//! in-memory state stays authoritative.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::types::MonitorState;

/// Everything the store writes to disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub monitors: HashMap<String, MonitorState>,
    /// Session id of the last connection, reused on restart
    #[serde(default)]
    pub session_id: Option<String>,
    /// Ids of monitors that were running when the client last shut down
    #[serde(default)]
    pub active_monitor_ids: Vec<String>,
}

/// Trait for loading and saving the persisted state
///
/// Abstracted so tests can run against an in-memory backend and so a
/// broken disk never takes the client down.
#[cfg_attr(test, mockall::automock)]
pub trait StatePersistence: Send + Sync {
    /// Load the persisted state, `Ok(None)` if nothing was saved yet
    fn load(&self) -> Result<Option<PersistedState>>;

    /// Save the full persisted state
    fn save(&self, state: &PersistedState) -> Result<()>;
}

/// JSON file implementation of StatePersistence
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl StatePersistence for FileStateStore {
    fn load(&self) -> Result<Option<PersistedState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| SyncError::Persistence(format!("read {}: {}", self.path.display(), e)))?;
        let state: PersistedState = serde_json::from_str(&content)
            .map_err(|e| SyncError::Persistence(format!("parse {}: {}", self.path.display(), e)))?;
        Ok(Some(state))
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        let content = serde_json::to_string(state)?;
        std::fs::write(&self.path, content)
            .map_err(|e| SyncError::Persistence(format!("write {}: {}", self.path.display(), e)))?;
        Ok(())
    }
}

/// Shared monitor store with copy-on-write reads
pub struct MonitorStore {
    monitors: RwLock<Arc<HashMap<String, MonitorState>>>,
    session_id: RwLock<Option<String>>,
    resume_ids: RwLock<Vec<String>>,
    persistence: Box<dyn StatePersistence>,
}

impl MonitorStore {
    /// Create a store, hydrating from the persistence backend.
    ///
    /// A load failure is logged and the store starts empty; persistence is
    /// an availability aid, never a correctness requirement.
    pub fn new(persistence: Box<dyn StatePersistence>) -> Self {
        let loaded = match persistence.load() {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to load persisted state, starting empty: {}", e);
                PersistedState::default()
            }
        };
        debug!(
            monitors = loaded.monitors.len(),
            has_session = loaded.session_id.is_some(),
            "Hydrated monitor store"
        );
        Self {
            monitors: RwLock::new(Arc::new(loaded.monitors)),
            session_id: RwLock::new(loaded.session_id),
            resume_ids: RwLock::new(loaded.active_monitor_ids),
            persistence,
        }
    }

    /// Cheap point-in-time snapshot of all monitors
    pub fn snapshot(&self) -> Arc<HashMap<String, MonitorState>> {
        match self.monitors.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Look up a single monitor by id
    pub fn get(&self, id: &str) -> Option<MonitorState> {
        self.snapshot().get(id).cloned()
    }

    /// Insert or replace a monitor record
    pub fn insert(&self, monitor: MonitorState) {
        self.mutate(|map| {
            map.insert(monitor.id.clone(), monitor);
        });
    }

    /// Apply a closure to one monitor; returns false if the id is unknown
    pub fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut MonitorState),
    {
        let mut found = false;
        self.mutate(|map| {
            if let Some(monitor) = map.get_mut(id) {
                f(monitor);
                found = true;
            }
        });
        found
    }

    /// Remove a monitor record
    pub fn remove(&self, id: &str) -> bool {
        let mut removed = false;
        self.mutate(|map| {
            removed = map.remove(id).is_some();
        });
        removed
    }

    /// Session id from the last connection, if any
    pub fn session_id(&self) -> Option<String> {
        match self.session_id.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Record the session id assigned by the server
    pub fn set_session_id(&self, id: &str) {
        match self.session_id.write() {
            Ok(mut guard) => *guard = Some(id.to_string()),
            Err(poisoned) => *poisoned.into_inner() = Some(id.to_string()),
        }
        self.persist();
    }

    /// Consume the set of monitors that were running at last shutdown.
    ///
    /// The set is cleared whether or not the caller acts on it, so a crash
    /// loop never replays a stale resume set twice.
    pub fn take_resume_ids(&self) -> Vec<String> {
        let ids = match self.resume_ids.write() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        if !ids.is_empty() {
            self.persist();
        }
        ids
    }

    /// Record which monitors are running, for the next startup to resume
    pub fn save_active_ids(&self, ids: Vec<String>) {
        match self.resume_ids.write() {
            Ok(mut guard) => *guard = ids,
            Err(poisoned) => *poisoned.into_inner() = ids,
        }
        self.persist();
    }

    /// Ids of all currently active monitors
    pub fn active_ids(&self) -> Vec<String> {
        self.snapshot()
            .values()
            .filter(|m| m.is_active)
            .map(|m| m.id.clone())
            .collect()
    }

    fn mutate<F>(&self, f: F)
    where
        F: FnOnce(&mut HashMap<String, MonitorState>),
    {
        {
            let mut guard = match self.monitors.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let mut next = HashMap::clone(&guard);
            f(&mut next);
            *guard = Arc::new(next);
        }
        self.persist();
    }

    fn persist(&self) {
        let state = PersistedState {
            monitors: HashMap::clone(&self.snapshot()),
            session_id: self.session_id(),
            active_monitor_ids: match self.resume_ids.read() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            },
        };
        if let Err(e) = self.persistence.save(&state) {
            warn!("Failed to persist state: {}", e);
        }
    }
}
