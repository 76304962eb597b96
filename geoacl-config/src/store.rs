//! Cached access to the project configuration file.
//!
//! The configuration of a project lives next to it as `<project>.cfg`.
//! Parsed documents are cached by path and modification time, so an edited
//! file is picked up on the next request.

use crate::error::{ConfigError, ConfigResult};
use crate::types::ProjectConfig;
use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

/// Default number of cached project configurations.
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Clone)]
struct CachedConfig {
    modified: SystemTime,
    config: Option<Arc<ProjectConfig>>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<PathBuf, CachedConfig>,
    order: VecDeque<PathBuf>,
}

/// Thread-safe, bounded cache of parsed project configurations.
#[derive(Clone)]
pub struct ConfigStore {
    state: Arc<Mutex<CacheState>>,
    capacity: usize,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ConfigStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            capacity: capacity.max(1),
        }
    }

    /// Path of the configuration file belonging to a project file.
    pub fn config_path(project_path: &Path) -> PathBuf {
        let mut path: OsString = project_path.as_os_str().to_owned();
        path.push(".cfg");
        PathBuf::from(path)
    }

    /// Configuration for a project, `None` when the project or its config
    /// file is missing, empty or unreadable.
    pub fn config_for_project(&self, project_path: &Path) -> Option<Arc<ProjectConfig>> {
        if !project_path.exists() {
            return None;
        }

        let config_path = Self::config_path(project_path);
        let modified = match std::fs::metadata(&config_path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => {
                info!("Config {} does not exist", config_path.display());
                return None;
            }
        };
        debug!(
            "Fetching {} with modification time {:?}",
            config_path.display(),
            modified
        );

        if let Some(cached) = self.lock_state().entries.get(&config_path) {
            if cached.modified == modified {
                return cached.config.clone();
            }
        }

        let config = match Self::load(&config_path) {
            Ok(config) => Some(Arc::new(config)),
            Err(ConfigError::Empty) => {
                warn!("Config {} is empty", config_path.display());
                None
            }
            Err(e) => {
                error!("Config {} not well formed: {e}", config_path.display());
                None
            }
        };

        self.insert(config_path, CachedConfig {
            modified,
            config: config.clone(),
        });
        config
    }

    /// Read and parse a configuration file without caching.
    pub fn load(config_path: &Path) -> ConfigResult<ProjectConfig> {
        let text = std::fs::read_to_string(config_path)?;
        if text.trim().is_empty() {
            return Err(ConfigError::Empty);
        }
        ProjectConfig::from_json(&text)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        let mut state = self.lock_state();
        state.entries.clear();
        state.order.clear();
    }

    fn insert(&self, path: PathBuf, entry: CachedConfig) {
        let mut state = self.lock_state();
        if state.entries.insert(path.clone(), entry).is_none() {
            state.order.push_back(path);
        }
        while state.entries.len() > self.capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
        }
    }

    /// Acquire the cache lock, recovering from poison left by a panicking
    /// reader.
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("[ConfigStore] recovering from poisoned mutex");
            poisoned.into_inner()
        })
    }
}
