//! Profile store
//!
//! Profiles are YAML files in one directory. Files whose name starts with `_`
//! are only usable as `extends` targets. The store loads the directory once
//! and hands out the same read-only map afterwards.

pub mod definition;
pub mod loader;
pub mod oid_config;
pub mod sysobjectid;

pub use definition::ProfileDefinition;
pub use oid_config::OidConfig;

use crate::error::ProfileError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::info;

/// One loaded profile
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    pub definition_file: PathBuf,
    pub definition: ProfileDefinition,
}

/// Profile name -> profile
pub type ProfileDefinitionMap = HashMap<String, ProfileConfig>;

/// Loads the profiles directory on first use and caches the result
pub struct ProfileStore {
    dir: PathBuf,
    cache: RwLock<Option<Arc<ProfileDefinitionMap>>>,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(None),
        }
    }

    /// Store pre-filled with `profiles`
    pub fn with_profiles(profiles: ProfileDefinitionMap) -> Self {
        Self {
            dir: PathBuf::new(),
            cache: RwLock::new(Some(Arc::new(profiles))),
        }
    }

    /// Cached profiles, loading them on the first call.
    ///
    /// A failed load leaves the cache empty so a later call retries.
    pub async fn load(&self) -> Result<Arc<ProfileDefinitionMap>, ProfileError> {
        if let Some(cached) = self.cached() {
            return Ok(cached);
        }

        let profiles = Arc::new(loader::load_profiles(&self.dir).await?);
        info!(dir = %self.dir.display(), profiles = profiles.len(), "Loaded SNMP profiles");
        if let Ok(mut cache) = self.cache.write() {
            if let Some(existing) = cache.as_ref() {
                return Ok(existing.clone());
            }
            *cache = Some(profiles.clone());
        }
        Ok(profiles)
    }

    /// Profiles if already loaded
    pub fn cached(&self) -> Option<Arc<ProfileDefinitionMap>> {
        self.cache.read().ok().and_then(|c| c.clone())
    }
}
