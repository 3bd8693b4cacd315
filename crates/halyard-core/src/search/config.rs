//! Auto-search configuration.

use std::path::{Path, PathBuf};

use crate::constants::{
    AUTOSEARCH_FILE, DEFAULT_EXPIRE_DAYS, DEFAULT_RECHECK_MINS, DEFAULT_SEARCH_INTERVAL_MINS,
};

/// Tunables of the auto-search scheduler.
#[derive(Debug, Clone)]
pub struct AutoSearchConfig {
    /// Minutes between two scheduler-emitted searches.
    pub search_interval_mins: u32,
    /// Minutes to wait after a full walk of the list before starting
    /// the next cycle.
    pub recheck_mins: u32,
    /// Days until a quick-added item expires; 0 disables expiry.
    pub expire_days: u32,
    /// Directory the item store is persisted in.
    pub config_dir: PathBuf,
}

impl Default for AutoSearchConfig {
    fn default() -> Self {
        Self {
            search_interval_mins: DEFAULT_SEARCH_INTERVAL_MINS,
            recheck_mins: DEFAULT_RECHECK_MINS,
            expire_days: DEFAULT_EXPIRE_DAYS,
            config_dir: PathBuf::new(),
        }
    }
}

impl AutoSearchConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minutes between scheduler-emitted searches.
    pub fn with_search_interval_mins(mut self, mins: u32) -> Self {
        self.search_interval_mins = mins.max(1);
        self
    }

    /// Set the recheck delay in minutes.
    pub fn with_recheck_mins(mut self, mins: u32) -> Self {
        self.recheck_mins = mins;
        self
    }

    /// Set the expiry in days for quick-added items.
    pub fn with_expire_days(mut self, days: u32) -> Self {
        self.expire_days = days;
        self
    }

    /// Set the config directory.
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = dir.into();
        self
    }

    /// Full path of the persisted item store.
    pub fn store_path(&self) -> PathBuf {
        self.config_dir.join(AUTOSEARCH_FILE)
    }

    /// Full path of the temporary file used for atomic replacement.
    pub fn store_tmp_path(&self) -> PathBuf {
        let mut name = AUTOSEARCH_FILE.to_string();
        name.push_str(".tmp");
        self.config_dir.join(name)
    }

    /// Borrow the config directory.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}
