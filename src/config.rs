use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app_response::AppResponse;

/// Startup options for [`crate::RecordCore`].
///
/// Every field has a default, so `{}` is a valid JSON configuration for
/// [`crate::open_core`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Directory holding the LMDB environment and the flat snapshot.
    pub base_dir: PathBuf,
    /// The LMDB environment lives at `<base_dir>/<store_name>.lmdb`.
    pub store_name: String,
    pub map_size_bytes: usize,
    pub search_debounce_ms: u64,
    /// Interval for timer-driven reconciliation; `None` disables it.
    pub periodic_sync_secs: Option<u64>,
    pub start_online: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            store_name: "leaftag".to_string(),
            map_size_bytes: 256 * 1024 * 1024,
            search_debounce_ms: 300,
            periodic_sync_secs: None,
            start_online: true,
        }
    }
}

impl CoreConfig {
    pub fn in_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, AppResponse> {
        let config: CoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppResponse> {
        if self.store_name.trim().is_empty() {
            return Err(AppResponse::ValidationError("store_name cannot be empty".to_string()));
        }
        if self.map_size_bytes == 0 {
            return Err(AppResponse::ValidationError("map_size_bytes must be positive".to_string()));
        }
        if self.periodic_sync_secs == Some(0) {
            return Err(AppResponse::ValidationError("periodic_sync_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn lmdb_dir(&self) -> PathBuf {
        self.base_dir.join(format!("{}.lmdb", self.store_name))
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn periodic_sync_interval(&self) -> Option<Duration> {
        self.periodic_sync_secs.map(Duration::from_secs)
    }
}
