use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::{FRAME_HEADER_SIZE, HISTORY_LIMIT, POOL_SIZE, RETRY_BACKOFF_MS, TRANSFER_SIZE};
use crate::error::{Result, ScopeError};

/// Tunables of the capture engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Bulk reads kept outstanding against the IN endpoint
    pub pool_size: usize,
    /// Bytes requested by each bulk read
    pub transfer_size: usize,
    /// Delay before a failed slot is resubmitted
    pub retry_backoff_ms: u64,
    /// Captured messages retained in the buffer
    pub history_limit: usize,
    /// Depth of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            pool_size: POOL_SIZE,
            transfer_size: TRANSFER_SIZE,
            retry_backoff_ms: RETRY_BACKOFF_MS,
            history_limit: HISTORY_LIMIT,
            event_capacity: 1024,
        }
    }
}

impl CaptureConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(ScopeError::Config("pool_size must be at least 1".to_string()));
        }
        if self.transfer_size < FRAME_HEADER_SIZE {
            return Err(ScopeError::Config(format!(
                "transfer_size {} is smaller than the {} byte frame header",
                self.transfer_size, FRAME_HEADER_SIZE
            )));
        }
        if self.history_limit == 0 {
            return Err(ScopeError::Config("history_limit must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Loads and validates a JSON configuration file; missing keys take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| ScopeError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }
}
