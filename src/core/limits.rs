//! Transfer limits for pipeline execution.
//!
//! Bounds the time spent in a single network call and the size of objects
//! pulled onto local disk.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Limits applied to each object transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLimits {
    /// Per-download timeout in seconds (default: 60)
    #[serde(default = "default_download_timeout")]
    pub download_timeout_seconds: u64,

    /// Per-upload timeout in seconds (default: 60)
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_seconds: u64,

    /// Largest object accepted for transformation (default: 50MB)
    #[serde(default = "default_max_object_bytes")]
    pub max_object_bytes: u64,
}

fn default_download_timeout() -> u64 {
    60
}
fn default_upload_timeout() -> u64 {
    60
}
fn default_max_object_bytes() -> u64 {
    50 * 1024 * 1024
} // 50MB

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            download_timeout_seconds: default_download_timeout(),
            upload_timeout_seconds: default_upload_timeout(),
            max_object_bytes: default_max_object_bytes(),
        }
    }
}

impl TransferLimits {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_seconds)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_seconds)
    }

    /// Validate an object's announced or downloaded size
    pub fn check_object_size(&self, size: u64) -> Result<(), LimitViolation> {
        if size > self.max_object_bytes {
            return Err(LimitViolation::ObjectTooLarge {
                actual: size,
                limit: self.max_object_bytes,
            });
        }
        Ok(())
    }
}

/// Limit violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitViolation {
    #[error("object exceeds size limit: {actual} > {limit}")]
    ObjectTooLarge { actual: u64, limit: u64 },
}
