//! Adapter interfaces for external systems.
//!
//! The pipeline only talks to object storage through [`ObjectStore`], so the
//! MinIO client can be swapped for an in-memory store in tests.

pub mod minio;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::NotificationEvent;

// Re-export the MinIO adapter
pub use minio::{Credentials, MinioClient};

/// Unbounded feed of bucket notifications
pub type NotificationStream = BoxStream<'static, NotificationEvent>;

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadInfo {
    /// Key the object was stored under
    pub key: String,

    /// Number of bytes uploaded
    pub size: u64,

    /// Entity tag returned by the store (if available)
    pub etag: Option<String>,
}

/// Trait for object stores
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable store name
    fn name(&self) -> &str;

    /// Subscribe to notifications for `bucket`, filtered to `events`
    async fn subscribe(&self, bucket: &str, events: &[&str]) -> Result<NotificationStream>;

    /// Download an object into `dest`, returning the number of bytes written.
    ///
    /// Fails with a [`LimitViolation`](crate::core::LimitViolation) in its
    /// error chain as soon as more than `max_bytes` would be written.
    async fn download(&self, bucket: &str, key: &str, dest: &Path, max_bytes: u64)
        -> Result<u64>;

    /// Upload the contents of `src` as an object
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        content_type: Option<&str>,
    ) -> Result<UploadInfo>;
}
