//! bucket-invert - MinIO bucket listener that inverts images
//!
//! Listens for object-creation notifications on a source bucket, downloads
//! each JPEG or PNG object to a local staging file, inverts its colors, and
//! uploads the result under the same key to a destination bucket.
//!
//! # Architecture
//!
//! - Every record is processed independently; a failure is logged and the
//!   listener moves on to the next record
//! - Staged files are owned values that remove themselves when released or
//!   dropped
//! - Storage is reached only through the [`adapters::ObjectStore`] trait
//!
//! # Modules
//!
//! - `adapters`: Object store trait and the MinIO client (S3 SDK, listen API)
//! - `core`: Staging, routing, transforms, and the per-object pipeline
//! - `domain`: Notification events and object records
//! - `ingest`: Notification consumer loop
//! - `config` / `diagnostics`: Configuration sources and log output
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! export MINIO_ACCESSKEY=minioadmin MINIO_SECRETKEY=minioadmin
//!
//! # Listen until Ctrl-C
//! bucket-invert listen
//!
//! # Invert a single existing object
//! bucket-invert process cat.jpg --content-type image/jpeg
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod diagnostics;
pub mod domain;
pub mod ingest;

// Re-export main types at crate root for convenience
pub use adapters::{MinioClient, ObjectStore, UploadInfo};
pub use crate::core::{ProcessOutcome, StagingArea, TransformPipeline};
pub use domain::{NotificationEvent, ObjectRecord};
pub use ingest::{ConsumerHandle, NotificationConsumer};
