//! Notification ingestion.
//!
//! ```text
//! object store ─listen─▶ NotificationConsumer ─record─▶ TransformPipeline
//!                                                        │
//!                                          download ─ invert ─ upload
//! ```

pub mod consumer;

pub use consumer::{ConsumerHandle, ConsumerReport, ConsumerState, NotificationConsumer};
