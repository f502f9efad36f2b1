//! Core processing logic.
//!
//! This module contains:
//! - Staging: temporary local files with scoped cleanup
//! - Router: content-type classification
//! - Transform: image transforms (inversion)
//! - Pipeline: download → transform → upload for one record
//! - Limits / Reconnect: transfer bounds and subscription backoff

pub mod limits;
pub mod pipeline;
pub mod reconnect;
pub mod router;
pub mod staging;
pub mod transform;

// Re-export commonly used types
pub use limits::{LimitViolation, TransferLimits};
pub use pipeline::{BucketPair, PipelineError, ProcessOutcome, TransformPipeline, UNSUPPORTED_MESSAGE};
pub use reconnect::{Backoff, ReconnectPolicy};
pub use router::{classify, Classification, ImageFormat};
pub use staging::{StagePurpose, StagedFile, StagingArea, StagingError, StagingLedger};
pub use transform::{Invert, Transform};
