//! Per-object transform pipeline.
//!
//! For one notification record: route by content type, stage the object
//! locally, decode, transform, encode, upload the result, and remove the
//! staged files. Every failure is logged and ends processing of that record
//! only; nothing propagates to the caller.

use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use thiserror::Error;
use tokio::time::timeout;

use super::limits::{LimitViolation, TransferLimits};
use super::router::{classify, Classification, ImageFormat};
use super::staging::{StagePurpose, StagedFile, StagingArea, RESULT_SUFFIX};
use super::transform::Transform;
use crate::adapters::{ObjectStore, UploadInfo};
use crate::domain::ObjectRecord;

/// Fixed diagnostic for records the router rejects
pub const UNSUPPORTED_MESSAGE: &str = "Not a JPEG or PNG file";

/// Why processing a record stopped early.
///
/// The display text is the fixed diagnostic; [`PipelineError::detail`] holds
/// the underlying cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("cannot create temporary file")]
    Staging(String),

    #[error("cannot download object")]
    Download(String),

    #[error("object exceeds size limit")]
    TooLarge(String),

    #[error("cannot open temporary file")]
    Decode(String),

    #[error("cannot transform image")]
    Transform(String),

    #[error("cannot save image")]
    Encode(String),

    #[error("CANNOT UPLOAD OBJECT")]
    Upload(String),
}

impl PipelineError {
    /// Underlying cause
    pub fn detail(&self) -> &str {
        match self {
            Self::Staging(d)
            | Self::Download(d)
            | Self::TooLarge(d)
            | Self::Decode(d)
            | Self::Transform(d)
            | Self::Encode(d)
            | Self::Upload(d) => d,
        }
    }
}

/// What happened to a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Transformed and uploaded
    Uploaded(UploadInfo),

    /// Content type not supported; nothing was staged
    Skipped { content_type: String },

    /// Processing stopped at some stage
    Failed(PipelineError),
}

/// Source and destination buckets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketPair {
    pub source: String,
    pub destination: String,
}

impl Default for BucketPair {
    fn default() -> Self {
        Self {
            source: "input-images".to_string(),
            destination: "inverted-images".to_string(),
        }
    }
}

/// Download → transform → upload for one object at a time
pub struct TransformPipeline {
    store: Arc<dyn ObjectStore>,
    staging: StagingArea,
    transform: Arc<dyn Transform>,
    buckets: BucketPair,
    limits: TransferLimits,
}

impl TransformPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        staging: StagingArea,
        transform: Arc<dyn Transform>,
        buckets: BucketPair,
        limits: TransferLimits,
    ) -> Self {
        Self {
            store,
            staging,
            transform,
            buckets,
            limits,
        }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn buckets(&self) -> &BucketPair {
        &self.buckets
    }

    /// Process one record. Never fails; the outcome says what happened.
    pub async fn process(&self, record: &ObjectRecord) -> ProcessOutcome {
        let format = match classify(&record.content_type) {
            Classification::Supported(format) => format,
            Classification::Unsupported => {
                tracing::error!(
                    key = %record.key,
                    content_type = %record.content_type,
                    "{}",
                    UNSUPPORTED_MESSAGE
                );
                return ProcessOutcome::Skipped {
                    content_type: record.content_type.clone(),
                };
            }
        };

        // Announced size is checked before anything is staged or fetched
        if let Some(size) = record.size {
            if let Err(e) = self.limits.check_object_size(size) {
                return self.fail(record, PipelineError::TooLarge(e.to_string()));
            }
        }

        let (source, result) = match self.stage(format) {
            Ok(files) => files,
            Err(e) => return self.fail(record, e),
        };

        let outcome = self.run_stages(record, format, &source, &result).await;

        source.release();
        result.release();

        match outcome {
            Ok(info) => {
                tracing::info!(
                    key = %info.key,
                    size = info.size,
                    bucket = %self.buckets.destination,
                    transform = self.transform.name(),
                    "Uploaded {} (size: {})",
                    info.key,
                    info.size
                );
                ProcessOutcome::Uploaded(info)
            }
            Err(e) => self.fail(record, e),
        }
    }

    fn fail(&self, record: &ObjectRecord, error: PipelineError) -> ProcessOutcome {
        tracing::error!(key = %record.key, error = %error.detail(), "{}", error);
        ProcessOutcome::Failed(error)
    }

    /// Allocate the source and result staging paths
    fn stage(&self, format: ImageFormat) -> Result<(StagedFile, StagedFile), PipelineError> {
        let source = self
            .staging
            .create(StagePurpose::Source)
            .map_err(|e| PipelineError::Staging(e.to_string()))?;

        // On failure `source` is dropped here, which releases it
        let result = self
            .staging
            .derive(&source, RESULT_SUFFIX, format.extension())
            .map_err(|e| PipelineError::Staging(e.to_string()))?;

        Ok((source, result))
    }

    async fn run_stages(
        &self,
        record: &ObjectRecord,
        format: ImageFormat,
        source: &StagedFile,
        result: &StagedFile,
    ) -> Result<UploadInfo, PipelineError> {
        self.download(&record.key, source.path()).await?;

        let transform = Arc::clone(&self.transform);
        let source_path = source.path().to_path_buf();
        let result_path = result.path().to_path_buf();
        tokio::task::spawn_blocking(move || {
            transform_file(transform.as_ref(), &source_path, &result_path, format)
        })
        .await
        .map_err(|e| PipelineError::Transform(e.to_string()))??;

        self.upload(&record.key, result.path(), format).await
    }

    /// Fetch into `dest`; the store aborts once `max_object_bytes` is exceeded
    async fn download(&self, key: &str, dest: &Path) -> Result<u64, PipelineError> {
        let limit = self.limits.download_timeout();
        let download = self.store.download(
            &self.buckets.source,
            key,
            dest,
            self.limits.max_object_bytes,
        );

        match timeout(limit, download).await {
            Ok(Ok(size)) => Ok(size),
            Ok(Err(e)) => {
                let too_large = e.chain().find_map(|c| c.downcast_ref::<LimitViolation>());
                match too_large {
                    Some(violation) => Err(PipelineError::TooLarge(violation.to_string())),
                    None => Err(PipelineError::Download(format!("{:#}", e))),
                }
            }
            Err(_) => Err(PipelineError::Download(format!("timed out after {:?}", limit))),
        }
    }

    async fn upload(
        &self,
        key: &str,
        src: &Path,
        format: ImageFormat,
    ) -> Result<UploadInfo, PipelineError> {
        let limit = self.limits.upload_timeout();
        let upload = self.store.upload(
            &self.buckets.destination,
            key,
            src,
            Some(format.mime_type()),
        );

        match timeout(limit, upload).await {
            Ok(Ok(info)) => Ok(info),
            Ok(Err(e)) => Err(PipelineError::Upload(format!("{:#}", e))),
            Err(_) => Err(PipelineError::Upload(format!("timed out after {:?}", limit))),
        }
    }
}

/// Decode `source`, transform it, and encode into `result` (blocking)
fn transform_file(
    transform: &dyn Transform,
    source: &Path,
    result: &Path,
    format: ImageFormat,
) -> Result<(), PipelineError> {
    let decoded = decode(source)?;
    let transformed = transform.apply(decoded);
    transformed
        .save_with_format(result, format.codec())
        .map_err(|e| PipelineError::Encode(e.to_string()))
}

/// Decode an image by sniffing its content (staged files have no extension)
fn decode(path: &Path) -> Result<DynamicImage, PipelineError> {
    image::io::Reader::open(path)
        .map_err(|e| PipelineError::Decode(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| PipelineError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| PipelineError::Decode(e.to_string()))
}
