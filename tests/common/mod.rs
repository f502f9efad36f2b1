//! Shared fixtures for integration tests: an in-memory object store, a
//! capturing tracing layer, and image helpers.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::stream::{self, StreamExt};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage, Rgba, RgbaImage};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use bucket_invert::adapters::minio::notification_lines;
use bucket_invert::adapters::{NotificationStream, ObjectStore, UploadInfo};
use bucket_invert::core::{
    BucketPair, Invert, LimitViolation, ReconnectPolicy, StagingArea, StagingLedger, TransferLimits, TransformPipeline,
};
use bucket_invert::domain::NotificationEvent;

pub const SOURCE: &str = "input-images";
pub const DESTINATION: &str = "inverted-images";
pub const PREFIX: &str = "image_listener_temp_";

/// An object written by `upload`
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub bucket: String,
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// In-memory object store with scripted failures and subscriptions
#[derive(Default)]
pub struct FakeStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    uploads: Mutex<Vec<StoredUpload>>,
    ops: Mutex<Vec<String>>,
    fail_downloads: Mutex<HashSet<String>>,
    fail_uploads: Mutex<HashSet<String>>,
    stall_downloads: AtomicBool,
    subscriptions: Mutex<VecDeque<Result<NotificationStream, String>>>,
    subscribe_calls: Mutex<Vec<(String, Vec<String>)>>,
    ledger: Mutex<Option<Arc<StagingLedger>>>,
    max_live: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), bytes);
    }

    pub fn fail_download(&self, key: &str) {
        self.fail_downloads.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_upload(&self, key: &str) {
        self.fail_uploads.lock().unwrap().insert(key.to_string());
    }

    /// Downloads never complete
    pub fn stall_downloads(&self) {
        self.stall_downloads.store(true, Ordering::SeqCst);
    }

    /// Sample the staging ledger on every download and upload
    pub fn watch_ledger(&self, ledger: Arc<StagingLedger>) {
        *self.ledger.lock().unwrap() = Some(ledger);
    }

    /// Next subscription yields `events`, then ends
    pub fn push_events(&self, events: Vec<NotificationEvent>) {
        self.push_subscription(Ok(stream::iter(events).boxed()));
    }

    /// Next subscription is fed through the returned sender; it ends when
    /// the sender is dropped
    pub fn push_feed(&self) -> UnboundedSender<NotificationEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.push_subscription(Ok(rx.boxed()));
        tx
    }

    /// Next subscription carries the raw listen API body
    pub fn push_body(&self, chunks: Vec<&'static str>) {
        let body = stream::iter(chunks.into_iter().map(Ok::<_, String>));
        self.push_subscription(Ok(notification_lines(body)));
    }

    /// Next subscription attempt fails
    pub fn push_subscribe_error(&self, message: &str) {
        self.push_subscription(Err(message.to_string()));
    }

    fn push_subscription(&self, subscription: Result<NotificationStream, String>) {
        self.subscriptions.lock().unwrap().push_back(subscription);
    }

    pub fn uploads(&self) -> Vec<StoredUpload> {
        self.uploads.lock().unwrap().clone()
    }

    /// `download:<key>` / `upload:<key>` in call order
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn subscribe_calls(&self) -> Vec<(String, Vec<String>)> {
        self.subscribe_calls.lock().unwrap().clone()
    }

    /// Highest live staging count seen during a transfer
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    fn sample_ledger(&self) {
        if let Some(ledger) = self.ledger.lock().unwrap().as_ref() {
            self.max_live.fetch_max(ledger.live(), Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    fn name(&self) -> &str {
        "fake"
    }

    async fn subscribe(&self, bucket: &str, events: &[&str]) -> Result<NotificationStream> {
        self.subscribe_calls.lock().unwrap().push((
            bucket.to_string(),
            events.iter().map(|e| e.to_string()).collect(),
        ));

        let next = self.subscriptions.lock().unwrap().pop_front();
        match next {
            Some(Ok(stream)) => Ok(stream),
            Some(Err(message)) => Err(anyhow!(message)),
            // Nothing scripted: stay quiet forever
            None => Ok(stream::pending::<NotificationEvent>().boxed()),
        }
    }

    async fn download(&self, bucket: &str, key: &str, dest: &Path, max_bytes: u64) -> Result<u64> {
        self.ops.lock().unwrap().push(format!("download:{}", key));
        self.sample_ledger();

        if self.stall_downloads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_downloads.lock().unwrap().contains(key) {
            bail!("connection refused");
        }

        let bytes = self
            .objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("NoSuchKey: {}/{}", bucket, key))?;

        let size = bytes.len() as u64;
        if size > max_bytes {
            return Err(LimitViolation::ObjectTooLarge {
                actual: size,
                limit: max_bytes,
            }
            .into());
        }

        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        content_type: Option<&str>,
    ) -> Result<UploadInfo> {
        self.ops.lock().unwrap().push(format!("upload:{}", key));
        self.sample_ledger();

        if self.fail_uploads.lock().unwrap().contains(key) {
            bail!("AccessDenied");
        }

        let bytes = tokio::fs::read(src).await?;
        let size = bytes.len() as u64;
        self.uploads.lock().unwrap().push(StoredUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            bytes,
            content_type: content_type.map(str::to_string),
        });

        Ok(UploadInfo {
            key: key.to_string(),
            size,
            etag: None,
        })
    }
}

/// One captured tracing event
#[derive(Debug, Clone)]
pub struct CapturedLog {
    pub level: Level,
    pub message: String,
    pub fields: HashMap<String, String>,
}

/// Tracing layer that records every event
#[derive(Clone, Default)]
pub struct LogCapture {
    logs: Arc<Mutex<Vec<CapturedLog>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture events on this thread until the guard is dropped
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn at(&self, level: Level) -> Vec<CapturedLog> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.level == level)
            .cloned()
            .collect()
    }

    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.at(level).into_iter().map(|log| log.message).collect()
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.logs.lock().unwrap().push(CapturedLog {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: HashMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.store(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.store(field, format!("{:?}", value));
    }
}

impl FieldVisitor {
    fn store(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

/// Pipeline over `store` staging into `dir`, with default buckets
pub fn pipeline(store: &Arc<FakeStore>, dir: &Path) -> TransformPipeline {
    pipeline_with_limits(store, dir, TransferLimits::default())
}

pub fn pipeline_with_limits(
    store: &Arc<FakeStore>,
    dir: &Path,
    limits: TransferLimits,
) -> TransformPipeline {
    let staging = StagingArea::new(dir, PREFIX);
    store.watch_ledger(staging.ledger());

    TransformPipeline::new(
        Arc::clone(store) as Arc<dyn ObjectStore>,
        staging,
        Arc::new(Invert),
        BucketPair::default(),
        limits,
    )
}

/// Reconnect policy with short delays
pub fn fast_reconnect(startup_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        startup_attempts,
        initial_delay_ms: 10,
        max_delay_ms: 50,
        multiplier: 2.0,
    }
}

pub fn png_bytes(image: DynamicImage) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageOutputFormat::Png)
        .expect("encode png");
    bytes.into_inner()
}

pub fn jpeg_bytes(width: u32, height: u32, pixel: [u8; 3]) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(pixel)));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageOutputFormat::Jpeg(95))
        .expect("encode jpeg");
    bytes.into_inner()
}

pub fn solid_png(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
    png_bytes(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        width,
        height,
        Rgba(pixel),
    )))
}

/// Entries left in a staging directory
pub fn staged_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

/// Poll `condition` until it holds, panicking after a few seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
