//! MinIO adapter.
//!
//! Object transfers go through `aws-sdk-s3` with path-style addressing.
//! Bucket notifications use MinIO's listen extension, which the SDK does not
//! model: a long-lived GET signed with SigV4 whose body is newline-delimited
//! JSON.

use std::fmt;
use std::path::Path;
use std::pin::Pin;
use std::time::SystemTime;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sigv4::http_request::{
    sign, PayloadChecksumKind, SignableBody, SignableRequest, SigningSettings,
};
use aws_sigv4::sign::v4;
use futures::stream::{self, Stream, StreamExt};
use reqwest::Url;
use tokio::io::AsyncWriteExt;

use super::{NotificationStream, ObjectStore, UploadInfo};
use crate::core::LimitViolation;
use crate::domain::{NotificationEvent, StreamError};

/// Longest notification line accepted from the listen body (1MB)
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Static access credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    fn to_sdk(&self) -> aws_sdk_s3::config::Credentials {
        aws_sdk_s3::config::Credentials::new(
            self.access_key.clone(),
            self.secret_key.clone(),
            None,
            None,
            "static",
        )
    }
}

/// Validate an endpoint such as `http://localhost:9000`
pub fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint)
        .with_context(|| format!("Invalid object store endpoint: {}", endpoint))?;
    if url.host_str().is_none() {
        bail!("Object store endpoint has no host: {}", endpoint);
    }
    Ok(url)
}

/// Signs listen requests with SigV4 header authentication
struct ListenSigner {
    credentials: aws_sdk_s3::config::Credentials,
    region: String,
}

impl ListenSigner {
    /// Headers to add to an empty-bodied GET of `url`
    fn sign(&self, url: &Url, time: SystemTime) -> Result<Vec<(String, String)>> {
        let identity = self.credentials.clone().into();

        let mut settings = SigningSettings::default();
        settings.payload_checksum_kind = PayloadChecksumKind::XAmzSha256;

        let params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name("s3")
            .time(time)
            .settings(settings)
            .build()
            .context("Cannot build signing parameters")?
            .into();

        let request = SignableRequest::new(
            "GET",
            url.as_str(),
            std::iter::empty::<(&str, &str)>(),
            SignableBody::Bytes(&[]),
        )?;
        let (instructions, _signature) = sign(request, &params)?.into_parts();

        Ok(instructions
            .headers()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect())
    }
}

/// Listen API URL for `bucket`, filtered to `events`
fn listen_url(endpoint: &Url, bucket: &str, events: &[&str]) -> Result<Url> {
    let mut url = endpoint.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("Object store endpoint cannot be a base: {}", endpoint))?
        .pop_if_empty()
        .push(bucket);

    {
        let mut query = url.query_pairs_mut();
        for event in events {
            query.append_pair("events", event);
        }
        query.append_pair("prefix", "");
        query.append_pair("suffix", "");
    }

    Ok(url)
}

/// S3-compatible client for a MinIO server
pub struct MinioClient {
    endpoint: Url,
    s3: aws_sdk_s3::Client,
    http: reqwest::Client,
    signer: ListenSigner,
}

impl fmt::Debug for MinioClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MinioClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.signer.region)
            .finish_non_exhaustive()
    }
}

impl MinioClient {
    /// Connect to `endpoint` (e.g. `http://localhost:9000`)
    pub async fn connect(endpoint: &str, credentials: Credentials, region: &str) -> Result<Self> {
        let endpoint = parse_endpoint(endpoint)?;
        let endpoint_url = endpoint.as_str().trim_end_matches('/').to_string();

        let sdk_config = aws_config::from_env()
            .endpoint_url(&endpoint_url)
            .region(Region::new(region.to_string()))
            .credentials_provider(credentials.to_sdk())
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        Ok(Self {
            endpoint,
            s3: aws_sdk_s3::Client::from_conf(s3_config),
            http: reqwest::Client::new(),
            signer: ListenSigner {
                credentials: credentials.to_sdk(),
                region: region.to_string(),
            },
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn too_large(actual: u64, limit: u64) -> anyhow::Error {
    LimitViolation::ObjectTooLarge { actual, limit }.into()
}

#[async_trait]
impl ObjectStore for MinioClient {
    fn name(&self) -> &str {
        "minio"
    }

    async fn subscribe(&self, bucket: &str, events: &[&str]) -> Result<NotificationStream> {
        let url = listen_url(&self.endpoint, bucket, events)?;

        let mut request = self.http.get(url.clone());
        for (name, value) in self.signer.sign(&url, SystemTime::now())? {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to listen for notifications on {}", bucket))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Listening on {} returned {}: {}", bucket, status, text.trim());
        }

        Ok(notification_lines(response.bytes_stream()))
    }

    async fn download(&self, bucket: &str, key: &str, dest: &Path, max_bytes: u64) -> Result<u64> {
        let output = self
            .s3
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| anyhow!("GetObject {}/{}: {}", bucket, key, DisplayErrorContext(&e)))?;

        if let Some(length) = output.content_length() {
            let length = length.max(0) as u64;
            if length > max_bytes {
                return Err(too_large(length, max_bytes));
            }
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to open {}", dest.display()))?;

        let mut body = output.body;
        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .with_context(|| format!("Failed to read body of {}/{}", bucket, key))?
        {
            written += chunk.len() as u64;
            if written > max_bytes {
                return Err(too_large(written, max_bytes));
            }
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", dest.display()))?;
        }
        file.flush().await?;

        Ok(written)
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        src: &Path,
        content_type: Option<&str>,
    ) -> Result<UploadInfo> {
        let size = tokio::fs::metadata(src)
            .await
            .with_context(|| format!("Failed to read {}", src.display()))?
            .len();
        let body = ByteStream::from_path(src)
            .await
            .with_context(|| format!("Failed to read {}", src.display()))?;

        let output = self
            .s3
            .put_object()
            .bucket(bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .body(body)
            .send()
            .await
            .map_err(|e| anyhow!("PutObject {}/{}: {}", bucket, key, DisplayErrorContext(&e)))?;

        Ok(UploadInfo {
            key: key.to_string(),
            size,
            etag: output.e_tag().map(|v| v.trim_matches('"').to_string()),
        })
    }
}

struct LineReader<S> {
    body: Pin<Box<S>>,
    buffer: Vec<u8>,
    max_line: usize,
    /// Dropping the rest of an overlong line
    discarding: bool,
    finished: bool,
}

impl<S> LineReader<S> {
    fn overlong(&self) -> NotificationEvent {
        NotificationEvent::stream_failure(StreamError::Decode(format!(
            "notification line exceeds {} bytes",
            self.max_line
        )))
    }
}

/// Split a byte stream into notification events, one per JSON line.
///
/// Keep-alive blank lines are dropped. A transport error ends the stream
/// with an event carrying [`StreamError::Transport`]. A line longer than
/// [`MAX_LINE_BYTES`] is dropped and reported as one [`StreamError::Decode`]
/// event.
pub fn notification_lines<S, B, E>(body: S) -> NotificationStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    notification_lines_with_limit(body, MAX_LINE_BYTES)
}

pub fn notification_lines_with_limit<S, B, E>(body: S, max_line: usize) -> NotificationStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let reader = LineReader {
        body: Box::pin(body),
        buffer: Vec::new(),
        max_line,
        discarding: false,
        finished: false,
    };

    stream::unfold(reader, |mut reader| async move {
        loop {
            if let Some(pos) = reader.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = reader.buffer.drain(..=pos).collect();
                if std::mem::take(&mut reader.discarding) {
                    continue;
                }
                if pos > reader.max_line {
                    let event = reader.overlong();
                    return Some((event, reader));
                }
                if let Some(event) = NotificationEvent::from_json_line(&String::from_utf8_lossy(&line)) {
                    return Some((event, reader));
                }
                continue;
            }

            // Buffer holds only part of a line, and it is already too long
            if reader.buffer.len() > reader.max_line {
                reader.buffer.clear();
                if !reader.discarding {
                    reader.discarding = true;
                    let event = reader.overlong();
                    return Some((event, reader));
                }
            }

            if reader.finished {
                let rest = std::mem::take(&mut reader.buffer);
                if reader.discarding {
                    return None;
                }
                return NotificationEvent::from_json_line(&String::from_utf8_lossy(&rest))
                    .map(|event| (event, reader));
            }

            match reader.body.next().await {
                Some(Ok(chunk)) => reader.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    reader.finished = true;
                    reader.discarding = false;
                    reader.buffer.clear();
                    let event = NotificationEvent::stream_failure(StreamError::Transport(e.to_string()));
                    return Some((event, reader));
                }
                None => reader.finished = true,
            }
        }
    })
    .boxed()
}
