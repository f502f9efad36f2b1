//! Bucket notification events.
//!
//! The object store delivers notifications as newline-delimited JSON. Each
//! line decodes into a [`NotificationEvent`] carrying zero or more
//! [`ObjectRecord`]s and, when something went wrong on the stream itself, a
//! [`StreamError`].

use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use thiserror::Error;

/// Event kinds requested when subscribing: every flavour of object creation.
pub const OBJECT_CREATED_EVENTS: &str = "s3:ObjectCreated:*";

/// Errors attached to an event by the notification stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("notification stream transport error: {0}")]
    Transport(String),

    #[error("cannot decode notification: {0}")]
    Decode(String),
}

/// One created object, as announced by a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Object key (already URL-decoded)
    pub key: String,

    /// Declared MIME type of the object
    pub content_type: String,

    /// Object size in bytes, when the notification carries it
    pub size: Option<u64>,

    /// Event name, e.g. `s3:ObjectCreated:Put`
    pub event_name: Option<String>,

    /// When the object was created
    pub event_time: Option<DateTime<Utc>>,
}

impl ObjectRecord {
    /// Create a record with just a key and content type
    pub fn new(key: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            content_type: content_type.into(),
            size: None,
            event_name: None,
            event_time: None,
        }
    }
}

/// A single delivery from the notification stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationEvent {
    /// Error reported by the stream alongside (or instead of) records
    pub stream_error: Option<StreamError>,

    /// Records in delivery order
    pub records: Vec<ObjectRecord>,
}

impl NotificationEvent {
    /// An event carrying records and no error
    pub fn with_records(records: Vec<ObjectRecord>) -> Self {
        Self {
            stream_error: None,
            records,
        }
    }

    /// An event carrying only a stream error
    pub fn stream_failure(error: StreamError) -> Self {
        Self {
            stream_error: Some(error),
            records: Vec::new(),
        }
    }

    /// Decode one line of the notification stream.
    ///
    /// Returns `None` for blank keep-alive lines. A line that is not a valid
    /// notification yields an event carrying [`StreamError::Decode`].
    pub fn from_json_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match serde_json::from_str::<WireNotification>(line) {
            Ok(wire) => Some(Self::with_records(
                wire.records
                    .unwrap_or_default()
                    .into_iter()
                    .map(ObjectRecord::from)
                    .collect(),
            )),
            Err(e) => Some(Self::stream_failure(StreamError::Decode(e.to_string()))),
        }
    }
}

/// Decode an S3 notification key (form encoding: `+` is a space).
pub fn decode_object_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

#[derive(Debug, Deserialize)]
struct WireNotification {
    #[serde(rename = "Records", default)]
    records: Option<Vec<WireRecord>>,
}

#[derive(Debug, Deserialize)]
struct WireRecord {
    #[serde(rename = "eventName", default)]
    event_name: Option<String>,

    #[serde(rename = "eventTime", default)]
    event_time: Option<String>,

    s3: WireS3,
}

#[derive(Debug, Deserialize)]
struct WireS3 {
    object: WireObject,
}

#[derive(Debug, Deserialize)]
struct WireObject {
    key: String,

    #[serde(rename = "contentType", default)]
    content_type: String,

    #[serde(default)]
    size: Option<u64>,
}

impl From<WireRecord> for ObjectRecord {
    fn from(wire: WireRecord) -> Self {
        let event_time = wire
            .event_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));

        Self {
            key: decode_object_key(&wire.s3.object.key),
            content_type: wire.s3.object.content_type,
            size: wire.s3.object.size,
            event_name: wire.event_name,
            event_time,
        }
    }
}
