//! Domain types for the bucket listener.
//!
//! - Notification: events and object records delivered by the bucket
//!   notification stream

pub mod notification;

// Re-export commonly used types
pub use notification::{
    decode_object_key, NotificationEvent, ObjectRecord, StreamError, OBJECT_CREATED_EVENTS,
};
