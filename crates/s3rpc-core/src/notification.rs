//! S3 event notification schema.
//!
//! The queue carries the JSON documents S3 publishes for object-created
//! events. Only `Records[].s3.bucket.name` and `Records[].s3.object.key` are
//! used; every other field is optional so that test events and trimmed
//! payloads still parse.
//!
//! Keys inside notifications are URL-form encoded by S3 (`+` for space,
//! `%XX` escapes). [`ObjectRef::key`] is always the decoded key.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Characters S3 leaves unescaped in notification keys.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'*');

/// Top-level notification document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3EventNotification {
    /// Event records; absent in `s3:TestEvent` payloads.
    #[serde(rename = "Records", default)]
    pub records: Vec<EventRecord>,
}

/// One event record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Schema version, `2.1` for current S3 events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_version: Option<String>,
    /// Always `aws:s3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_source: Option<String>,
    /// Region of the bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_region: Option<String>,
    /// When the event happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
    /// E.g. `ObjectCreated:Put`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    /// Bucket and object.
    pub s3: S3Entity,
}

/// The `s3` entity of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Entity {
    /// Notification configuration id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_id: Option<String>,
    /// Bucket the object lives in.
    pub bucket: BucketEntity,
    /// The object.
    pub object: ObjectEntity,
}

/// Bucket part of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketEntity {
    /// Bucket name.
    pub name: String,
    /// Bucket ARN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
}

/// Object part of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEntity {
    /// URL-form encoded key.
    pub key: String,
    /// Object size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Object ETag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
    /// Ordering token for events on the same key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequencer: Option<String>,
}

/// The bucket and decoded key a notification points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    /// Bucket name.
    pub bucket: String,
    /// Decoded object key.
    pub key: String,
}

impl S3EventNotification {
    /// Build an `ObjectCreated:Put` notification for one object.
    #[must_use]
    pub fn object_created(bucket: &str, key: &str, size: u64, region: &str) -> Self {
        Self {
            records: vec![EventRecord {
                event_version: Some("2.1".to_owned()),
                event_source: Some("aws:s3".to_owned()),
                aws_region: Some(region.to_owned()),
                event_time: Some(Utc::now()),
                event_name: Some("ObjectCreated:Put".to_owned()),
                s3: S3Entity {
                    configuration_id: None,
                    bucket: BucketEntity {
                        name: bucket.to_owned(),
                        arn: Some(format!("arn:aws:s3:::{bucket}")),
                    },
                    object: ObjectEntity {
                        key: encode_key(key),
                        size: Some(size),
                        e_tag: None,
                        sequencer: None,
                    },
                },
            }],
        }
    }

    /// Serialize to the JSON message body.
    #[must_use]
    pub fn to_body(&self) -> String {
        // Plain data with string keys; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Parse a queue message body into the object it announces.
///
/// Returns `Ok(None)` for documents without records.
///
/// # Errors
///
/// [`ProtocolError::MalformedNotification`] if the body is not a
/// notification, [`ProtocolError::TooManyRecords`] if it has more than one
/// record.
pub fn parse_notification(body: &str) -> Result<Option<ObjectRef>, ProtocolError> {
    let notification: S3EventNotification =
        serde_json::from_str(body).map_err(ProtocolError::MalformedNotification)?;

    match notification.records.as_slice() {
        [] => Ok(None),
        [record] => Ok(Some(ObjectRef {
            bucket: record.s3.bucket.name.clone(),
            key: decode_key(&record.s3.object.key).into_owned(),
        })),
        records => Err(ProtocolError::TooManyRecords(records.len())),
    }
}

/// Decode a key as it appears in a notification.
#[must_use]
pub fn decode_key(key: &str) -> Cow<'_, str> {
    if !key.contains(['+', '%']) {
        return Cow::Borrowed(key);
    }
    let spaced = key.replace('+', " ");
    Cow::Owned(percent_decode_str(&spaced).decode_utf8_lossy().into_owned())
}

/// Encode a key the way S3 writes it into notifications.
#[must_use]
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET)
        .to_string()
        .replace("%20", "+")
}
