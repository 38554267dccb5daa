//! Broker wire protocol: Pusher-compatible envelopes and recognized events.
//!
//! Every inbound frame is a JSON envelope `{"event": s, "data": ...}` whose
//! `data` is either a JSON object or a JSON-encoded *string* (the broker
//! double-encodes some payloads); [`decode_frame`] normalizes both. Frames
//! that do not decode into a [`BrokerEvent`] are dropped here, at the
//! boundary, so downstream code only ever sees well-formed events.
//!
//! Decoding is tolerant where the event has a safe fallback (a missing error
//! message, a missing queue depth) and strict where it does not: a
//! `download-success` without a `path` is dropped, because a ready state
//! without a link is unrepresentable.

use serde::Deserialize;
use serde_json::{Value, json};

/// Connection handshake event emitted by the broker itself.
pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
/// Worker accepted the job and is warming up.
pub const DOWNLOAD_SLEEP: &str = "download-sleep";
/// Worker started fetching the file.
pub const BEGIN_DOWNLOAD: &str = "begin-download";
/// Worker failed the job.
pub const DOWNLOAD_ERROR: &str = "download-error";
/// Worker finished; payload carries the file path.
pub const DOWNLOAD_SUCCESS: &str = "download-success";
/// Server-wide queue depth changed.
pub const QUEUE_UPDATE: &str = "spotify-downloader-queue";
/// Outbound channel subscription request.
pub const SUBSCRIBE: &str = "pusher:subscribe";

/// Broadcast channel shared by every connected client.
pub const BROADCAST_CHANNEL: &str = "spotify-downloader";
/// Default application key: the `/app/<key>` path segment and the private
/// channel namespace.
pub const DEFAULT_APP_KEY: &str = "spotify-track-downloader";

/// A recognized broker event, decoded once at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// The broker assigned this connection an id; subscriptions can start.
    ConnectionEstablished {
        /// Broker-side connection identifier.
        socket_id: String,
    },
    /// The worker is preparing the track (short server-side delay).
    DownloadSleep,
    /// The worker started downloading the track.
    BeginDownload,
    /// The worker failed the job.
    DownloadError {
        /// Worker-provided failure description, when it sent one.
        message: Option<String>,
    },
    /// The worker finished and the file is available.
    DownloadSuccess {
        /// CDN path of the finished file.
        path: String,
    },
    /// Server-wide queue depth update.
    QueueUpdate {
        /// Number of jobs ahead in the queue.
        depth: u32,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ConnectionDetail {
    socket_id: String,
}

/// Job events nest their payload one level deeper: `{"data": {...}}`.
#[derive(Debug, Deserialize)]
struct JobPayload<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SuccessDetail {
    path: String,
}

#[derive(Debug, Deserialize)]
struct QueueDetail {
    #[serde(default)]
    queue: u32,
}

/// Decode one inbound text frame into a [`BrokerEvent`].
///
/// Returns `None` for anything that is not a recognized, well-formed event:
/// unparseable envelopes, unknown event names, and strict payloads that are
/// missing required fields. Dropped frames are traced, never errored.
#[must_use]
pub fn decode_frame(text: &str) -> Option<BrokerEvent> {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::trace!(error = %err, "dropping unparseable broker frame");
            return None;
        }
    };
    let payload = normalize_payload(envelope.data);

    match envelope.event.as_str() {
        CONNECTION_ESTABLISHED => match parse::<ConnectionDetail>(payload) {
            Some(detail) => Some(BrokerEvent::ConnectionEstablished {
                socket_id: detail.socket_id,
            }),
            None => {
                tracing::trace!("dropping connection_established without socket_id");
                None
            }
        },
        DOWNLOAD_SLEEP => Some(BrokerEvent::DownloadSleep),
        BEGIN_DOWNLOAD => Some(BrokerEvent::BeginDownload),
        DOWNLOAD_ERROR => Some(BrokerEvent::DownloadError {
            message: parse::<JobPayload<ErrorDetail>>(payload).and_then(|job| job.data.message),
        }),
        DOWNLOAD_SUCCESS => match parse::<JobPayload<SuccessDetail>>(payload) {
            Some(job) => Some(BrokerEvent::DownloadSuccess {
                path: job.data.path,
            }),
            None => {
                tracing::trace!("dropping download-success without a path");
                None
            }
        },
        QUEUE_UPDATE => Some(BrokerEvent::QueueUpdate {
            depth: parse::<JobPayload<QueueDetail>>(payload).map_or(0, |job| job.data.queue),
        }),
        other => {
            tracing::trace!(event = other, "dropping unrecognized broker event");
            None
        }
    }
}

/// Undo the broker's double encoding: a string payload is itself JSON.
fn normalize_payload(data: Option<Value>) -> Option<Value> {
    match data {
        Some(Value::String(inner)) => serde_json::from_str(&inner).ok(),
        other => other,
    }
}

fn parse<T: serde::de::DeserializeOwned>(payload: Option<Value>) -> Option<T> {
    payload.and_then(|value| serde_json::from_value(value).ok())
}

/// Build the outbound subscription frame for one channel.
#[must_use]
pub fn subscribe_frame(channel: &str) -> String {
    json!({
        "event": SUBSCRIBE,
        "data": { "channel": channel },
    })
    .to_string()
}

/// Name of the private per-connection channel.
#[must_use]
pub fn private_channel(app_key: &str, connection_id: &str) -> String {
    format!("channel.{app_key}.{connection_id}")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
