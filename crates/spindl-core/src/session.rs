//! Observable snapshot of one download session.

use serde::{Deserialize, Serialize};

use crate::phase::{Phase, SessionFlags};
use crate::track::TrackMetadata;

/// Everything an observer can know about a download session.
///
/// Owned and mutated by exactly one writer; observers only ever see cloned
/// snapshots. The phase is the single source of truth for what the session
/// is doing; the remaining fields carry the data that phase refers to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Current lifecycle phase.
    pub phase: Phase,
    /// Resolved track, present from a successful lookup onward.
    pub track: Option<TrackMetadata>,
    /// Broker-assigned socket id, present only while the link is up.
    pub connection_id: Option<String>,
    /// Last known queue depth.
    pub queue_position: u32,
    /// Final download link, present exactly in `ReadyToDownload`.
    pub download_url: Option<String>,
    /// Progress text pushed by the worker, shown while downloading.
    pub last_message: Option<String>,
}

impl Session {
    /// Identifier of the resolved track, if a lookup has succeeded.
    #[must_use]
    pub fn track_id(&self) -> Option<&str> {
        self.track.as_ref().map(|t| t.id.as_str())
    }

    /// View projection for the current phase.
    #[must_use]
    pub fn flags(&self) -> SessionFlags {
        self.phase.flags()
    }

    /// Reset for a fresh lookup.
    ///
    /// Clears every field except `connection_id`: the broker link belongs to
    /// the transport, not to any one download attempt.
    pub fn reset_preserving_link(&mut self) {
        let connection_id = self.connection_id.take();
        *self = Self {
            connection_id,
            ..Self::default()
        };
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
