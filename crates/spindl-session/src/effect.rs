//! Side effects requested by the session machine.
//!
//! The machine never performs I/O. Each [`crate::SessionMachine::apply`]
//! call returns the effects the host must execute: backend calls to spawn,
//! channel subscriptions to issue, notices and downloads to surface.

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Progress worth celebrating.
    Success,
    /// Something went wrong; the session may or may not have failed.
    Error,
}

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Display severity.
    pub level: NoticeLevel,
    /// Ready-to-display text.
    pub message: String,
}

impl Notice {
    /// A success notice.
    pub fn success(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Success, message: message.into() }
    }

    /// An error notice.
    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, message: message.into() }
    }
}

/// An action the host must carry out on behalf of the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Fetch the server-wide queue depth.
    FetchQueueDepth,
    /// Resolve track metadata for a URL.
    FetchTrackInfo {
        /// URL to resolve; echoed back in the completion input.
        url: String,
    },
    /// Ask the backend to prepare a track.
    RequestPreparation {
        /// Track to prepare.
        track_id: String,
        /// Broker connection id to register for job events, if linked.
        connection_id: Option<String>,
    },
    /// Ask the backend to materialize a prepared track.
    RequestMaterialization {
        /// Track to materialize.
        track_id: String,
        /// Broker connection id to register for job events, if linked.
        connection_id: Option<String>,
    },
    /// Subscribe the socket to this session's broker channels.
    Subscribe {
        /// Connection id assigned by the broker handshake.
        connection_id: String,
    },
    /// Surface a notification to the user.
    Notify(Notice),
    /// Hand the finished file URL to the user, rewritten for attachment
    /// delivery.
    OpenDownload {
        /// Direct download URL.
        url: String,
    },
}
