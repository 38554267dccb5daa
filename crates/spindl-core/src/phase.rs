//! Session lifecycle phases and the derived view projection.
//!
//! A session is always in exactly one [`Phase`]. Everything the view layer
//! used to track as independent booleans (result visible, queue badge,
//! progress strip, download button) is derived from the phase through
//! [`SessionFlags`], so contradictory combinations cannot be represented.

use serde::{Deserialize, Serialize};

/// Lifecycle phase of a download session.
///
/// The nominal forward path is `Idle → Searching → ResultShown →
/// RequestingPreparation → {Queued | PreparationReady} → Materializing →
/// Downloading → ReadyToDownload`. `Failed` is terminal and reachable from
/// any non-`Idle` phase; a new lookup resets out of it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No lookup has been issued (or the session was fully reset).
    #[default]
    Idle,
    /// A track lookup is in flight.
    Searching,
    /// Track metadata is on display; preparation can be requested.
    ResultShown,
    /// A preparation request is in flight.
    RequestingPreparation,
    /// The backend queued the job; a worker will pick it up.
    Queued,
    /// The backend is ready; materialization can be requested.
    PreparationReady,
    /// A materialization request was issued; waiting for the worker.
    Materializing,
    /// The worker reported download progress via push events.
    Downloading,
    /// A download link is available.
    ReadyToDownload,
    /// The attempt failed; only a new lookup leaves this phase.
    Failed,
}

impl Phase {
    /// Whether this phase is terminal (no further progress possible).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Failed
    }

    /// Whether worker progress events (`sleep`/`begin`) apply in this phase.
    #[must_use]
    pub fn awaits_worker(self) -> bool {
        matches!(self, Self::Queued | Self::Materializing)
    }

    /// Derive the view projection for this phase.
    #[must_use]
    pub fn flags(self) -> SessionFlags {
        SessionFlags {
            searching: self == Self::Searching,
            show_result: matches!(
                self,
                Self::ResultShown
                    | Self::RequestingPreparation
                    | Self::Queued
                    | Self::PreparationReady
                    | Self::Materializing
                    | Self::Downloading
                    | Self::ReadyToDownload
            ),
            show_request_button: matches!(self, Self::ResultShown | Self::RequestingPreparation),
            show_process_button: self == Self::PreparationReady,
            show_download_button: self == Self::ReadyToDownload,
            in_queue: self == Self::Queued,
            in_progress: matches!(self, Self::Materializing | Self::Downloading),
        }
    }
}

/// What a view should render for a given [`Phase`].
///
/// Pure projection, never stored: recompute it from the phase whenever a
/// snapshot is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionFlags {
    /// A lookup is in flight (spinner on the input form).
    pub searching: bool,
    /// Track metadata panel is visible.
    pub show_result: bool,
    /// "Request download" control is visible (spinner while requesting).
    pub show_request_button: bool,
    /// "Process download" control is visible.
    pub show_process_button: bool,
    /// Final download link is visible.
    pub show_download_button: bool,
    /// Queue badge is visible.
    pub in_queue: bool,
    /// Progress strip is visible.
    pub in_progress: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
