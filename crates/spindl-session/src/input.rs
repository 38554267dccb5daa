//! Inputs accepted by the session machine.
//!
//! Everything that can influence a session funnels into [`SessionInput`]:
//! user commands, completions of backend calls, decoded broker events, and
//! transport-link loss. The host feeds these to the machine one at a time,
//! so ordering between sources is whatever the loop observed.

use spindl_api::PreparationStatus;
use spindl_core::pusher::BrokerEvent;
use spindl_core::{BackendError, TrackMetadata};

/// A user-initiated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Look up a track reference, discarding any previous attempt.
    StartLookup {
        /// Track page URL (or bare track id) to resolve.
        url: String,
    },
    /// Ask the backend to prepare the currently shown track.
    StartPreparation,
    /// Ask the backend to materialize the prepared track into a file.
    StartMaterialization,
    /// Open the finished download.
    Download,
    /// Re-read the server-wide queue depth.
    RefreshQueue,
}

/// One unit of input for [`crate::SessionMachine::apply`].
///
/// Backend completions carry the context they were issued for (the looked-up
/// URL, the track id), so the machine can discard responses that no longer
/// match the session instead of numbering requests.
#[derive(Debug, Clone)]
pub enum SessionInput {
    /// A user command.
    Command(Command),
    /// A track lookup finished.
    LookupDone {
        /// URL the lookup was issued for.
        url: String,
        /// Resolved metadata, or the failure to report.
        outcome: Result<TrackMetadata, BackendError>,
    },
    /// A preparation request finished.
    PreparationDone {
        /// Track the request was issued for.
        track_id: String,
        /// How the backend disposed of the request.
        outcome: Result<PreparationStatus, BackendError>,
    },
    /// A materialization request was acknowledged (or refused).
    MaterializationDone {
        /// Track the request was issued for.
        track_id: String,
        /// Acknowledgement only; progress arrives over the broker.
        outcome: Result<(), BackendError>,
    },
    /// A queue-depth refresh finished.
    QueueDepthDone {
        /// Current depth, or the failure to surface as a notice.
        outcome: Result<u32, BackendError>,
    },
    /// A decoded broker event arrived on the socket.
    Broker(BrokerEvent),
    /// The broker link dropped; the previous connection id is now dead.
    LinkLost {
        /// Close reason or transport error, for the log.
        reason: String,
    },
}

impl From<Command> for SessionInput {
    fn from(command: Command) -> Self {
        SessionInput::Command(command)
    }
}
