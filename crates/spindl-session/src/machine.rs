//! The download-session state machine.
//!
//! [`SessionMachine::apply`] is the only place session state changes. It is
//! pure and infallible: no I/O, no locking, no returned errors. Inputs that
//! no longer match the session (stale completions, out-of-phase events) are
//! dropped with a trace; failures worth showing become notice effects and a
//! `Failed` phase; everything the host must do comes back as an [`Effect`].
//!
//! Staleness is decided by identity, not sequence numbers: a lookup
//! completion must match the URL currently in flight, and a preparation or
//! materialization completion must match the resolved track id. Broker
//! events other than the handshake are dropped while no connection id is
//! known, which covers the window between link loss and re-subscription.

use tracing::{debug, trace, warn};

use spindl_api::PreparationStatus;
use spindl_core::pusher::BrokerEvent;
use spindl_core::url::force_attachment;
use spindl_core::{BackendError, Phase, Session, TrackMetadata};

use crate::effect::{Effect, Notice};
use crate::input::{Command, SessionInput};

// User-facing texts. The fallbacks apply when the backend failed without
// words of its own.
const EMPTY_URL_NOTICE: &str = "Field track url cannot be empty";
const LOAD_FALLBACK: &str = "Cannot load data.";
const PREPARATION_FALLBACK: &str = "Request download failed.";
const MATERIALIZATION_FALLBACK: &str = "Process download failed.";
const WORKER_FALLBACK: &str = "Failed to download your track";
const MISSING_LINK_NOTICE: &str = "Cannot get download URL.";
const SLEEP_NOTICE: &str = "Our server preparing your track for download.";
const SLEEP_PROGRESS: &str = "Please wait 10 seconds before our server download your track.";
const BEGIN_NOTICE: &str = "Your track starts downloading.";
const BEGIN_PROGRESS: &str = "Downloading your track";
const SUCCESS_NOTICE: &str = "Your file is ready to download!";

/// Pure reducer for one download session.
#[derive(Debug, Default)]
pub struct SessionMachine {
    session: Session,
    /// URL of the lookup currently in flight; completions for any other URL
    /// are stale.
    pending_lookup: Option<String>,
}

impl SessionMachine {
    /// A fresh machine in `Idle` with no broker link.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot. Observers clone this; the machine keeps ownership.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Advance the session by one input, returning the effects to execute.
    pub fn apply(&mut self, input: SessionInput) -> Vec<Effect> {
        match input {
            SessionInput::Command(command) => self.on_command(command),
            SessionInput::LookupDone { url, outcome } => self.on_lookup_done(&url, outcome),
            SessionInput::PreparationDone { track_id, outcome } => {
                self.on_preparation_done(&track_id, outcome)
            }
            SessionInput::MaterializationDone { track_id, outcome } => {
                self.on_materialization_done(&track_id, outcome)
            }
            SessionInput::QueueDepthDone { outcome } => self.on_queue_depth_done(outcome),
            SessionInput::Broker(event) => self.on_broker(event),
            SessionInput::LinkLost { reason } => self.on_link_lost(&reason),
        }
    }

    // ── commands ──

    fn on_command(&mut self, command: Command) -> Vec<Effect> {
        match command {
            Command::StartLookup { url } => {
                if url.trim().is_empty() {
                    return vec![Effect::Notify(Notice::error(EMPTY_URL_NOTICE))];
                }
                self.session.reset_preserving_link();
                self.session.phase = Phase::Searching;
                self.pending_lookup = Some(url.clone());
                debug!(url, "starting track lookup");
                vec![Effect::FetchTrackInfo { url }]
            }
            Command::StartPreparation => {
                if self.session.phase != Phase::ResultShown {
                    trace!(phase = ?self.session.phase, "ignoring preparation command");
                    return Vec::new();
                }
                let Some(track_id) = self.session.track_id().map(str::to_owned) else {
                    trace!("ignoring preparation command without a resolved track");
                    return Vec::new();
                };
                self.session.phase = Phase::RequestingPreparation;
                debug!(track_id, "requesting preparation");
                vec![Effect::RequestPreparation {
                    track_id,
                    connection_id: self.session.connection_id.clone(),
                }]
            }
            Command::StartMaterialization => {
                if self.session.phase != Phase::PreparationReady {
                    trace!(phase = ?self.session.phase, "ignoring materialization command");
                    return Vec::new();
                }
                let Some(track_id) = self.session.track_id().map(str::to_owned) else {
                    trace!("ignoring materialization command without a resolved track");
                    return Vec::new();
                };
                self.session.phase = Phase::Materializing;
                debug!(track_id, "requesting materialization");
                vec![Effect::RequestMaterialization {
                    track_id,
                    connection_id: self.session.connection_id.clone(),
                }]
            }
            Command::Download => match self.session.download_url.as_deref() {
                Some(url) => vec![Effect::OpenDownload {
                    url: force_attachment(url),
                }],
                None => vec![Effect::Notify(Notice::error(MISSING_LINK_NOTICE))],
            },
            Command::RefreshQueue => vec![Effect::FetchQueueDepth],
        }
    }

    // ── backend completions ──

    fn on_lookup_done(
        &mut self,
        url: &str,
        outcome: Result<TrackMetadata, BackendError>,
    ) -> Vec<Effect> {
        if self.session.phase != Phase::Searching || self.pending_lookup.as_deref() != Some(url) {
            trace!(url, phase = ?self.session.phase, "dropping stale lookup completion");
            return Vec::new();
        }
        self.pending_lookup = None;

        match outcome {
            Ok(track) => {
                debug!(track_id = track.id, "lookup resolved");
                self.session.track = Some(track);
                self.session.phase = Phase::ResultShown;
                Vec::new()
            }
            Err(err) => {
                warn!(error = %err, kind = err.kind(), "lookup failed");
                self.fail(err.display(LOAD_FALLBACK))
            }
        }
    }

    fn on_preparation_done(
        &mut self,
        track_id: &str,
        outcome: Result<PreparationStatus, BackendError>,
    ) -> Vec<Effect> {
        if self.session.phase != Phase::RequestingPreparation
            || self.session.track_id() != Some(track_id)
        {
            trace!(track_id, phase = ?self.session.phase, "dropping stale preparation completion");
            return Vec::new();
        }

        match outcome {
            Ok(PreparationStatus::Ready) => {
                debug!(track_id, "preparation ready");
                self.session.phase = Phase::PreparationReady;
                Vec::new()
            }
            Ok(PreparationStatus::Queued { depth }) => {
                debug!(track_id, depth, "preparation queued");
                self.session.phase = Phase::Queued;
                self.session.queue_position = depth;
                Vec::new()
            }
            Ok(PreparationStatus::Exists { url }) => {
                debug!(track_id, "file already materialized");
                self.session.phase = Phase::ReadyToDownload;
                self.session.download_url = Some(url);
                Vec::new()
            }
            Err(err) => {
                warn!(error = %err, kind = err.kind(), track_id, "preparation failed");
                self.fail(err.display(PREPARATION_FALLBACK))
            }
        }
    }

    fn on_materialization_done(
        &mut self,
        track_id: &str,
        outcome: Result<(), BackendError>,
    ) -> Vec<Effect> {
        if self.session.phase != Phase::Materializing || self.session.track_id() != Some(track_id) {
            trace!(track_id, phase = ?self.session.phase, "dropping stale materialization completion");
            return Vec::new();
        }

        match outcome {
            // Acknowledgement only: progress arrives over the broker.
            Ok(()) => {
                debug!(track_id, "materialization accepted");
                Vec::new()
            }
            Err(err) => {
                warn!(error = %err, kind = err.kind(), track_id, "materialization failed");
                self.fail(err.display(MATERIALIZATION_FALLBACK))
            }
        }
    }

    fn on_queue_depth_done(&mut self, outcome: Result<u32, BackendError>) -> Vec<Effect> {
        match outcome {
            Ok(depth) => {
                if !self.session.phase.is_terminal() {
                    self.session.queue_position = depth;
                }
                Vec::new()
            }
            // The queue badge is informational; a failed refresh never fails
            // the session.
            Err(err) => {
                warn!(error = %err, kind = err.kind(), "queue refresh failed");
                vec![Effect::Notify(Notice::error(err.display(LOAD_FALLBACK)))]
            }
        }
    }

    // ── broker events ──

    fn on_broker(&mut self, event: BrokerEvent) -> Vec<Effect> {
        if let BrokerEvent::ConnectionEstablished { socket_id } = event {
            debug!(connection_id = socket_id, "broker link established");
            self.session.connection_id = Some(socket_id.clone());
            return vec![Effect::Subscribe {
                connection_id: socket_id,
            }];
        }

        // Between link loss and the next handshake no job event can be meant
        // for this session.
        if self.session.connection_id.is_none() {
            trace!(?event, "dropping broker event without a live connection");
            return Vec::new();
        }

        match event {
            // Handled above; listed only for exhaustiveness.
            BrokerEvent::ConnectionEstablished { .. } => Vec::new(),
            BrokerEvent::DownloadSleep => {
                self.on_worker_progress(SLEEP_NOTICE, SLEEP_PROGRESS, "worker sleeping")
            }
            BrokerEvent::BeginDownload => {
                self.on_worker_progress(BEGIN_NOTICE, BEGIN_PROGRESS, "worker downloading")
            }
            BrokerEvent::DownloadError { message } => {
                if self.session.phase == Phase::Idle || self.session.phase.is_terminal() {
                    trace!(phase = ?self.session.phase, "ignoring worker error outside an attempt");
                    return Vec::new();
                }
                let message = message.unwrap_or_else(|| WORKER_FALLBACK.to_string());
                warn!(message, "worker reported failure");
                self.fail(message)
            }
            BrokerEvent::DownloadSuccess { path } => {
                if self.session.phase.is_terminal() {
                    trace!("ignoring worker success after failure");
                    return Vec::new();
                }
                // Redelivery of the same completion must not re-notify.
                if self.session.phase == Phase::ReadyToDownload
                    && self.session.download_url.as_deref() == Some(path.as_str())
                {
                    trace!("ignoring redelivered worker success");
                    return Vec::new();
                }
                debug!(path, "worker finished");
                self.session.phase = Phase::ReadyToDownload;
                self.session.download_url = Some(path);
                self.session.last_message = None;
                vec![Effect::Notify(Notice::success(SUCCESS_NOTICE))]
            }
            BrokerEvent::QueueUpdate { depth } => {
                if self.session.phase == Phase::Queued {
                    self.session.queue_position = depth;
                } else {
                    trace!(depth, phase = ?self.session.phase, "dropping queue update");
                }
                Vec::new()
            }
        }
    }

    /// `sleep` and `begin` both mean the worker owns the job now. They apply
    /// while queued or materializing, and again while already downloading so
    /// the `sleep`-then-`begin` sequence refreshes the progress text.
    fn on_worker_progress(&mut self, notice: &str, progress: &str, what: &str) -> Vec<Effect> {
        let phase = self.session.phase;
        if !phase.awaits_worker() && phase != Phase::Downloading {
            trace!(?phase, what, "dropping worker progress event");
            return Vec::new();
        }
        debug!(what, "worker progress");
        self.session.phase = Phase::Downloading;
        self.session.last_message = Some(progress.to_string());
        vec![Effect::Notify(Notice::success(notice))]
    }

    // ── link ──

    fn on_link_lost(&mut self, reason: &str) -> Vec<Effect> {
        warn!(reason, "broker link lost");
        self.session.connection_id = None;
        Vec::new()
    }

    /// Shared failure path: terminal phase, no download link, no stale
    /// progress text, one error notice.
    fn fail(&mut self, message: String) -> Vec<Effect> {
        self.session.phase = Phase::Failed;
        self.session.download_url = None;
        self.session.last_message = None;
        vec![Effect::Notify(Notice::error(message))]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::effect::NoticeLevel;

    use super::*;

    const TRACK_URL: &str = "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC";

    fn track(id: &str) -> TrackMetadata {
        serde_json::from_value(serde_json::json!({ "id": id, "audio_name": "Song" })).unwrap()
    }

    fn established(machine: &mut SessionMachine, socket_id: &str) {
        let effects = machine.apply(SessionInput::Broker(BrokerEvent::ConnectionEstablished {
            socket_id: socket_id.into(),
        }));
        assert_matches!(effects.as_slice(), [Effect::Subscribe { .. }]);
    }

    fn to_result_shown(machine: &mut SessionMachine, track_id: &str) {
        let effects = machine.apply(SessionInput::Command(Command::StartLookup {
            url: TRACK_URL.into(),
        }));
        assert_matches!(effects.as_slice(), [Effect::FetchTrackInfo { .. }]);
        let effects = machine.apply(SessionInput::LookupDone {
            url: TRACK_URL.into(),
            outcome: Ok(track(track_id)),
        });
        assert!(effects.is_empty());
        assert_eq!(machine.session().phase, Phase::ResultShown);
    }

    fn to_queued(machine: &mut SessionMachine, track_id: &str, depth: u32) {
        to_result_shown(machine, track_id);
        let effects = machine.apply(SessionInput::Command(Command::StartPreparation));
        assert_matches!(effects.as_slice(), [Effect::RequestPreparation { .. }]);
        let effects = machine.apply(SessionInput::PreparationDone {
            track_id: track_id.into(),
            outcome: Ok(PreparationStatus::Queued { depth }),
        });
        assert!(effects.is_empty());
        assert_eq!(machine.session().phase, Phase::Queued);
    }

    fn to_materializing(machine: &mut SessionMachine, track_id: &str) {
        to_result_shown(machine, track_id);
        let _ = machine.apply(SessionInput::Command(Command::StartPreparation));
        let _ = machine.apply(SessionInput::PreparationDone {
            track_id: track_id.into(),
            outcome: Ok(PreparationStatus::Ready),
        });
        let effects = machine.apply(SessionInput::Command(Command::StartMaterialization));
        assert_matches!(effects.as_slice(), [Effect::RequestMaterialization { .. }]);
        assert_eq!(machine.session().phase, Phase::Materializing);
    }

    fn error_notice(effects: &[Effect]) -> &Notice {
        match effects {
            [Effect::Notify(notice)] => {
                assert_eq!(notice.level, NoticeLevel::Error);
                notice
            }
            other => panic!("expected a single error notice, got {other:?}"),
        }
    }

    // ── lookup ──

    #[test]
    fn blank_lookup_is_rejected_without_a_transition() {
        let mut machine = SessionMachine::new();
        for url in ["", "   ", "\t"] {
            let effects = machine.apply(SessionInput::Command(Command::StartLookup {
                url: url.into(),
            }));
            assert_eq!(error_notice(&effects).message, EMPTY_URL_NOTICE);
            assert_eq!(machine.session().phase, Phase::Idle);
        }
    }

    #[test]
    fn lookup_enters_searching_and_fetches() {
        let mut machine = SessionMachine::new();
        let effects = machine.apply(SessionInput::Command(Command::StartLookup {
            url: TRACK_URL.into(),
        }));
        assert_eq!(
            effects,
            vec![Effect::FetchTrackInfo {
                url: TRACK_URL.into()
            }]
        );
        assert_eq!(machine.session().phase, Phase::Searching);
        assert!(machine.session().flags().searching);
    }

    #[test]
    fn lookup_success_shows_the_result() {
        let mut machine = SessionMachine::new();
        to_result_shown(&mut machine, "t1");
        assert_eq!(machine.session().track_id(), Some("t1"));
        assert!(machine.session().flags().show_request_button);
    }

    #[test]
    fn lookup_failure_fails_with_the_backend_message() {
        let mut machine = SessionMachine::new();
        let _ = machine.apply(SessionInput::Command(Command::StartLookup {
            url: TRACK_URL.into(),
        }));
        let effects = machine.apply(SessionInput::LookupDone {
            url: TRACK_URL.into(),
            outcome: Err(BackendError::from_status(422, r#"{"message": "Track not found."}"#)),
        });
        assert_eq!(error_notice(&effects).message, "Track not found.");
        assert_eq!(machine.session().phase, Phase::Failed);
    }

    #[test]
    fn lookup_failure_falls_back_to_the_generic_message() {
        let mut machine = SessionMachine::new();
        let _ = machine.apply(SessionInput::Command(Command::StartLookup {
            url: TRACK_URL.into(),
        }));
        let effects = machine.apply(SessionInput::LookupDone {
            url: TRACK_URL.into(),
            outcome: Err(BackendError::Network("connection refused".into())),
        });
        assert_eq!(error_notice(&effects).message, LOAD_FALLBACK);
    }

    #[test]
    fn stale_lookup_completion_is_discarded() {
        let mut machine = SessionMachine::new();
        let _ = machine.apply(SessionInput::Command(Command::StartLookup {
            url: "https://example.com/a".into(),
        }));
        let _ = machine.apply(SessionInput::Command(Command::StartLookup {
            url: "https://example.com/b".into(),
        }));

        // The first lookup resolves after the second superseded it.
        let effects = machine.apply(SessionInput::LookupDone {
            url: "https://example.com/a".into(),
            outcome: Ok(track("stale")),
        });
        assert!(effects.is_empty());
        assert_eq!(machine.session().phase, Phase::Searching);
        assert!(machine.session().track.is_none());

        let _ = machine.apply(SessionInput::LookupDone {
            url: "https://example.com/b".into(),
            outcome: Ok(track("fresh")),
        });
        assert_eq!(machine.session().track_id(), Some("fresh"));
    }

    #[test]
    fn duplicate_lookup_completion_is_discarded() {
        let mut machine = SessionMachine::new();
        to_result_shown(&mut machine, "t1");
        let effects = machine.apply(SessionInput::LookupDone {
            url: TRACK_URL.into(),
            outcome: Ok(track("t2")),
        });
        assert!(effects.is_empty());
        assert_eq!(machine.session().track_id(), Some("t1"));
    }

    #[test]
    fn new_lookup_resets_the_attempt_but_keeps_the_link() {
        let mut machine = SessionMachine::new();
        established(&mut machine, "9.1");
        to_queued(&mut machine, "t1", 5);

        let _ = machine.apply(SessionInput::Command(Command::StartLookup {
            url: "https://example.com/next".into(),
        }));
        let session = machine.session();
        assert_eq!(session.phase, Phase::Searching);
        assert!(session.track.is_none());
        assert_eq!(session.queue_position, 0);
        assert_eq!(session.connection_id.as_deref(), Some("9.1"));
    }

    // ── preparation ──

    #[test]
    fn preparation_requires_a_shown_result() {
        let mut machine = SessionMachine::new();
        let effects = machine.apply(SessionInput::Command(Command::StartPreparation));
        assert!(effects.is_empty());
        assert_eq!(machine.session().phase, Phase::Idle);
    }

    #[test]
    fn preparation_carries_the_connection_id_when_linked() {
        let mut machine = SessionMachine::new();
        established(&mut machine, "217.9112");
        to_result_shown(&mut machine, "t1");

        let effects = machine.apply(SessionInput::Command(Command::StartPreparation));
        assert_eq!(
            effects,
            vec![Effect::RequestPreparation {
                track_id: "t1".into(),
                connection_id: Some("217.9112".into()),
            }]
        );
        assert_eq!(machine.session().phase, Phase::RequestingPreparation);
    }

    #[test]
    fn preparation_without_a_link_sends_none() {
        let mut machine = SessionMachine::new();
        to_result_shown(&mut machine, "t1");
        let effects = machine.apply(SessionInput::Command(Command::StartPreparation));
        assert_matches!(
            effects.as_slice(),
            [Effect::RequestPreparation {
                connection_id: None,
                ..
            }]
        );
    }

    #[test]
    fn preparation_ready_enables_materialization() {
        let mut machine = SessionMachine::new();
        to_result_shown(&mut machine, "t1");
        let _ = machine.apply(SessionInput::Command(Command::StartPreparation));
        let effects = machine.apply(SessionInput::PreparationDone {
            track_id: "t1".into(),
            outcome: Ok(PreparationStatus::Ready),
        });
        assert!(effects.is_empty());
        assert_eq!(machine.session().phase, Phase::PreparationReady);
        assert!(machine.session().flags().show_process_button);
    }

    #[test]
    fn preparation_queued_records_the_depth() {
        let mut machine = SessionMachine::new();
        to_queued(&mut machine, "t1", 5);
        assert_eq!(machine.session().queue_position, 5);
        assert!(machine.session().flags().in_queue);
    }

    #[test]
    fn preparation_exists_goes_straight_to_ready() {
        let mut machine = SessionMachine::new();
        to_result_shown(&mut machine, "t1");
        let _ = machine.apply(SessionInput::Command(Command::StartPreparation));
        let effects = machine.apply(SessionInput::PreparationDone {
            track_id: "t1".into(),
            outcome: Ok(PreparationStatus::Exists {
                url: "https://cdn.example.com/upload/v1/track.mp3".into(),
            }),
        });
        assert!(effects.is_empty());
        assert_eq!(machine.session().phase, Phase::ReadyToDownload);
        assert_eq!(
            machine.session().download_url.as_deref(),
            Some("https://cdn.example.com/upload/v1/track.mp3")
        );
    }

    #[test]
    fn preparation_failure_fails_the_session() {
        let mut machine = SessionMachine::new();
        to_result_shown(&mut machine, "t1");
        let _ = machine.apply(SessionInput::Command(Command::StartPreparation));
        let effects = machine.apply(SessionInput::PreparationDone {
            track_id: "t1".into(),
            outcome: Err(BackendError::Network("timed out".into())),
        });
        assert_eq!(error_notice(&effects).message, PREPARATION_FALLBACK);
        assert_eq!(machine.session().phase, Phase::Failed);
    }

    #[test]
    fn preparation_completion_for_another_track_is_discarded() {
        let mut machine = SessionMachine::new();
        to_result_shown(&mut machine, "t1");
        let _ = machine.apply(SessionInput::Command(Command::StartPreparation));
        let effects = machine.apply(SessionInput::PreparationDone {
            track_id: "t2".into(),
            outcome: Ok(PreparationStatus::Ready),
        });
        assert!(effects.is_empty());
        assert_eq!(machine.session().phase, Phase::RequestingPreparation);
    }

    // ── materialization ──

    #[test]
    fn materialization_only_starts_from_preparation_ready() {
        let mut machine = SessionMachine::new();
        to_result_shown(&mut machine, "t1");
        let effects = machine.apply(SessionInput::Command(Command::StartMaterialization));
        assert!(effects.is_empty());
        assert_eq!(machine.session().phase, Phase::ResultShown);
    }

    #[test]
    fn materialization_ack_keeps_the_phase() {
        let mut machine = SessionMachine::new();
        to_materializing(&mut machine, "t1");
        let effects = machine.apply(SessionInput::MaterializationDone {
            track_id: "t1".into(),
            outcome: Ok(()),
        });
        assert!(effects.is_empty());
        assert_eq!(machine.session().phase, Phase::Materializing);
    }

    #[test]
    fn materialization_failure_fails_the_session() {
        let mut machine = SessionMachine::new();
        to_materializing(&mut machine, "t1");
        let effects = machine.apply(SessionInput::MaterializationDone {
            track_id: "t1".into(),
            outcome: Err(BackendError::from_status(500, "")),
        });
        assert_eq!(error_notice(&effects).message, MATERIALIZATION_FALLBACK);
        assert_eq!(machine.session().phase, Phase::Failed);
    }

    // ── queue depth ──

    #[test]
    fn refresh_queue_issues_a_fetch_from_any_phase() {
        let mut machine = SessionMachine::new();
        let effects = machine.apply(SessionInput::Command(Command::RefreshQueue));
        assert_eq!(effects, vec![Effect::FetchQueueDepth]);
        assert_eq!(machine.session().phase, Phase::Idle);
    }

    #[test]
    fn queue_depth_updates_the_position() {
        let mut machine = SessionMachine::new();
        let effects = machine.apply(SessionInput::QueueDepthDone { outcome: Ok(12) });
        assert!(effects.is_empty());
        assert_eq!(machine.session().queue_position, 12);
    }

    #[test]
    fn queue_depth_failure_notifies_without_failing() {
        let mut machine = SessionMachine::new();
        to_result_shown(&mut machine, "t1");
        let effects = machine.apply(SessionInput::QueueDepthDone {
            outcome: Err(BackendError::Network("dns".into())),
        });
        assert_eq!(error_notice(&effects).message, LOAD_FALLBACK);
        assert_eq!(machine.session().phase, Phase::ResultShown);
    }

    // ── broker link ──

    #[test]
    fn handshake_stores_the_id_and_subscribes() {
        let mut machine = SessionMachine::new();
        let effects = machine.apply(SessionInput::Broker(BrokerEvent::ConnectionEstablished {
            socket_id: "217.9112".into(),
        }));
        assert_eq!(
            effects,
            vec![Effect::Subscribe {
                connection_id: "217.9112".into()
            }]
        );
        assert_eq!(machine.session().connection_id.as_deref(), Some("217.9112"));
    }

    #[test]
    fn job_events_are_dropped_without_a_connection() {
        let mut machine = SessionMachine::new();
        to_queued(&mut machine, "t1", 3);

        // No handshake has happened, so nothing on the channel is ours.
        for event in [
            BrokerEvent::DownloadSleep,
            BrokerEvent::BeginDownload,
            BrokerEvent::DownloadError { message: None },
            BrokerEvent::DownloadSuccess { path: "p".into() },
            BrokerEvent::QueueUpdate { depth: 9 },
        ] {
            let effects = machine.apply(SessionInput::Broker(event));
            assert!(effects.is_empty());
        }
        assert_eq!(machine.session().phase, Phase::Queued);
        assert_eq!(machine.session().queue_position, 3);
    }

    #[test]
    fn link_loss_clears_the_id_and_keeps_the_phase() {
        let mut machine = SessionMachine::new();
        established(&mut machine, "9.1");
        to_queued(&mut machine, "t1", 2);

        let effects = machine.apply(SessionInput::LinkLost {
            reason: "connection reset".into(),
        });
        assert!(effects.is_empty());
        assert!(machine.session().connection_id.is_none());
        assert_eq!(machine.session().phase, Phase::Queued);

        // A fresh handshake resubscribes with the new id.
        established(&mut machine, "11.4");
        assert_eq!(machine.session().connection_id.as_deref(), Some("11.4"));
    }

    // ── worker events ──

    #[test]
    fn sleep_moves_a_queued_job_to_downloading() {
        let mut machine = SessionMachine::new();
        established(&mut machine, "9.1");
        to_queued(&mut machine, "t1", 1);

        let effects = machine.apply(SessionInput::Broker(BrokerEvent::DownloadSleep));
        assert_matches!(
            effects.as_slice(),
            [Effect::Notify(Notice {
                level: NoticeLevel::Success,
                ..
            })]
        );
        assert_eq!(machine.session().phase, Phase::Downloading);
        assert_eq!(machine.session().last_message.as_deref(), Some(SLEEP_PROGRESS));
    }

    #[test]
    fn begin_refreshes_the_progress_text_after_sleep() {
        let mut machine = SessionMachine::new();
        established(&mut machine, "9.1");
        to_materializing(&mut machine, "t1");

        let _ = machine.apply(SessionInput::Broker(BrokerEvent::DownloadSleep));
        let effects = machine.apply(SessionInput::Broker(BrokerEvent::BeginDownload));
        assert_matches!(effects.as_slice(), [Effect::Notify(_)]);
        assert_eq!(machine.session().phase, Phase::Downloading);
        assert_eq!(machine.session().last_message.as_deref(), Some(BEGIN_PROGRESS));
    }

    #[test]
    fn progress_events_are_dropped_before_the_worker_owns_the_job() {
        let mut machine = SessionMachine::new();
        established(&mut machine, "9.1");
        to_result_shown(&mut machine, "t1");

        let effects = machine.apply(SessionInput::Broker(BrokerEvent::DownloadSleep));
        assert!(effects.is_empty());
        assert_eq!(machine.session().phase, Phase::ResultShown);
        assert!(machine.session().last_message.is_none());
    }

    #[test]
    fn worker_error_fails_and_clears_the_link() {
        let mut machine = SessionMachine::new();
        established(&mut machine, "9.1");
        to_materializing(&mut machine, "t1");
        let _ = machine.apply(SessionInput::Broker(BrokerEvent::DownloadSleep));

        let effects = machine.apply(SessionInput::Broker(BrokerEvent::DownloadError {
            message: Some("Track is region locked".into()),
        }));
        assert_eq!(error_notice(&effects).message, "Track is region locked");
        let session = machine.session();
        assert_eq!(session.phase, Phase::Failed);
        assert!(session.download_url.is_none());
        assert!(session.last_message.is_none());
    }

    #[test]
    fn worker_error_without_a_message_uses_the_fallback() {
        let mut machine = SessionMachine::new();
        established(&mut machine, "9.1");
        to_queued(&mut machine, "t1", 1);

        let effects =
            machine.apply(SessionInput::Broker(BrokerEvent::DownloadError { message: None }));
        assert_eq!(error_notice(&effects).message, WORKER_FALLBACK);
    }

    #[test]
    fn worker_error_is_ignored_while_idle_or_failed() {
        let mut machine = SessionMachine::new();
        established(&mut machine, "9.1");

        let effects =
            machine.apply(SessionInput::Broker(BrokerEvent::DownloadError { message: None }));
        assert!(effects.is_empty());
        assert_eq!(machine.session().phase, Phase::Idle);

        to_queued(&mut machine, "t1", 1);
        let _ = machine.apply(SessionInput::Broker(BrokerEvent::DownloadError { message: None }));
        assert_eq!(machine.session().phase, Phase::Failed);

        // A second failure event has nothing left to fail.
        let effects =
            machine.apply(SessionInput::Broker(BrokerEvent::DownloadError { message: None }));
        assert!(effects.is_empty());
    }

    #[test]
    fn worker_success_makes_the_file_available() {
        let mut machine = SessionMachine::new();
        established(&mut machine, "9.1");
        to_materializing(&mut machine, "t1");
        let _ = machine.apply(SessionInput::Broker(BrokerEvent::BeginDownload));

        let effects = machine.apply(SessionInput::Broker(BrokerEvent::DownloadSuccess {
            path: "https://cdn.example.com/upload/v1/track.mp3".into(),
        }));
        assert_matches!(
            effects.as_slice(),
            [Effect::Notify(Notice {
                level: NoticeLevel::Success,
                ..
            })]
        );
        let session = machine.session();
        assert_eq!(session.phase, Phase::ReadyToDownload);
        assert_eq!(
            session.download_url.as_deref(),
            Some("https://cdn.example.com/upload/v1/track.mp3")
        );
        assert!(session.last_message.is_none());
        assert!(session.flags().show_download_button);
    }

    #[test]
    fn redelivered_success_is_a_no_op() {
        let mut machine = SessionMachine::new();
        established(&mut machine, "9.1");
        to_queued(&mut machine, "t1", 1);
        let success = BrokerEvent::DownloadSuccess {
            path: "https://cdn.example.com/upload/v1/track.mp3".into(),
        };

        let first = machine.apply(SessionInput::Broker(success.clone()));
        assert_eq!(first.len(), 1);
        let snapshot = machine.session().clone();

        let second = machine.apply(SessionInput::Broker(success));
        assert!(second.is_empty());
        assert_eq!(machine.session(), &snapshot);
    }

    #[test]
    fn success_with_a_new_path_replaces_the_link() {
        let mut machine = SessionMachine::new();
        established(&mut machine, "9.1");
        to_queued(&mut machine, "t1", 1);
        let _ = machine.apply(SessionInput::Broker(BrokerEvent::DownloadSuccess {
            path: "https://cdn.example.com/upload/v1/a.mp3".into(),
        }));

        let effects = machine.apply(SessionInput::Broker(BrokerEvent::DownloadSuccess {
            path: "https://cdn.example.com/upload/v2/a.mp3".into(),
        }));
        assert_eq!(effects.len(), 1);
        assert_eq!(
            machine.session().download_url.as_deref(),
            Some("https://cdn.example.com/upload/v2/a.mp3")
        );
    }

    #[test]
    fn queue_update_applies_only_while_queued() {
        let mut machine = SessionMachine::new();
        established(&mut machine, "9.1");
        to_queued(&mut machine, "t1", 6);

        let _ = machine.apply(SessionInput::Broker(BrokerEvent::QueueUpdate { depth: 2 }));
        assert_eq!(machine.session().queue_position, 2);

        let _ = machine.apply(SessionInput::Broker(BrokerEvent::DownloadSleep));
        let _ = machine.apply(SessionInput::Broker(BrokerEvent::QueueUpdate { depth: 40 }));
        assert_eq!(machine.session().queue_position, 2);
    }

    // ── download ──

    #[test]
    fn download_rewrites_the_url_for_attachment_delivery() {
        let mut machine = SessionMachine::new();
        established(&mut machine, "9.1");
        to_queued(&mut machine, "t1", 1);
        let _ = machine.apply(SessionInput::Broker(BrokerEvent::DownloadSuccess {
            path: "https://cdn.example.com/upload/v1/track.mp3".into(),
        }));

        let effects = machine.apply(SessionInput::Command(Command::Download));
        assert_eq!(
            effects,
            vec![Effect::OpenDownload {
                url: "https://cdn.example.com/upload/fl_attachment/v1/track.mp3".into()
            }]
        );
        // Opening the file is not a transition.
        assert_eq!(machine.session().phase, Phase::ReadyToDownload);
    }

    #[test]
    fn download_without_a_link_reports_the_missing_url() {
        let mut machine = SessionMachine::new();
        let effects = machine.apply(SessionInput::Command(Command::Download));
        assert_eq!(error_notice(&effects).message, MISSING_LINK_NOTICE);
    }

    // ── recovery ──

    #[test]
    fn a_failed_session_recovers_through_a_new_lookup() {
        let mut machine = SessionMachine::new();
        established(&mut machine, "9.1");
        to_queued(&mut machine, "t1", 1);
        let _ = machine.apply(SessionInput::Broker(BrokerEvent::DownloadError { message: None }));
        assert_eq!(machine.session().phase, Phase::Failed);

        to_result_shown(&mut machine, "t2");
        assert_eq!(machine.session().track_id(), Some("t2"));
        assert_eq!(machine.session().connection_id.as_deref(), Some("9.1"));
    }

    // ── full flow ──

    #[test]
    fn full_flow_from_lookup_to_download() {
        let mut machine = SessionMachine::new();
        established(&mut machine, "217.9112");

        // Prime the queue badge.
        let _ = machine.apply(SessionInput::Command(Command::RefreshQueue));
        let _ = machine.apply(SessionInput::QueueDepthDone { outcome: Ok(3) });
        assert_eq!(machine.session().queue_position, 3);

        to_queued(&mut machine, "t1", 5);
        assert_eq!(machine.session().queue_position, 5);

        let _ = machine.apply(SessionInput::Broker(BrokerEvent::QueueUpdate { depth: 2 }));
        assert_eq!(machine.session().queue_position, 2);

        let _ = machine.apply(SessionInput::Broker(BrokerEvent::DownloadSleep));
        let _ = machine.apply(SessionInput::Broker(BrokerEvent::BeginDownload));
        assert_eq!(machine.session().phase, Phase::Downloading);

        let _ = machine.apply(SessionInput::Broker(BrokerEvent::DownloadSuccess {
            path: "https://cdn.example.com/upload/v1/track.mp3".into(),
        }));
        assert_eq!(machine.session().phase, Phase::ReadyToDownload);

        let effects = machine.apply(SessionInput::Command(Command::Download));
        assert_matches!(effects.as_slice(), [Effect::OpenDownload { .. }]);
    }

    // ── invariants over arbitrary input sequences ──

    mod properties {
        use proptest::prelude::*;

        use super::*;

        fn arb_outcome_err() -> impl Strategy<Value = BackendError> {
            prop_oneof![
                Just(BackendError::Network("refused".into())),
                Just(BackendError::from_status(500, r#"{"message": "Worker crashed."}"#)),
                Just(BackendError::Malformed("bad body".into())),
            ]
        }

        fn arb_input() -> impl Strategy<Value = SessionInput> {
            let urls = prop_oneof![Just("u1".to_string()), Just("u2".to_string())];
            let tracks = prop_oneof![Just("t1".to_string()), Just("t2".to_string())];
            let paths = prop_oneof![
                Just("https://cdn.example.com/upload/v1/a.mp3".to_string()),
                Just("https://cdn.example.com/upload/v1/b.mp3".to_string()),
            ];

            prop_oneof![
                urls.clone()
                    .prop_map(|url| SessionInput::Command(Command::StartLookup { url })),
                Just(SessionInput::Command(Command::StartLookup { url: String::new() })),
                Just(SessionInput::Command(Command::StartPreparation)),
                Just(SessionInput::Command(Command::StartMaterialization)),
                Just(SessionInput::Command(Command::Download)),
                Just(SessionInput::Command(Command::RefreshQueue)),
                (urls, tracks.clone(), proptest::option::of(arb_outcome_err())).prop_map(
                    |(url, id, err)| SessionInput::LookupDone {
                        url,
                        outcome: match err {
                            None => Ok(serde_json::from_value(serde_json::json!({ "id": id }))
                                .unwrap()),
                            Some(err) => Err(err),
                        },
                    }
                ),
                (tracks.clone(), 0u32..6, proptest::option::of(arb_outcome_err())).prop_map(
                    |(track_id, depth, err)| SessionInput::PreparationDone {
                        track_id,
                        outcome: match err {
                            None if depth == 0 => Ok(PreparationStatus::Ready),
                            None if depth == 1 => Ok(PreparationStatus::Exists {
                                url: "https://cdn.example.com/upload/v1/x.mp3".into(),
                            }),
                            None => Ok(PreparationStatus::Queued { depth }),
                            Some(err) => Err(err),
                        },
                    }
                ),
                (tracks, proptest::option::of(arb_outcome_err())).prop_map(
                    |(track_id, err)| SessionInput::MaterializationDone {
                        track_id,
                        outcome: err.map_or(Ok(()), Err),
                    }
                ),
                (0u32..20, proptest::option::of(arb_outcome_err())).prop_map(|(depth, err)| {
                    SessionInput::QueueDepthDone {
                        outcome: err.map_or(Ok(depth), Err),
                    }
                }),
                prop_oneof![Just("9.1".to_string()), Just("11.4".to_string())].prop_map(
                    |socket_id| SessionInput::Broker(BrokerEvent::ConnectionEstablished {
                        socket_id
                    })
                ),
                Just(SessionInput::Broker(BrokerEvent::DownloadSleep)),
                Just(SessionInput::Broker(BrokerEvent::BeginDownload)),
                proptest::option::of(Just("boom".to_string())).prop_map(|message| {
                    SessionInput::Broker(BrokerEvent::DownloadError { message })
                }),
                paths.prop_map(|path| SessionInput::Broker(BrokerEvent::DownloadSuccess { path })),
                (0u32..20)
                    .prop_map(|depth| SessionInput::Broker(BrokerEvent::QueueUpdate { depth })),
                Just(SessionInput::LinkLost { reason: "reset".into() }),
            ]
        }

        fn in_preparation_pipeline(phase: Phase) -> bool {
            matches!(
                phase,
                Phase::RequestingPreparation
                    | Phase::Queued
                    | Phase::PreparationReady
                    | Phase::Materializing
                    | Phase::Downloading
            )
        }

        proptest! {
            /// The download link exists exactly in `ReadyToDownload`, and the
            /// resolved track never changes mid-pipeline, no matter how inputs
            /// interleave.
            #[test]
            fn session_invariants_hold_for_any_input_order(
                inputs in proptest::collection::vec(arb_input(), 0..60)
            ) {
                let mut machine = SessionMachine::new();
                let mut previous = machine.session().clone();

                for input in inputs {
                    let _ = machine.apply(input);
                    let session = machine.session();

                    prop_assert_eq!(
                        session.download_url.is_some(),
                        session.phase == Phase::ReadyToDownload,
                        "download link out of sync with phase {:?}",
                        session.phase
                    );
                    prop_assert!(
                        session.last_message.is_none() || session.phase == Phase::Downloading,
                        "progress text leaked into phase {:?}",
                        session.phase
                    );
                    if in_preparation_pipeline(previous.phase) && in_preparation_pipeline(session.phase) {
                        prop_assert_eq!(
                            previous.track_id(),
                            session.track_id(),
                            "track changed mid-pipeline"
                        );
                    }
                    previous = session.clone();
                }
            }
        }
    }
}
