//! Single-writer host for the session machine.
//!
//! [`SessionHost::spawn`] starts one task that owns a [`SessionMachine`]
//! outright. Commands from the handle, completions of spawned backend calls,
//! and frames from the broker socket all funnel through one `select!` loop,
//! so inputs are applied strictly one at a time and the machine needs no
//! lock. Effects are executed as they come back: backend calls are spawned
//! (their outcomes re-enter the loop as inputs), subscriptions go out on the
//! socket, notices and downloads go out to the observer.
//!
//! The host also owns the broker link lifecycle: it connects at startup,
//! feeds decoded frames to the machine, and on loss reports `LinkLost` and
//! schedules a reconnect with exponential backoff. The machine itself never
//! knows reconnection exists; it only sees the link drop and a later
//! handshake.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use spindl_api::JobControl;
use spindl_core::{Session, pusher};
use spindl_socket::{BrokerSocket, ChannelSubscriber, ReconnectPolicy, SocketSignal, app_endpoint};

use crate::effect::{Effect, Notice};
use crate::input::{Command, SessionInput};
use crate::machine::SessionMachine;

const COMMAND_BUFFER: usize = 16;
const INTERNAL_BUFFER: usize = 64;
const UPDATE_BUFFER: usize = 256;

/// Everything the host needs to reach the outside world.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Broker base URL (`ws://host:port`), without the `/app/<key>` suffix.
    pub socket_url: String,
    /// Application key, used for the connect path and channel names.
    pub app_key: String,
    /// Backoff policy for broker reconnects.
    pub reconnect: ReconnectPolicy,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            socket_url: "ws://127.0.0.1:6001".into(),
            app_key: pusher::DEFAULT_APP_KEY.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// One observable output of a hosted session.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// The session snapshot changed.
    State(Session),
    /// A notification to show the user.
    Notice(Notice),
    /// A download URL, already rewritten for attachment delivery.
    Download {
        /// Direct link to hand to the user.
        url: String,
    },
}

/// The caller's side of a hosted session.
///
/// Dropping the handle shuts the host down; [`SessionHandle::shutdown`] does
/// so explicitly.
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    updates: mpsc::Receiver<Update>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Queue a command for the session. Returns `false` once the host has
    /// shut down.
    pub async fn command(&self, command: Command) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Next observable update, or `None` once the host has shut down.
    pub async fn next_update(&mut self) -> Option<Update> {
        self.updates.recv().await
    }

    /// Stop the host loop and drop the broker link.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Completions and timers folded back into the host loop.
enum HostEvent {
    Outcome(SessionInput),
    Reconnect,
}

/// A live broker connection.
struct Link {
    socket: BrokerSocket,
    signals: mpsc::Receiver<SocketSignal>,
}

/// The hosting task. Constructed through [`SessionHost::spawn`]; never held
/// directly by callers.
pub struct SessionHost<J> {
    api: Arc<J>,
    machine: SessionMachine,
    subscriber: ChannelSubscriber,
    config: HostConfig,
    last_snapshot: Session,
    internal_tx: mpsc::Sender<HostEvent>,
    updates: mpsc::Sender<Update>,
    cancel: CancellationToken,
}

impl<J: JobControl + 'static> SessionHost<J> {
    /// Start a session host and hand back its handle.
    ///
    /// The host immediately dials the broker and refreshes the queue depth;
    /// both happen concurrently with whatever the caller does next.
    pub fn spawn(api: Arc<J>, config: HostConfig) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (update_tx, update_rx) = mpsc::channel(UPDATE_BUFFER);
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_BUFFER);
        let cancel = CancellationToken::new();

        let host = Self {
            api,
            machine: SessionMachine::new(),
            subscriber: ChannelSubscriber::new(config.app_key.clone()),
            config,
            last_snapshot: Session::default(),
            internal_tx,
            updates: update_tx,
            cancel: cancel.clone(),
        };
        let _ = tokio::spawn(host.run(command_rx, internal_rx));

        SessionHandle {
            commands: command_tx,
            updates: update_rx,
            cancel,
        }
    }

    #[instrument(skip_all, name = "session_host")]
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::Receiver<HostEvent>,
    ) {
        // The link lives on the loop's stack: `select!` polls it mutably
        // while other arms borrow `self`.
        let mut link: Option<Link> = None;
        let mut attempts: u32 = 0;

        self.connect_link(&mut link, &mut attempts).await;
        self.dispatch(&link, SessionInput::Command(Command::RefreshQueue))
            .await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                command = commands.recv() => {
                    // All handles gone means nobody is listening.
                    let Some(command) = command else { break };
                    self.dispatch(&link, SessionInput::Command(command)).await;
                }
                event = internal.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        HostEvent::Outcome(input) => self.dispatch(&link, input).await,
                        HostEvent::Reconnect => self.connect_link(&mut link, &mut attempts).await,
                    }
                }
                signal = next_signal(&mut link) => {
                    self.on_signal(&mut link, &mut attempts, signal).await;
                }
            }
        }
        debug!("session host stopped");
    }

    /// Apply one input and execute whatever effects come back. Emits a state
    /// update only when the snapshot actually changed.
    async fn dispatch(&mut self, link: &Option<Link>, input: SessionInput) {
        let effects = self.machine.apply(input);
        if self.machine.session() != &self.last_snapshot {
            self.last_snapshot = self.machine.session().clone();
            self.emit(Update::State(self.last_snapshot.clone()));
        }
        for effect in effects {
            self.execute(link, effect).await;
        }
    }

    async fn execute(&mut self, link: &Option<Link>, effect: Effect) {
        match effect {
            Effect::FetchQueueDepth => {
                let api = Arc::clone(&self.api);
                let tx = self.internal_tx.clone();
                let _ = tokio::spawn(async move {
                    let outcome = api.queue_depth().await;
                    let _ = tx
                        .send(HostEvent::Outcome(SessionInput::QueueDepthDone { outcome }))
                        .await;
                });
            }
            Effect::FetchTrackInfo { url } => {
                let api = Arc::clone(&self.api);
                let tx = self.internal_tx.clone();
                let _ = tokio::spawn(async move {
                    let outcome = api.track_info(&url).await;
                    let _ = tx
                        .send(HostEvent::Outcome(SessionInput::LookupDone { url, outcome }))
                        .await;
                });
            }
            Effect::RequestPreparation {
                track_id,
                connection_id,
            } => {
                let api = Arc::clone(&self.api);
                let tx = self.internal_tx.clone();
                let _ = tokio::spawn(async move {
                    let outcome = api
                        .request_download(&track_id, connection_id.as_deref())
                        .await;
                    let _ = tx
                        .send(HostEvent::Outcome(SessionInput::PreparationDone {
                            track_id,
                            outcome,
                        }))
                        .await;
                });
            }
            Effect::RequestMaterialization {
                track_id,
                connection_id,
            } => {
                let api = Arc::clone(&self.api);
                let tx = self.internal_tx.clone();
                let _ = tokio::spawn(async move {
                    let outcome = api
                        .process_download(&track_id, connection_id.as_deref())
                        .await;
                    let _ = tx
                        .send(HostEvent::Outcome(SessionInput::MaterializationDone {
                            track_id,
                            outcome,
                        }))
                        .await;
                });
            }
            Effect::Subscribe { connection_id } => match link {
                Some(active) => {
                    if let Err(err) = self
                        .subscriber
                        .issue(&active.socket, Some(&connection_id))
                        .await
                    {
                        warn!(error = %err, "channel subscription failed");
                    }
                }
                // The handshake came over a link that is already gone; the
                // next link will bring its own handshake.
                None => warn!("subscribe requested without a live link"),
            },
            Effect::Notify(notice) => self.emit(Update::Notice(notice)),
            Effect::OpenDownload { url } => self.emit(Update::Download { url }),
        }
    }

    async fn on_signal(
        &mut self,
        link: &mut Option<Link>,
        attempts: &mut u32,
        signal: Option<SocketSignal>,
    ) {
        match signal {
            Some(SocketSignal::Opened) => {
                *attempts = 0;
                info!("broker link up");
            }
            Some(SocketSignal::Frame(text)) => {
                if let Some(event) = pusher::decode_frame(&text) {
                    self.dispatch(link, SessionInput::Broker(event)).await;
                }
            }
            Some(SocketSignal::Closed { reason }) => {
                let reason = reason.unwrap_or_else(|| "closed by server".to_string());
                self.link_down(link, attempts, reason).await;
            }
            Some(SocketSignal::Errored { cause }) => {
                self.link_down(link, attempts, cause).await;
            }
            // The io task died without a final signal.
            None => {
                self.link_down(link, attempts, "signal channel closed".to_string())
                    .await;
            }
        }
    }

    async fn link_down(&mut self, link: &mut Option<Link>, attempts: &mut u32, reason: String) {
        if link.is_none() {
            return;
        }
        *link = None;
        self.dispatch(&*link, SessionInput::LinkLost { reason }).await;
        self.schedule_reconnect(*attempts);
        *attempts += 1;
    }

    async fn connect_link(&mut self, link: &mut Option<Link>, attempts: &mut u32) {
        let endpoint = app_endpoint(&self.config.socket_url, &self.config.app_key);
        match BrokerSocket::connect(&endpoint).await {
            Ok((socket, signals)) => {
                *link = Some(Link { socket, signals });
            }
            Err(err) => {
                warn!(error = %err, "broker connect failed");
                self.schedule_reconnect(*attempts);
                *attempts += 1;
            }
        }
    }

    fn schedule_reconnect(&self, attempt: u32) {
        let delay = self.config.reconnect.delay_for(attempt);
        let tx = self.internal_tx.clone();
        info!(?delay, attempt, "scheduling broker reconnect");
        let _ = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(HostEvent::Reconnect).await;
        });
    }

    /// Updates are best-effort: a consumer that stopped draining loses
    /// updates rather than stalling the loop.
    fn emit(&self, update: Update) {
        if let Err(err) = self.updates.try_send(update) {
            warn!(error = %err, "dropping session update");
        }
    }
}

/// Resolves to the next socket signal, or never while there is no link.
async fn next_signal(link: &mut Option<Link>) -> Option<SocketSignal> {
    match link {
        Some(active) => active.signals.recv().await,
        None => std::future::pending().await,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
