//! Broker connection — thin client over `tokio-tungstenite`.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound frame buffer; sends block once the I/O task falls this far behind.
const SEND_BUFFER: usize = 32;
/// Inbound signal buffer.
const SIGNAL_BUFFER: usize = 256;

/// Transport-level failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    /// The connection could not be established.
    #[error("failed to connect to {url}: {cause}")]
    Connect {
        /// Endpoint that refused us.
        url: String,
        /// Underlying handshake error.
        cause: String,
    },
    /// The connection is gone; the frame was not sent.
    #[error("socket is not connected")]
    NotConnected,
    /// No connection id has been established yet.
    #[error("connection id not yet established")]
    NotReady,
}

/// Ordered transport signals for one connection.
///
/// Exactly one `Opened` is emitted first; `Closed` or `Errored` is last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketSignal {
    /// The connection is up.
    Opened,
    /// One inbound text frame, unparsed.
    Frame(String),
    /// The server closed the connection.
    Closed {
        /// Close reason, when the server supplied a non-empty one.
        reason: Option<String>,
    },
    /// The connection failed.
    Errored {
        /// Underlying stream or send error.
        cause: String,
    },
}

/// One WebSocket connection to the broker.
///
/// The signal receiver returned by [`BrokerSocket::connect`] is the single
/// registered consumer for this connection; a reconnect means a new socket
/// and a new receiver. Dropping the socket tears the connection down.
pub struct BrokerSocket {
    out_tx: mpsc::Sender<String>,
    _io: JoinHandle<()>,
}

impl BrokerSocket {
    /// Connect to the broker endpoint.
    ///
    /// Connection failures are returned, not retried: retry policy belongs
    /// to the caller.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<SocketSignal>), SocketError> {
        let (ws, _) = connect_async(url).await.map_err(|e| SocketError::Connect {
            url: url.to_string(),
            cause: e.to_string(),
        })?;
        debug!(url, "broker socket connected");

        let (out_tx, out_rx) = mpsc::channel(SEND_BUFFER);
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        let io = tokio::spawn(io_loop(ws, out_rx, signal_tx));

        Ok((Self { out_tx, _io: io }, signal_rx))
    }

    /// Send one text frame.
    pub async fn send(&self, frame: String) -> Result<(), SocketError> {
        self.out_tx
            .send(frame)
            .await
            .map_err(|_| SocketError::NotConnected)
    }
}

/// Build the broker endpoint URL for an application key.
#[must_use]
pub fn app_endpoint(socket_url: &str, app_key: &str) -> String {
    format!("{}/app/{app_key}", socket_url.trim_end_matches('/'))
}

/// Pumps frames both ways until the connection dies or the socket handle is
/// dropped. Non-text inbound frames are dropped silently; pings are answered
/// by the protocol layer, so the consumer never sees keepalive traffic.
async fn io_loop(
    ws: WsStream,
    mut out_rx: mpsc::Receiver<String>,
    signals: mpsc::Sender<SocketSignal>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    if signals.send(SocketSignal::Opened).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(err) = ws_tx.send(Message::Text(frame.into())).await {
                    let _ = signals
                        .send(SocketSignal::Errored { cause: err.to_string() })
                        .await;
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if signals
                            .send(SocketSignal::Frame(text.to_string()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty());
                        let _ = signals.send(SocketSignal::Closed { reason }).await;
                        break;
                    }
                    Some(Ok(other)) => {
                        trace!(kind = ?other, "dropping non-text broker frame");
                    }
                    Some(Err(err)) => {
                        let _ = signals
                            .send(SocketSignal::Errored { cause: err.to_string() })
                            .await;
                        break;
                    }
                    None => {
                        let _ = signals
                            .send(SocketSignal::Errored { cause: "stream ended".into() })
                            .await;
                        break;
                    }
                }
            }
        }
    }
    debug!("broker socket i/o loop finished");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_endpoint_joins_path() {
        assert_eq!(
            app_endpoint("ws://127.0.0.1:6001", "spotify-track-downloader"),
            "ws://127.0.0.1:6001/app/spotify-track-downloader"
        );
    }

    #[test]
    fn app_endpoint_trims_trailing_slash() {
        assert_eq!(
            app_endpoint("ws://broker.example.com/", "key"),
            "ws://broker.example.com/app/key"
        );
    }

    #[test]
    fn socket_error_messages() {
        let err = SocketError::Connect {
            url: "ws://x".into(),
            cause: "refused".into(),
        };
        assert_eq!(err.to_string(), "failed to connect to ws://x: refused");
        assert_eq!(SocketError::NotConnected.to_string(), "socket is not connected");
        assert_eq!(
            SocketError::NotReady.to_string(),
            "connection id not yet established"
        );
    }
}
