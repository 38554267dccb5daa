//! Channel subscriptions.

use tracing::debug;

use spindl_core::pusher;

use crate::socket::{BrokerSocket, SocketError};

/// Issues the channel subscriptions a fresh connection needs.
///
/// Order is fixed: the private per-connection channel first, the shared
/// broadcast channel second. Subscribing requires the broker-assigned
/// connection id; without one the attempt fails with
/// [`SocketError::NotReady`] and the caller decides whether to log or wait.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    app_key: String,
}

impl ChannelSubscriber {
    /// Subscriber for the given application key.
    #[must_use]
    pub fn new(app_key: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
        }
    }

    /// The two subscription frames, in issue order.
    #[must_use]
    pub fn frames(&self, connection_id: &str) -> [String; 2] {
        [
            pusher::subscribe_frame(&pusher::private_channel(&self.app_key, connection_id)),
            pusher::subscribe_frame(pusher::BROADCAST_CHANNEL),
        ]
    }

    /// Subscribe both channels on the given socket.
    pub async fn issue(
        &self,
        socket: &BrokerSocket,
        connection_id: Option<&str>,
    ) -> Result<(), SocketError> {
        let Some(id) = connection_id else {
            return Err(SocketError::NotReady);
        };
        for frame in self.frames(id) {
            socket.send(frame).await?;
        }
        debug!(connection_id = id, "channel subscriptions issued");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
