//! # spindl-socket
//!
//! WebSocket transport adapter for the push-event broker.
//!
//! - **Socket**: [`socket::BrokerSocket`] owns one connection and surfaces an
//!   ordered [`socket::SocketSignal`] sequence to exactly one consumer
//! - **Backoff**: [`backoff::ReconnectPolicy`] capped exponential delays;
//!   the session host owns the retry loop, this crate only reports failures
//! - **Subscriptions**: [`subscribe::ChannelSubscriber`] issues the private
//!   and broadcast channel subscriptions in their required order
//!
//! No payload parsing happens here: frames cross this boundary as raw text
//! and are decoded by `spindl_core::pusher` on the consumer side.

#![deny(unsafe_code)]

pub mod backoff;
pub mod socket;
pub mod subscribe;

pub use backoff::ReconnectPolicy;
pub use socket::{BrokerSocket, SocketError, SocketSignal, app_endpoint};
pub use subscribe::ChannelSubscriber;
