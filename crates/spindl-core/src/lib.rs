//! # spindl-core
//!
//! Foundation types for the spindl download engine.
//!
//! This crate provides the shared vocabulary that all other spindl crates
//! depend on:
//!
//! - **Phases**: [`phase::Phase`] lifecycle enum and the derived
//!   [`phase::SessionFlags`] view projection
//! - **Session**: [`session::Session`] observable snapshot of one download
//!   attempt
//! - **Tracks**: [`track::TrackMetadata`] as returned by the lookup endpoint
//! - **Errors**: [`error::BackendError`] hierarchy via `thiserror`
//! - **Broker protocol**: [`pusher`] envelope decoding, the
//!   [`pusher::BrokerEvent`] tagged union, and subscription frames
//! - **Links**: [`url::force_attachment`] download-URL rewrite
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other spindl crates.

#![deny(unsafe_code)]

pub mod error;
pub mod phase;
pub mod pusher;
pub mod session;
pub mod track;
pub mod url;

pub use error::BackendError;
pub use phase::{Phase, SessionFlags};
pub use session::Session;
pub use track::TrackMetadata;
