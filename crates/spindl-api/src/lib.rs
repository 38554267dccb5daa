//! # spindl-api
//!
//! Typed client for the job-control backend.
//!
//! The backend exposes four operations under one service path: queue-depth
//! snapshot, track lookup, download preparation, and download
//! materialization. [`client::JobControl`] is the seam the session host
//! programs against; [`client::BackendClient`] is the `reqwest`
//! implementation. Calls are exactly-once: nothing here retries, the caller
//! decides whether to re-issue.
//!
//! ## Crate Position
//!
//! Depends on `spindl-core` for the shared vocabulary. Used by
//! `spindl-session` and the binary.

#![deny(unsafe_code)]

pub mod client;

pub use client::{BackendClient, JobControl, PreparationStatus};
