//! # spindl-session
//!
//! The download-session state machine and the task that hosts it.
//!
//! The machine itself ([`machine::SessionMachine`]) is pure: it consumes
//! [`input::SessionInput`] values, mutates a [`spindl_core::Session`]
//! snapshot, and returns [`effect::Effect`]s for the host to execute. All
//! I/O lives in [`host::SessionHost`], which serializes every input source
//! through one loop so the machine never needs a lock.

#![deny(unsafe_code)]

pub mod effect;
pub mod host;
pub mod input;
pub mod machine;

pub use effect::{Effect, Notice, NoticeLevel};
pub use host::{HostConfig, SessionHandle, SessionHost, Update};
pub use input::{Command, SessionInput};
pub use machine::SessionMachine;
