//! Shared engine for the nx fleet orchestrator.
//!
//! This crate holds everything the CLI binary composes: the fleet
//! configuration, the error taxonomy, the pinned tmux record contract
//! (command builders + parser), and the SSH transport with its bounded
//! fan-out primitive. It owns no persistent state; the tmux server on
//! each node is the single source of truth for session records.

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod mock;
pub mod tmux;
pub mod transport;
pub mod types;

pub use config::FleetConfig;
pub use errors::NxError;
pub use transport::{CancelToken, SshTransport, Transport, fan_out};
pub use types::{NodeResult, SessionInfo, Target};
