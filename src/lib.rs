#![forbid(unsafe_code)]

//! Process orchestration and voice-injectable interactive sessions.
//!
//! The orchestrator launches a fixed set of managed processes and reports the
//! first one to exit. Session managers publish discoverable records so that
//! injection tools can type text into a live session.

#[cfg(not(unix))]
compile_error!("voxherd relies on Unix signals, process groups, and FIFOs");

pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod models;
pub mod orchestrator;
pub mod process;
pub mod registry;
pub mod session;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
