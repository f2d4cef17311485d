//! dispatchd — process bootstrap for the work dispatcher
//!
//! Wires the SQLite store, the in-process event bus, the scheduler and the
//! reaper together. The RPC surface that exposes the scheduler's operations
//! to workers lives elsewhere; this crate only boots the scheduling core.

pub mod config;
pub mod notify;
pub mod telemetry;

pub use config::Config;
