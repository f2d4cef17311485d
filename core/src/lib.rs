//! Dispatch Core Library
//!
//! This crate provides the foundational domain models, the pipeline table,
//! and the trait interfaces for the multi-agent work dispatcher. All other
//! crates depend on the types and interfaces defined here.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`models`] - Core domain models (Task, TaskStatus, Agent, etc.)
//! - [`error`] - Error types and result handling
//! - [`pipeline`] - The declarative status → action table
//! - [`repository`] - Store traits for task and agent persistence
//! - [`ports`] - Distribution, notification and locking ports
//! - [`events`] - Event bus port and the in-process implementation
//!
//! # Example
//!
//! ```rust
//! use dispatch_core::{
//!     models::TaskStatus,
//!     pipeline::PipelineConfig,
//! };
//!
//! let pipeline = PipelineConfig::standard();
//!
//! // A task leaving InProgress frees a coder slot
//! assert_eq!(
//!     pipeline.effective_freed_role(TaskStatus::InProgress),
//!     Some("coder"),
//! );
//! ```

pub mod error;
pub mod events;
pub mod models;
pub mod pipeline;
pub mod ports;
pub mod repository;

// Re-export commonly used types at the crate root for convenience
pub use error::{DispatchError, Result};
pub use events::{Event, EventBus, EventChannel, InProcessEventBus};
pub use models::{
    Agent, AgentFilter, AgentStatus, NewAgent, NewTask, Priority, Task, TaskFilter, TaskStatus,
};
pub use pipeline::{PipelineConfig, StageAction};
pub use ports::{AdvisoryLocker, AgentNotifier, Distributor, LockLease, PushMessage, RoleBroadcast, RoleNotifier};
pub use repository::{AgentStore, TaskStore};

/// Current version of the core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
