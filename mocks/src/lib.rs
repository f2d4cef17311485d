//! Test doubles for the work dispatcher
//!
//! Thread-safe in-memory implementations of the dispatcher's ports:
//!
//! - [`store`] - `MockDispatchStore`, both `TaskStore` and `AgentStore` on
//!   shared state, with call tracking and error injection
//! - [`notifiers`] - recording agent/role notifiers
//! - [`builders`] - fluent builders for seeding tasks and agents

pub mod builders;
pub mod notifiers;
pub mod store;

pub use builders::{AgentBuilder, TaskBuilder};
pub use notifiers::{RecordingAgentNotifier, RecordingRoleNotifier};
pub use store::MockDispatchStore;
