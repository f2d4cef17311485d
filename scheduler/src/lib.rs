//! Pipeline Scheduler
//!
//! The engine of the work dispatcher: status transitions with
//! compare-and-swap, role-based assignment and bounce-back routing, the FIFO
//! unassigned-task sweep, agent lifecycle primitives, and the grace-period
//! reaper that recovers work from disconnected workers.
//!
//! The scheduler carries no task state of its own; everything authoritative
//! lives behind the [`dispatch_core::TaskStore`] and
//! [`dispatch_core::AgentStore`] ports, which is what allows several
//! operations to race safely.
//!
//! # Modules
//!
//! - [`scheduler`] - `Scheduler::update_status` and its effect fan-out
//! - [`sweep`] - the FIFO sweep under keyed mutual exclusion
//! - [`distributor`] - the store-backed worker claim
//! - [`reaper`] - grace timers for offline workers + startup orphan scan
//! - [`lifecycle`] - register / reactivate / reap primitives
//! - [`locks`] - in-process keyed advisory locks

pub mod distributor;
pub mod lifecycle;
pub mod locks;
pub mod reaper;
pub mod scheduler;
pub mod sweep;

pub use distributor::StoreDistributor;
pub use lifecycle::AgentLifecycle;
pub use locks::{sweep_key, KeyedLocks};
pub use reaper::{Reaper, ReaperConfig};
pub use scheduler::Scheduler;
