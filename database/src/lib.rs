//! SQLite persistence adapter for the work dispatcher
//!
//! Implements the [`dispatch_core::TaskStore`] and
//! [`dispatch_core::AgentStore`] ports on a single connection pool, so
//! compound operations (claim, assign-if-idle, release) run in one
//! transaction.
//!
//! # Example
//!
//! ```rust,no_run
//! use database::SqliteDispatchStore;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteDispatchStore::new("sqlite:///var/lib/dispatch/dispatch.sqlite").await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod sqlite;

pub use sqlite::SqliteDispatchStore;
