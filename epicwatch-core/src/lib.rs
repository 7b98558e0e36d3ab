//! # epicwatch-core
//!
//! Core library for epicwatch - a live dashboard for epic/story workflows.
//!
//! This library provides:
//! - Domain types for the project tree (epics, stories, phases)
//! - Event envelope validation and typed payload decoding
//! - Per-run ordering, gap buffering and deduplication
//! - Reconciliation of events into the project tree
//! - Connection lifecycle with exponential reconnect backoff
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Events flow through one synchronous pipeline owned by a
//! [`DashboardSession`]:
//!
//! - **Transport:** [`sse::SseDecoder`] turns body bytes into messages
//! - **Validation:** [`envelope::validate`] rejects malformed envelopes
//! - **Ordering:** [`sequencer::RunSequencer`] releases events in sequence
//! - **State:** [`store::ProjectStore`] applies them to the tree
//!
//! [`SessionRunner`] does the IO around that pipeline and publishes
//! [`DashboardView`] snapshots for UIs.
//!
//! ## Example
//!
//! ```rust,no_run
//! use epicwatch_core::{Config, SessionRunner};
//!
//! # async fn demo() -> epicwatch_core::Result<()> {
//! let config = Config::load()?;
//! let (runner, handle) = SessionRunner::new(&config)?;
//! tokio::spawn(runner.run());
//!
//! let mut views = handle.subscribe();
//! while views.changed().await.is_ok() {
//!     println!("status: {}", views.borrow().status);
//! }
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use runner::{SessionCommand, SessionHandle, SessionRunner};
pub use session::{DashboardSession, DashboardView, SessionStats};
pub use types::*;

// Public modules
pub mod client;
pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod format;
pub mod logging;
pub mod reconciler;
pub mod runner;
pub mod sequencer;
pub mod session;
pub mod sse;
pub mod store;
pub mod types;
