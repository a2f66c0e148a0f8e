//! # Event subscribers for the supervisor runtime.
//!
//! This module provides the [`Subscribe`] trait and built-in
//! implementations for handling runtime events broadcast through the
//! [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   Restarter / GraphEngine ── publish(Event) ──► Bus
//!                                                  │
//!                                     Manager::subscriber_listener()
//!                                                  │
//!                                           SubscriberSet::emit()
//!                                       ┌──────────┼──────────┐
//!                                       ▼          ▼          ▼
//!                                   LogWriter  TraceWriter  Custom...
//! ```
//!
//! ## Subscriber types
//! - [`LogWriter`] — prints events to stdout (demos, debugging)
//! - [`TraceWriter`] — forwards events into the `tracing` ecosystem
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use unitvisor::{Subscribe, Event, EventKind};
//! use async_trait::async_trait;
//!
//! struct MetricsSubscriber;
//!
//! #[async_trait]
//! impl Subscribe for MetricsSubscriber {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::UnitMaintenance {
//!             // increment maintenance counter
//!         }
//!     }
//!     fn name(&self) -> &'static str { "metrics" }
//! }
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;
#[cfg(feature = "logging")]
mod trace;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
#[cfg(feature = "logging")]
pub use trace::TraceWriter;
