//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to observability events emitted by the manager, the
//! restarter core, and the graph engine. Events are diagnostics only — the
//! supervisor's semantics ride on [`Note`](crate::Note)s, never on events.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Manager`, `Restarter` (unit transitions), `GraphEngine`
//!   (cycle rejections, vertex states), `SubscriberSet` workers
//!   (overflow/panic).
//! - **Consumers**: `Manager::subscriber_listener()` (fans out to
//!   `SubscriberSet`).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
