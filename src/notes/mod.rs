//! # Notes: typed messages between the graph engine and the restarter core.
//!
//! The two halves of the supervisor communicate only through notes carried
//! on an in-process FIFO ([`NoteQueue`]): the graph engine emits start/stop
//! requests, the restarter emits online/offline/maintenance state changes,
//! and administrative requests arrive from outside. The manager drains the
//! queue to empty after every external event.

mod note;
mod queue;

pub use note::{AdminKind, Note, RequestKind, RestartOn, StateChangeKind};
pub use queue::NoteQueue;
