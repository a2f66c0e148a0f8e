//! # unitvisor
//!
//! **Unitvisor** is a modular service supervisor for UNIX-like hosts.
//!
//! It supervises long-running service instances, restarts them on failure,
//! and orders their start/stop according to declared dependencies. Two
//! subsystems make up the brain: a per-instance restarter state machine
//! coupled to kernel event sources, and a typed dependency-graph engine
//! with satisfiability evaluation and restart-reason gating. They talk
//! exclusively through an in-process note bus, drained to empty after
//! every external event by a single-threaded manager loop.
//!
//! ## Features
//!
//! | Area             | Description                                                       | Key types / traits                        |
//! |------------------|-------------------------------------------------------------------|-------------------------------------------|
//! | **Restarter**    | Per-instance state machines, method timers, failure policy.       | [`Restarter`], [`Unit`], [`UnitState`]    |
//! | **Graph**        | Dependency graph, satisfiability, start/stop propagation.         | [`GraphEngine`], [`Satisfiability`]       |
//! | **Notes**        | Typed messages between the two halves, FIFO drained.              | [`Note`], [`NoteQueue`], [`RestartOn`]    |
//! | **Process**      | Tracker and spawner seams, fork handshake, sim backends.          | [`ProcessTracker`], [`Spawner`]           |
//! | **Manager**      | The single-threaded event loop owning all state.                  | [`Manager`], [`ManagerHandle`]            |
//! | **Repository**   | Catalog seam: descriptors and dependency groups by path.          | [`Repository`], [`MemoryRepository`]      |
//! | **Observability**| Event bus with non-blocking subscriber fan-out.                   | [`Event`], [`Subscribe`], [`Bus`]         |
//!
//! ## Optional features
//! - `logging` *(default)*: exports the built-in [`LogWriter`] and
//!   [`TraceWriter`] subscribers.
//!
//! ```no_run
//! use std::sync::Arc;
//! use unitvisor::{
//!     AdminKind, ChildReaper, Config, Manager, MemoryRepository, Note, OsSpawner, RestartOn,
//!     ServicePath,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let repo = Arc::new(MemoryRepository::new());
//!     // ... put services into the repository ...
//!
//!     let mut manager = Manager::new(
//!         Config::default(),
//!         repo,
//!         Box::new(ChildReaper::new()?),
//!         Box::new(OsSpawner::new()),
//!         Vec::new(),
//!     );
//!     manager.setup_graph();
//!
//!     let handle = manager.handle();
//!     handle.submit(Note::admin(
//!         AdminKind::Enable,
//!         ServicePath::instance("db", "main"),
//!         RestartOn::Restart,
//!     ));
//!
//!     manager.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ---

mod config;
mod error;
mod events;
mod graph;
mod manager;
mod notes;
mod notify;
mod os_signals;
mod path;
mod process;
mod repository;
mod subscribers;
mod timers;
mod units;
mod wire;

// ---- Public re-exports ----

pub use config::{Config, NOTIFY_SOCKET_PATH};
pub use error::{GraphError, ManagerError, RepoError, SpawnError};
pub use events::{Bus, Event, EventKind};
pub use graph::{
    can_come_up, can_go_down, deps_satisfied, Edge, Graph, GraphEngine, Satisfiability, Vertex,
    VertexId, VertexKind, VertexState,
};
pub use manager::{Manager, ManagerHandle};
pub use notes::{AdminKind, Note, NoteQueue, RequestKind, RestartOn, StateChangeKind};
pub use notify::{NotifyDirective, NotifyMessage, NotifyReceiver};
pub use path::ServicePath;
pub use process::{
    ChildReaper, ExitStatus, KillSignal, OsSpawner, PendingChild, Pid, ProcessEvent,
    ProcessTracker, SimSpawner, SimTracker, SimTrackerHandle, SpawnRecord, Spawner,
};
pub use repository::{
    DepGroup, GroupKind, InstanceRecord, MemoryRepository, RepoEntry, Repository, ServiceRecord,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use timers::{TimerId, TimerPayload, TimerSet};
pub use units::{MethodKind, Methods, Restarter, RestarterCx, Unit, UnitSpec, UnitState, UnitType};
pub use wire::{decode_line, encode_line, serve_notes, NoteCodec, WireError, WireNote};

// Optional: built-in log subscribers.
// Enable with: `--features logging` (on by default).
#[cfg(feature = "logging")]
pub use subscribers::{LogWriter, TraceWriter};
