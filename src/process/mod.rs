//! # Process layer: tracking and spawning supervised children.
//!
//! Two seams separate the restarter core from the operating system:
//!
//! - [`ProcessTracker`] — platform-abstracted subscription to process
//!   birth/exit events for watched PIDs. [`ChildReaper`] is the portable
//!   backend (SIGCHLD + `waitpid`, direct children only); kernel-specific
//!   backends (process connector, process-descriptor event filters) plug in
//!   behind the same trait.
//! - [`Spawner`] — forks unit methods with the pending-process handshake
//!   and delivers termination signals. [`OsSpawner`] is the real backend.
//!
//! [`SimTracker`] and [`SimSpawner`] are deterministic backends for tests
//! and demos: events are injected by hand and forks are ledger entries.

mod sim;
mod spawn;
mod tracker;

pub use sim::{SimSpawner, SimTracker, SimTrackerHandle, SpawnRecord};
pub use spawn::{KillSignal, OsSpawner, PendingChild, Spawner};
pub use tracker::{ChildReaper, ExitStatus, Pid, ProcessEvent, ProcessTracker};
