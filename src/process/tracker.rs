//! # Process tracker contract and the portable reaper backend.
//!
//! The restarter core requires only the contract:
//!
//! - events are delivered in FIFO order per PID;
//! - children forked by a watched parent are auto-enrolled and surface as
//!   [`ProcessEvent::Child`] before any exit events involving them.
//!
//! Backend selection is a deployment concern. [`ChildReaper`] is the
//! portable fallback shipped here: it subscribes to `SIGCHLD` and reaps
//! with `waitpid`, which sees direct children only (no fork visibility).
//! Kernel-specific backends with full child visibility implement the same
//! trait.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Process identifier as the rest of the crate carries it.
pub type Pid = i32;

/// How a tracked process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    /// Exited with a status code.
    Exited(i32),
    /// Terminated by a signal.
    Signaled(i32),
}

impl ExitStatus {
    /// True for any exit the restarter treats as a failure: a non-zero
    /// status or death by signal.
    pub fn is_abnormal(self) -> bool {
        match self {
            ExitStatus::Exited(code) => code != 0,
            ExitStatus::Signaled(_) => true,
        }
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exited({code})"),
            ExitStatus::Signaled(sig) => write!(f, "signaled({sig})"),
        }
    }
}

/// One process lifecycle event delivered to the owning unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A tracked PID forked a child.
    Child {
        /// The tracked parent.
        parent: Pid,
        /// The new child, auto-enrolled by the backend.
        pid: Pid,
    },
    /// A tracked PID exited.
    Exit {
        /// The PID that ended.
        pid: Pid,
        /// How it ended.
        status: ExitStatus,
    },
}

impl ProcessEvent {
    /// The PID the event is about.
    pub fn pid(&self) -> Pid {
        match self {
            ProcessEvent::Child { pid, .. } | ProcessEvent::Exit { pid, .. } => *pid,
        }
    }
}

/// Platform-abstracted subscription to process lifecycle events.
#[async_trait]
pub trait ProcessTracker: Send {
    /// Starts delivering events for `pid`.
    fn watch(&mut self, pid: Pid);

    /// Stops delivering events for `pid`.
    fn disregard(&mut self, pid: Pid);

    /// Waits for the next event for any watched PID.
    ///
    /// Returns `None` when the backend can produce no further events.
    async fn next_event(&mut self) -> Option<ProcessEvent>;
}

/// Portable tracker backend: `SIGCHLD` + `waitpid`.
///
/// Sees direct children only; `Child` events are never produced. Unwatched
/// children are still reaped so they cannot accumulate as zombies.
pub struct ChildReaper {
    watched: HashSet<Pid>,
    sigchld: Signal,
    pending: VecDeque<ProcessEvent>,
}

impl ChildReaper {
    /// Registers the `SIGCHLD` listener.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            watched: HashSet::new(),
            sigchld: signal(SignalKind::child())?,
            pending: VecDeque::new(),
        })
    }

    /// Reaps every waitable child, queueing exit events for watched PIDs.
    fn reap(&mut self) {
        loop {
            match waitpid(nix::unistd::Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => {
                    self.queue_exit(pid.as_raw(), ExitStatus::Exited(code));
                }
                Ok(WaitStatus::Signaled(pid, sig, _)) => {
                    self.queue_exit(pid.as_raw(), ExitStatus::Signaled(sig as i32));
                }
                Ok(WaitStatus::StillAlive) => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    }

    fn queue_exit(&mut self, pid: Pid, status: ExitStatus) {
        if self.watched.contains(&pid) {
            self.pending.push_back(ProcessEvent::Exit { pid, status });
        }
    }
}

#[async_trait]
impl ProcessTracker for ChildReaper {
    fn watch(&mut self, pid: Pid) {
        self.watched.insert(pid);
    }

    fn disregard(&mut self, pid: Pid) {
        self.watched.remove(&pid);
    }

    async fn next_event(&mut self) -> Option<ProcessEvent> {
        loop {
            if let Some(ev) = self.pending.pop_front() {
                return Some(ev);
            }
            self.sigchld.recv().await?;
            self.reap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abnormality_of_exit_statuses() {
        assert!(!ExitStatus::Exited(0).is_abnormal());
        assert!(ExitStatus::Exited(1).is_abnormal());
        assert!(ExitStatus::Signaled(9).is_abnormal());
    }
}
