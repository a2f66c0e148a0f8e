//! # Deterministic process backends.
//!
//! [`SimTracker`] and [`SimSpawner`] replace the kernel with a script:
//! tests inject birth/exit events by hand and read back a ledger of forks
//! and kills. They implement the same traits as the real backends, so the
//! restarter code under test is the code that ships.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SpawnError;
use crate::path::ServicePath;
use crate::units::MethodKind;

use super::spawn::{KillSignal, PendingChild, Spawner};
use super::tracker::{ExitStatus, Pid, ProcessEvent, ProcessTracker};

/// Tracker backend fed by a test.
pub struct SimTracker {
    watched: HashSet<Pid>,
    rx: mpsc::UnboundedReceiver<ProcessEvent>,
}

/// Handle used to inject events into a [`SimTracker`].
#[derive(Clone)]
pub struct SimTrackerHandle {
    tx: mpsc::UnboundedSender<ProcessEvent>,
}

impl SimTracker {
    /// Creates the tracker and its injection handle.
    pub fn new() -> (Self, SimTrackerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                watched: HashSet::new(),
                rx,
            },
            SimTrackerHandle { tx },
        )
    }

    /// True if the PID is currently watched.
    pub fn is_watching(&self, pid: Pid) -> bool {
        self.watched.contains(&pid)
    }
}

impl SimTrackerHandle {
    /// Injects a child-forked event.
    pub fn emit_child(&self, parent: Pid, pid: Pid) {
        let _ = self.tx.send(ProcessEvent::Child { parent, pid });
    }

    /// Injects an exit event.
    pub fn emit_exit(&self, pid: Pid, status: ExitStatus) {
        let _ = self.tx.send(ProcessEvent::Exit { pid, status });
    }
}

#[async_trait]
impl ProcessTracker for SimTracker {
    fn watch(&mut self, pid: Pid) {
        self.watched.insert(pid);
    }

    fn disregard(&mut self, pid: Pid) {
        self.watched.remove(&pid);
    }

    async fn next_event(&mut self) -> Option<ProcessEvent> {
        loop {
            let ev = self.rx.recv().await?;
            if self.watched.contains(&ev.pid())
                || matches!(ev, ProcessEvent::Child { parent, .. } if self.watched.contains(&parent))
            {
                return Some(ev);
            }
        }
    }
}

/// One fork recorded by a [`SimSpawner`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnRecord {
    /// Unit the method belonged to.
    pub path: ServicePath,
    /// Which method slot was forked.
    pub method: MethodKind,
    /// The command line.
    pub cmd: String,
    /// The synthetic PID handed out.
    pub pid: Pid,
}

#[derive(Debug, Default)]
struct SimLedger {
    next_pid: Pid,
    spawned: Vec<SpawnRecord>,
    kills: Vec<(Pid, KillSignal)>,
    fail_next: bool,
}

/// Spawner backend that allocates synthetic PIDs and keeps a ledger.
///
/// Clones share the ledger, so a test can hand one clone to the manager and
/// keep another for inspection.
#[derive(Clone, Default)]
pub struct SimSpawner {
    ledger: Arc<Mutex<SimLedger>>,
}

impl SimSpawner {
    /// Creates a spawner whose first synthetic PID is 100.
    pub fn new() -> Self {
        let spawner = Self::default();
        spawner.ledger.lock().expect("sim ledger poisoned").next_pid = 100;
        spawner
    }

    /// Makes the next `spawn_method` fail the way a refused fork would.
    pub fn fail_next(&self) {
        self.ledger.lock().expect("sim ledger poisoned").fail_next = true;
    }

    /// Every fork so far, in order.
    pub fn spawned(&self) -> Vec<SpawnRecord> {
        self.ledger
            .lock()
            .expect("sim ledger poisoned")
            .spawned
            .clone()
    }

    /// The most recent fork, if any.
    pub fn last_spawned(&self) -> Option<SpawnRecord> {
        self.ledger
            .lock()
            .expect("sim ledger poisoned")
            .spawned
            .last()
            .cloned()
    }

    /// Every kill delivered so far, in order.
    pub fn kills(&self) -> Vec<(Pid, KillSignal)> {
        self.ledger
            .lock()
            .expect("sim ledger poisoned")
            .kills
            .clone()
    }
}

impl Spawner for SimSpawner {
    fn spawn_method(
        &mut self,
        path: &ServicePath,
        method: MethodKind,
        cmd: &str,
        _notify_socket: &Path,
    ) -> Result<PendingChild, SpawnError> {
        let mut ledger = self.ledger.lock().expect("sim ledger poisoned");
        if ledger.fail_next {
            ledger.fail_next = false;
            return Err(SpawnError::Fork(std::io::Error::other("simulated fork refusal")));
        }
        let pid = ledger.next_pid;
        ledger.next_pid += 1;
        ledger.spawned.push(SpawnRecord {
            path: path.clone(),
            method,
            cmd: cmd.to_string(),
            pid,
        });
        Ok(PendingChild::ready(pid))
    }

    fn kill(&mut self, pid: Pid, sig: KillSignal) {
        self.ledger
            .lock()
            .expect("sim ledger poisoned")
            .kills
            .push((pid, sig));
    }
}
