//! # The restarter: unit table and dispatch.
//!
//! The [`Restarter`] owns every [`Unit`] and the method [`Spawner`]. The
//! manager forwards it restarter-request notes, process tracker events,
//! timer firings, and notification datagrams; it finds the owning unit and
//! drives the state machine.

use std::collections::HashMap;

use crate::config::Config;
use crate::error::RepoError;
use crate::events::Bus;
use crate::notes::{NoteQueue, RequestKind, RestartOn};
use crate::path::ServicePath;
use crate::process::{Pid, ProcessEvent, ProcessTracker, Spawner};
use crate::repository::{RepoEntry, Repository};
use crate::timers::{TimerPayload, TimerSet};

use super::state::UnitState;
use super::unit::{Unit, UnitCx};

/// Side-effect context the manager lends the restarter for one dispatch.
pub struct RestarterCx<'a> {
    /// The shared timer set.
    pub timers: &'a mut TimerSet<TimerPayload>,
    /// The note bus FIFO.
    pub notes: &'a mut NoteQueue,
    /// The observability bus.
    pub bus: &'a Bus,
    /// The process tracker backend.
    pub tracker: &'a mut dyn ProcessTracker,
    /// Runtime budgets.
    pub cfg: &'a Config,
}

/// Owner of the unit table and the method spawner.
pub struct Restarter {
    units: HashMap<ServicePath, Unit>,
    spawner: Box<dyn Spawner>,
}

impl Restarter {
    /// Creates a restarter over the given spawner backend.
    pub fn new(spawner: Box<dyn Spawner>) -> Self {
        Self {
            units: HashMap::new(),
            spawner,
        }
    }

    /// Idempotent unit creation: returns the existing unit for a path or
    /// creates one in `Uninitialised` with no tracked PIDs.
    pub fn unit_add(&mut self, path: &ServicePath) -> &mut Unit {
        self.units
            .entry(path.clone())
            .or_insert_with(|| Unit::new(path.clone()))
    }

    /// Looks up a unit.
    pub fn unit(&self, path: &ServicePath) -> Option<&Unit> {
        self.units.get(path)
    }

    /// Iterates all units.
    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    /// Serves a restarter-request note from the graph engine.
    ///
    /// The unit is created on first reference; its descriptor is fetched
    /// from the repository on that occasion. A transient repository failure
    /// is bubbled up so the manager can schedule a reconnect.
    pub fn handle_request(
        &mut self,
        path: &ServicePath,
        kind: RequestKind,
        reason: RestartOn,
        repo: &dyn Repository,
        cx: &mut RestarterCx<'_>,
    ) -> Result<(), RepoError> {
        let needs_spec = self
            .units
            .get(path)
            .map(|u| !u.has_spec())
            .unwrap_or(true);
        if needs_spec {
            match repo.lookup(path) {
                Ok(RepoEntry::Instance(rec)) => {
                    self.unit_add(path).set_spec(rec.unit);
                }
                Ok(RepoEntry::Service(_)) => {
                    tracing::warn!(%path, "restarter request for a non-instance path");
                    return Ok(());
                }
                Err(err) if err.is_transient() => return Err(err),
                Err(err) => {
                    tracing::warn!(%path, error = %err, "discarding request for unknown path");
                    return Ok(());
                }
            }
        }

        let spawner = self.spawner.as_mut();
        let unit = self
            .units
            .get_mut(path)
            .expect("unit exists after ensure");
        let mut ucx = UnitCx {
            timers: cx.timers,
            notes: cx.notes,
            bus: cx.bus,
            tracker: cx.tracker,
            spawner,
            cfg: cx.cfg,
        };
        match kind {
            RequestKind::Start => unit.request_start(&mut ucx, reason),
            RequestKind::Stop => unit.request_stop(&mut ucx, reason),
        }
        Ok(())
    }

    /// Routes a process tracker event to the unit owning the PID.
    pub fn handle_process_event(&mut self, ev: ProcessEvent, cx: &mut RestarterCx<'_>) {
        let owner_pid = match ev {
            ProcessEvent::Child { parent, .. } => parent,
            ProcessEvent::Exit { pid, .. } => pid,
        };
        let spawner = self.spawner.as_mut();
        let Some(unit) = self.units.values_mut().find(|u| u.has_pid(owner_pid)) else {
            tracing::debug!(pid = owner_pid, "process event for an unowned PID");
            return;
        };
        let mut ucx = UnitCx {
            timers: cx.timers,
            notes: cx.notes,
            bus: cx.bus,
            tracker: cx.tracker,
            spawner,
            cfg: cx.cfg,
        };
        unit.handle_process_event(&mut ucx, ev);
    }

    /// Routes a unit timer firing.
    pub fn handle_timer(&mut self, payload: TimerPayload, cx: &mut RestarterCx<'_>) {
        let (path, stage) = match payload {
            TimerPayload::Method(path) => (path, TimerStage::Method),
            TimerPayload::RestartCooldown(path) => (path, TimerStage::Cooldown),
            TimerPayload::RestartEntry(path) => (path, TimerStage::Entry),
            TimerPayload::RepoRetry => return,
        };
        let spawner = self.spawner.as_mut();
        let Some(unit) = self.units.get_mut(&path) else {
            tracing::warn!(%path, "timer fired for an unknown unit");
            return;
        };
        let mut ucx = UnitCx {
            timers: cx.timers,
            notes: cx.notes,
            bus: cx.bus,
            tracker: cx.tracker,
            spawner,
            cfg: cx.cfg,
        };
        match stage {
            TimerStage::Method => unit.handle_method_timer(&mut ucx),
            TimerStage::Cooldown => unit.handle_restart_cooldown(&mut ucx),
            TimerStage::Entry => unit.handle_restart_entry(&mut ucx),
        }
    }

    /// Delivers a readiness signal from the child with the given PID.
    pub fn notify_ready(&mut self, pid: Pid, cx: &mut RestarterCx<'_>) {
        let spawner = self.spawner.as_mut();
        let Some(unit) = self.units.values_mut().find(|u| u.has_pid(pid)) else {
            tracing::warn!(pid, "READY from a PID no unit owns");
            return;
        };
        let mut ucx = UnitCx {
            timers: cx.timers,
            notes: cx.notes,
            bus: cx.bus,
            tracker: cx.tracker,
            spawner,
            cfg: cx.cfg,
        };
        unit.notify_ready(&mut ucx);
    }

    /// Delivers a status annotation from the child with the given PID.
    pub fn notify_status(&mut self, pid: Pid, status: &str, cx: &mut RestarterCx<'_>) {
        let spawner = self.spawner.as_mut();
        let Some(unit) = self.units.values_mut().find(|u| u.has_pid(pid)) else {
            tracing::warn!(pid, "STATUS from a PID no unit owns");
            return;
        };
        let mut ucx = UnitCx {
            timers: cx.timers,
            notes: cx.notes,
            bus: cx.bus,
            tracker: cx.tracker,
            spawner,
            cfg: cx.cfg,
        };
        unit.notify_status(&mut ucx, status);
    }

    /// Reassigns a unit's main PID on behalf of the sender.
    pub fn notify_main_pid(&mut self, sender: Pid, new_main: Pid) {
        let Some(unit) = self.units.values_mut().find(|u| u.has_pid(sender)) else {
            tracing::warn!(pid = sender, "MAINPID from a PID no unit owns");
            return;
        };
        unit.set_main_pid(new_main);
    }

    /// Checks the §-style unit invariants; returns the first violation.
    ///
    /// Test support: production code never calls this.
    pub fn verify_invariants(&self) -> Result<(), String> {
        for unit in self.units.values() {
            if unit.state() == UnitState::Online && unit.has_method_timer() {
                return Err(format!("{}: online with a pending method timer", unit.path()));
            }
            if unit.state() == UnitState::Maintenance && !unit.pids().is_empty() {
                return Err(format!("{}: maintenance with tracked PIDs", unit.path()));
            }
            for pid in [unit.main_pid(), unit.secondary_pid()] {
                if pid != 0 && !unit.has_pid(pid) {
                    return Err(format!("{}: pid {pid} not in the PID set", unit.path()));
                }
            }
        }
        Ok(())
    }
}

enum TimerStage {
    Method,
    Cooldown,
    Entry,
}
