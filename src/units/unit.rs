//! # The per-instance unit state machine.
//!
//! Every transition the restarter can make lives here, as methods on
//! [`Unit`] driven by the [`Restarter`](super::Restarter). A unit owns its
//! PID set, its method timer, and its restart-delay timer exclusively; all
//! side effects (forks, kills, timer registration, note emission, event
//! publication) go through the [`UnitCx`] borrowed from the manager for the
//! duration of one dispatch.
//!
//! ## Rules
//! - At most one method timer is active at a time.
//! - `main_pid`/`secondary_pid`, when nonzero, are members of the PID set.
//! - A unit in `Online` has no pending method timer.
//! - A unit in `Maintenance` has no tracked PIDs.

use crate::config::Config;
use crate::events::{Bus, Event, EventKind};
use crate::notes::{Note, NoteQueue, RestartOn, StateChangeKind};
use crate::path::ServicePath;
use crate::process::{KillSignal, Pid, ProcessEvent, ProcessTracker, Spawner};
use crate::timers::{TimerId, TimerPayload, TimerSet};

use super::spec::UnitSpec;
use super::state::{MethodKind, UnitState, UnitType};

/// Side-effect context borrowed for one dispatch into a unit.
pub(crate) struct UnitCx<'a> {
    pub timers: &'a mut TimerSet<TimerPayload>,
    pub notes: &'a mut NoteQueue,
    pub bus: &'a Bus,
    pub tracker: &'a mut dyn ProcessTracker,
    pub spawner: &'a mut dyn Spawner,
    pub cfg: &'a Config,
}

/// The restarter's representation of one service instance.
#[derive(Debug)]
pub struct Unit {
    path: ServicePath,
    spec: UnitSpec,
    has_spec: bool,
    state: UnitState,
    target: UnitState,
    main_pid: Pid,
    secondary_pid: Pid,
    pids: Vec<Pid>,
    method_timer: Option<TimerId>,
    restart_timer: Option<TimerId>,
    fail_cnt: [u32; 5],
    req_reason: RestartOn,
}

impl Unit {
    pub(crate) fn new(path: ServicePath) -> Self {
        Self {
            path,
            spec: UnitSpec::default(),
            has_spec: false,
            state: UnitState::Uninitialised,
            target: UnitState::None,
            main_pid: 0,
            secondary_pid: 0,
            pids: Vec::new(),
            method_timer: None,
            restart_timer: None,
            fail_cnt: [0; 5],
            req_reason: RestartOn::None,
        }
    }

    /// The unit's path.
    pub fn path(&self) -> &ServicePath {
        &self.path
    }

    /// Current state.
    pub fn state(&self) -> UnitState {
        self.state
    }

    /// Pending target state.
    pub fn target(&self) -> UnitState {
        self.target
    }

    /// Main PID, 0 if none.
    pub fn main_pid(&self) -> Pid {
        self.main_pid
    }

    /// PID of the executing auxiliary method, 0 if none.
    pub fn secondary_pid(&self) -> Pid {
        self.secondary_pid
    }

    /// All tracked PIDs.
    pub fn pids(&self) -> &[Pid] {
        &self.pids
    }

    /// True if a method timer is armed.
    pub fn has_method_timer(&self) -> bool {
        self.method_timer.is_some()
    }

    /// Consecutive-failure count for a method slot.
    pub fn fail_count(&self, method: MethodKind) -> u32 {
        self.fail_cnt[method.index()]
    }

    /// True once the repository descriptor has been loaded.
    pub fn has_spec(&self) -> bool {
        self.has_spec
    }

    /// True if `pid` is in the PID set.
    pub fn has_pid(&self, pid: Pid) -> bool {
        self.pids.contains(&pid)
    }

    pub(crate) fn set_spec(&mut self, spec: UnitSpec) {
        self.spec = spec;
        self.has_spec = true;
    }

    // ---------------------------
    // Bookkeeping
    // ---------------------------

    fn stopping(&self) -> bool {
        self.state.is_stopping()
    }

    fn publish_state(&self, cx: &mut UnitCx<'_>) {
        cx.bus.publish(
            Event::now(EventKind::UnitStateEntered)
                .with_path(self.path.clone())
                .with_detail(self.state.as_str()),
        );
        tracing::debug!(path = %self.path, state = %self.state, "unit entered state");
    }

    fn reg_method_timer(&mut self, cx: &mut UnitCx<'_>) {
        debug_assert!(self.method_timer.is_none());
        self.method_timer = Some(cx.timers.add(
            cx.cfg.method_timeout,
            TimerPayload::Method(self.path.clone()),
        ));
    }

    fn dereg_method_timer(&mut self, cx: &mut UnitCx<'_>) {
        if let Some(id) = self.method_timer.take() {
            cx.timers.del(id);
        }
    }

    fn dereg_restart_timer(&mut self, cx: &mut UnitCx<'_>) {
        if let Some(id) = self.restart_timer.take() {
            cx.timers.del(id);
        }
    }

    /// Removes the PID from the set and stops tracking it.
    fn deregister_pid(&mut self, cx: &mut UnitCx<'_>, pid: Pid) {
        cx.tracker.disregard(pid);
        self.pids.retain(|p| *p != pid);
        if self.main_pid == pid {
            self.main_pid = 0;
        }
        if self.secondary_pid == pid {
            self.secondary_pid = 0;
        }
    }

    /// Forks a method, enrols the PID, and releases the handshake gate.
    ///
    /// Returns 0 on fork failure.
    fn fork_and_register(&mut self, cx: &mut UnitCx<'_>, method: MethodKind) -> Pid {
        let cmd = match self.spec.methods.get(method) {
            Some(cmd) => cmd.to_string(),
            None => return 0,
        };
        let pending = match cx
            .spawner
            .spawn_method(&self.path, method, &cmd, &cx.cfg.notify_socket)
        {
            Ok(pending) => pending,
            Err(err) => {
                tracing::error!(path = %self.path, %method, error = %err, "failed to fork");
                return 0;
            }
        };

        let pid = pending.pid();
        cx.tracker.watch(pid);
        self.pids.push(pid);
        pending.release();

        cx.bus.publish(
            Event::now(EventKind::MethodForked)
                .with_path(self.path.clone())
                .with_detail(method.as_str())
                .with_pid(pid),
        );
        pid
    }

    fn emit_state_change(&self, cx: &mut UnitCx<'_>, kind: StateChangeKind) {
        cx.notes
            .push(Note::state_change(kind, self.path.clone(), self.req_reason));
    }

    // ---------------------------
    // State entry
    // ---------------------------

    /// The single transition dispatcher.
    pub(crate) fn enter(&mut self, cx: &mut UnitCx<'_>, state: UnitState) {
        match state {
            UnitState::Offline => self.enter_offline(cx),
            UnitState::Maintenance => self.enter_maintenance(cx),
            UnitState::PreStart => self.enter_prestart(cx),
            UnitState::Start => self.enter_start(cx),
            UnitState::PostStart => self.enter_poststart(cx),
            UnitState::Online => self.enter_online(cx),
            UnitState::Stop => self.enter_stop(cx),
            UnitState::StopTerm => self.enter_stopterm(cx),
            UnitState::StopKill => self.enter_stopkill(cx),
            UnitState::PostStop => self.enter_poststop(cx),
            UnitState::None => {
                self.state = UnitState::None;
                self.publish_state(cx);
            }
            UnitState::Uninitialised => {
                tracing::warn!(path = %self.path, "refusing to re-enter uninitialised");
            }
        }
    }

    fn enter_target(&mut self, cx: &mut UnitCx<'_>) {
        let target = self.target;
        self.enter(cx, target);
    }

    /// Purge all PIDs if necessary then enter the pending target.
    /// Does not execute the stop method.
    fn purge_and_target(&mut self, cx: &mut UnitCx<'_>) {
        if self.pids.is_empty() {
            self.enter_target(cx);
        } else {
            self.enter_stopterm(cx);
        }
    }

    fn enter_prestart(&mut self, cx: &mut UnitCx<'_>) {
        if self.spec.methods.get(MethodKind::PreStart).is_some() {
            self.state = UnitState::PreStart;
            self.publish_state(cx);
            self.reg_method_timer(cx);
            self.main_pid = self.fork_and_register(cx, MethodKind::PreStart);
            if self.main_pid == 0 {
                self.fork_failed(cx);
            }
        } else {
            self.enter_start(cx);
        }
    }

    fn enter_start(&mut self, cx: &mut UnitCx<'_>) {
        if self.spec.methods.get(MethodKind::Start).is_none() {
            tracing::error!(path = %self.path, "no start method defined");
            self.target = UnitState::Maintenance;
            self.purge_and_target(cx);
            return;
        }

        self.state = UnitState::Start;
        self.publish_state(cx);
        self.main_pid = self.fork_and_register(cx, MethodKind::Start);
        if self.main_pid == 0 {
            self.fork_failed(cx);
            return;
        }
        match self.spec.utype {
            // These kinds are online as soon as the start process runs.
            UnitType::Simple | UnitType::Oneshot | UnitType::Group => self.enter_poststart(cx),
            // Otherwise wait for the method timer or a readiness note.
            UnitType::Forks => self.reg_method_timer(cx),
        }
    }

    fn enter_poststart(&mut self, cx: &mut UnitCx<'_>) {
        if self.spec.methods.get(MethodKind::PostStart).is_some() {
            self.state = UnitState::PostStart;
            self.publish_state(cx);
            self.reg_method_timer(cx);
            self.secondary_pid = self.fork_and_register(cx, MethodKind::PostStart);
            if self.secondary_pid == 0 {
                self.fork_failed(cx);
            }
        } else {
            self.enter_online(cx);
        }
    }

    fn enter_online(&mut self, cx: &mut UnitCx<'_>) {
        self.dereg_method_timer(cx);
        self.state = UnitState::Online;
        self.target = UnitState::None;
        self.fail_cnt = [0; 5];
        self.publish_state(cx);
        self.emit_state_change(cx, StateChangeKind::Online);
        if cx.cfg.is_repository_path(&self.path) {
            cx.bus
                .publish(Event::now(EventKind::RepositoryUp).with_path(self.path.clone()));
        }
    }

    fn enter_offline(&mut self, cx: &mut UnitCx<'_>) {
        self.state = UnitState::Offline;
        self.target = UnitState::None;
        self.publish_state(cx);
        self.emit_state_change(cx, StateChangeKind::Offline);
    }

    fn enter_maintenance(&mut self, cx: &mut UnitCx<'_>) {
        self.dereg_method_timer(cx);
        self.dereg_restart_timer(cx);
        self.state = UnitState::Maintenance;
        self.target = UnitState::None;
        self.publish_state(cx);
        cx.bus.publish(
            Event::now(EventKind::UnitMaintenance)
                .with_path(self.path.clone())
                .with_error("administrative action required"),
        );
        self.emit_state_change(cx, StateChangeKind::Maintenance);
    }

    fn enter_stop(&mut self, cx: &mut UnitCx<'_>) {
        if self.spec.methods.get(MethodKind::Stop).is_some() {
            self.state = UnitState::Stop;
            self.publish_state(cx);
            self.reg_method_timer(cx);
            self.secondary_pid = self.fork_and_register(cx, MethodKind::Stop);
            if self.secondary_pid == 0 {
                self.fork_failed(cx);
            }
        } else {
            self.enter_stopterm(cx);
        }
    }

    fn enter_stopterm(&mut self, cx: &mut UnitCx<'_>) {
        if self.pids.is_empty() {
            self.enter_poststop(cx);
            return;
        }

        self.state = UnitState::StopTerm;
        self.publish_state(cx);
        if self.main_pid != 0 {
            cx.spawner.kill(self.main_pid, KillSignal::Term);
        }
        self.reg_method_timer(cx);
        for pid in self.pids.clone() {
            cx.spawner.kill(pid, KillSignal::Term);
        }
    }

    fn enter_stopkill(&mut self, cx: &mut UnitCx<'_>) {
        if self.pids.is_empty() {
            self.enter_poststop(cx);
            return;
        }

        self.state = UnitState::StopKill;
        self.publish_state(cx);
        if self.main_pid != 0 {
            cx.spawner.kill(self.main_pid, KillSignal::Kill);
        }
        // We should never time out in this state.
        self.reg_method_timer(cx);
        for pid in self.pids.clone() {
            cx.spawner.kill(pid, KillSignal::Kill);
        }
    }

    fn enter_poststop(&mut self, cx: &mut UnitCx<'_>) {
        if self.spec.methods.get(MethodKind::PostStop).is_some() {
            self.state = UnitState::PostStop;
            self.publish_state(cx);
            self.reg_method_timer(cx);
            self.secondary_pid = self.fork_and_register(cx, MethodKind::PostStop);
            if self.secondary_pid == 0 {
                // Cleanup failures never block the landing.
                tracing::warn!(path = %self.path, "poststop fork failed, landing anyway");
                self.dereg_method_timer(cx);
                self.enter_target(cx);
            }
        } else {
            self.enter_target(cx);
        }
    }

    /// Failing to get a PID out of a fork is an exceptional case: the unit
    /// goes straight to maintenance.
    fn fork_failed(&mut self, cx: &mut UnitCx<'_>) {
        self.dereg_method_timer(cx);
        self.target = UnitState::Maintenance;
        self.purge_and_target(cx);
    }

    // ---------------------------
    // Failure policy
    // ---------------------------

    /// Counts one failure of `method` and either schedules a cool-down
    /// restart or lands the unit in maintenance.
    fn method_failure(&mut self, cx: &mut UnitCx<'_>, method: MethodKind) {
        self.fail_cnt[method.index()] += 1;
        if self.fail_cnt[method.index()] > cx.cfg.failure_limit {
            tracing::error!(
                path = %self.path,
                %method,
                limit = cx.cfg.failure_limit,
                "transitioning to maintenance: method failed more than the limit"
            );
            self.target = UnitState::Maintenance;
            self.purge_and_target(cx);
        } else {
            self.retry_start(cx);
        }
    }

    /// As [`Unit::purge_and_target`], but re-enters `PreStart` after the
    /// cool-down and re-entry delays.
    fn retry_start(&mut self, cx: &mut UnitCx<'_>) {
        self.target = UnitState::None;
        self.purge_and_target(cx);
        self.dereg_restart_timer(cx);
        self.restart_timer = Some(cx.timers.add(
            cx.cfg.restart_cooldown,
            TimerPayload::RestartCooldown(self.path.clone()),
        ));
        cx.bus.publish(
            Event::now(EventKind::RestartScheduled)
                .with_path(self.path.clone())
                .with_delay(cx.cfg.restart_cooldown),
        );
    }

    pub(crate) fn handle_restart_cooldown(&mut self, cx: &mut UnitCx<'_>) {
        self.restart_timer = Some(cx.timers.add(
            cx.cfg.restart_entry,
            TimerPayload::RestartEntry(self.path.clone()),
        ));
    }

    pub(crate) fn handle_restart_entry(&mut self, cx: &mut UnitCx<'_>) {
        self.restart_timer = None;
        match self.state {
            UnitState::None | UnitState::Offline | UnitState::Uninitialised => {
                self.enter_prestart(cx);
            }
            other => {
                tracing::debug!(path = %self.path, state = %other, "restart overtaken");
            }
        }
    }

    // ---------------------------
    // External inputs
    // ---------------------------

    /// Serves a start request from the graph engine.
    pub(crate) fn request_start(&mut self, cx: &mut UnitCx<'_>, reason: RestartOn) {
        match self.state {
            UnitState::Uninitialised | UnitState::Offline | UnitState::None => {
                tracing::info!(path = %self.path, "received request to bring up");
                self.dereg_restart_timer(cx);
                self.req_reason = reason;
                self.enter_prestart(cx);
            }
            UnitState::Maintenance => {
                // An explicit start after maintenance is administrative:
                // the slate is wiped.
                tracing::info!(path = %self.path, "leaving maintenance on start request");
                self.fail_cnt = [0; 5];
                self.req_reason = reason;
                self.enter_prestart(cx);
            }
            _ => {
                tracing::debug!(path = %self.path, state = %self.state, "ignoring start request");
            }
        }
    }

    /// Serves a stop request from the graph engine.
    pub(crate) fn request_stop(&mut self, cx: &mut UnitCx<'_>, reason: RestartOn) {
        if self.stopping() {
            tracing::debug!(path = %self.path, "already stopping");
            return;
        }
        if self.state == UnitState::Maintenance {
            tracing::debug!(path = %self.path, "ignoring stop request in maintenance");
            return;
        }
        tracing::info!(path = %self.path, "received request to bring down");
        self.req_reason = reason;
        self.dereg_method_timer(cx);
        self.dereg_restart_timer(cx);
        self.target = UnitState::Offline;
        self.enter_stop(cx);
    }

    /// Consumes a process tracker event for a PID belonging to this unit.
    pub(crate) fn handle_process_event(&mut self, cx: &mut UnitCx<'_>, ev: ProcessEvent) {
        // First of all, keep the PID set current.
        let (pid, exit) = match ev {
            ProcessEvent::Child { pid, .. } => {
                if self.has_pid(pid) {
                    tracing::warn!(path = %self.path, pid, "birth of a PID we already track");
                } else {
                    cx.tracker.watch(pid);
                    self.pids.push(pid);
                }
                return;
            }
            ProcessEvent::Exit { pid, status } => (pid, status),
        };

        let was_main = pid == self.main_pid;
        let was_secondary = pid == self.secondary_pid;
        self.deregister_pid(cx, pid);
        cx.bus.publish(
            Event::now(EventKind::ProcessExited)
                .with_path(self.path.clone())
                .with_pid(pid)
                .with_detail(exit.to_string()),
        );

        if self.stopping() {
            match self.state {
                UnitState::Stop if self.pids.is_empty() => {
                    self.dereg_method_timer(cx);
                    self.enter_stopterm(cx);
                }
                UnitState::StopTerm if self.pids.is_empty() => {
                    self.dereg_method_timer(cx);
                    self.enter_stopkill(cx);
                }
                UnitState::StopKill if self.pids.is_empty() => {
                    self.dereg_method_timer(cx);
                    self.enter_poststop(cx);
                }
                UnitState::PostStop if was_secondary => {
                    self.dereg_method_timer(cx);
                    if exit.is_abnormal() {
                        tracing::warn!(path = %self.path, %exit, "poststop method failed");
                    }
                    self.enter_target(cx);
                }
                _ => {}
            }
        } else if was_main {
            self.dereg_method_timer(cx);

            if exit.is_abnormal() {
                tracing::warn!(path = %self.path, %exit, "abnormal exit of main PID");
                if self.state == UnitState::Online {
                    // The graph engine decides restart policy from here.
                    self.req_reason = RestartOn::Error;
                    self.target = UnitState::Offline;
                    self.purge_and_target(cx);
                } else {
                    let method = self.state.method().unwrap_or(MethodKind::PreStart);
                    self.method_failure(cx, method);
                }
            } else {
                match self.state {
                    UnitState::PreStart => {
                        // Clean up any remnants, then begin the start method.
                        self.target = UnitState::Start;
                        self.purge_and_target(cx);
                    }
                    UnitState::Online | UnitState::PostStart => {
                        if self.spec.utype == UnitType::Simple {
                            self.req_reason = RestartOn::None;
                            self.target = UnitState::Offline;
                            self.enter_stop(cx);
                        } else if self.spec.utype != UnitType::Group && self.pids.is_empty() {
                            self.req_reason = RestartOn::None;
                            self.target = UnitState::Offline;
                            self.enter_stop(cx);
                        }
                    }
                    UnitState::Start => self.main_exited_during_start(cx),
                    _ => {}
                }
            }
        } else if was_secondary && self.state == UnitState::PostStart {
            self.dereg_method_timer(cx);
            if exit.is_abnormal() {
                tracing::warn!(path = %self.path, %exit, "abnormal exit of poststart method");
                self.method_failure(cx, MethodKind::PostStart);
            } else {
                self.enter_online(cx);
            }
        }
    }

    /// A `forks`-type start method exiting normally is the daemon
    /// detaching: adopt the real main PID from the pidfile if one is
    /// declared, otherwise keep waiting for a readiness notification.
    fn main_exited_during_start(&mut self, cx: &mut UnitCx<'_>) {
        if self.spec.utype != UnitType::Forks {
            return;
        }
        match self.spec.pidfile.clone() {
            Some(pidfile) => {
                let parsed = std::fs::read_to_string(&pidfile)
                    .ok()
                    .and_then(|text| text.trim().parse::<Pid>().ok());
                match parsed {
                    Some(new_main) => {
                        if !self.has_pid(new_main) {
                            cx.tracker.watch(new_main);
                            self.pids.push(new_main);
                        }
                        self.main_pid = new_main;
                        self.enter_poststart(cx);
                    }
                    None => {
                        tracing::warn!(path = %self.path, ?pidfile, "unreadable pidfile");
                        self.method_failure(cx, MethodKind::Start);
                    }
                }
            }
            None => {
                // No pidfile: the readiness budget keeps running.
                self.reg_method_timer(cx);
            }
        }
    }

    /// Reacts to the method timer firing.
    pub(crate) fn handle_method_timer(&mut self, cx: &mut UnitCx<'_>) {
        self.method_timer = None;
        cx.bus.publish(
            Event::now(EventKind::MethodTimeout)
                .with_path(self.path.clone())
                .with_detail(self.state.as_str()),
        );

        match self.state {
            UnitState::Stop => {
                tracing::warn!(path = %self.path, "stop method timed out");
                self.enter_stopterm(cx);
            }
            UnitState::StopTerm => {
                tracing::warn!(path = %self.path, "SIGTERM ignored, escalating");
                self.enter_stopkill(cx);
            }
            UnitState::StopKill => {
                tracing::error!(path = %self.path, "timeout in stopkill");
                self.enter_target(cx);
            }
            UnitState::PostStop => {
                tracing::warn!(path = %self.path, "poststop method timed out, landing anyway");
                self.enter_target(cx);
            }
            UnitState::PreStart | UnitState::Start => {
                self.fail_cnt[MethodKind::PreStart.index()] += 1;
                if self.fail_cnt[MethodKind::PreStart.index()] > cx.cfg.failure_limit {
                    tracing::error!(
                        path = %self.path,
                        "transitioning to maintenance: method timed out/failed past the limit"
                    );
                    self.target = UnitState::Maintenance;
                    self.purge_and_target(cx);
                } else {
                    self.retry_start(cx);
                }
            }
            other => {
                tracing::warn!(path = %self.path, state = %other, "timer fired in unexpected state");
            }
        }
    }

    /// The supervised child signalled readiness.
    pub(crate) fn notify_ready(&mut self, cx: &mut UnitCx<'_>) {
        if self.state == UnitState::Start {
            cx.bus
                .publish(Event::now(EventKind::UnitReady).with_path(self.path.clone()));
            self.dereg_method_timer(cx);
            self.enter_poststart(cx);
        }
    }

    /// Status annotation from the supervised child.
    pub(crate) fn notify_status(&mut self, cx: &mut UnitCx<'_>, status: &str) {
        tracing::info!(path = %self.path, status, "unit status update");
        cx.bus.publish(
            Event::now(EventKind::UnitStatus)
                .with_path(self.path.clone())
                .with_detail(status),
        );
    }

    /// Reassigns the main PID. The new PID must already be tracked.
    pub(crate) fn set_main_pid(&mut self, pid: Pid) -> bool {
        if self.has_pid(pid) {
            self.main_pid = pid;
            true
        } else {
            tracing::warn!(path = %self.path, pid, "MAINPID not in the PID set");
            false
        }
    }
}
