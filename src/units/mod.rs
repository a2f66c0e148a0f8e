//! # The restarter core.
//!
//! A [`Unit`] is the restarter's view of one service instance: its state
//! machine, its tracked PIDs, its method timers and failure counters. The
//! [`Restarter`] owns the unit table and the method spawner, routes process
//! events and timer firings to the owning unit, and serves start/stop
//! requests arriving from the graph engine on the note bus.
//!
//! ## Startup path
//! ```text
//! RestarterReq(Start)
//!   └─► PreStart ─► Start ─► PostStart ─► Online ─► StateChange(Online)
//! ```
//!
//! ## Shutdown path
//! ```text
//! RestarterReq(Stop)
//!   └─► Stop ─► StopTerm ─► StopKill ─► PostStop ─► target ─► StateChange(…)
//! ```
//!
//! Transient failures increment a per-method counter and schedule a
//! cool-down restart; past the limit the unit lands in `Maintenance` and
//! stays there until administrative action.

mod restarter;
mod spec;
mod state;
mod unit;

pub use restarter::{Restarter, RestarterCx};
pub use spec::UnitSpec;
pub use state::{MethodKind, Methods, UnitState, UnitType};
pub use unit::Unit;

pub(crate) use unit::UnitCx;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::advance;

    use crate::config::Config;
    use crate::events::Bus;
    use crate::notes::{Note, NoteQueue, RequestKind, RestartOn, StateChangeKind};
    use crate::path::ServicePath;
    use crate::process::{ExitStatus, KillSignal, ProcessEvent, SimSpawner, SimTracker};
    use crate::repository::{InstanceRecord, MemoryRepository};
    use crate::timers::{TimerPayload, TimerSet};

    use super::*;

    struct Rig {
        restarter: Restarter,
        spawner: SimSpawner,
        timers: TimerSet<TimerPayload>,
        notes: NoteQueue,
        bus: Bus,
        tracker: SimTracker,
        cfg: Config,
        repo: Arc<MemoryRepository>,
        path: ServicePath,
    }

    macro_rules! rcx {
        ($rig:expr) => {
            RestarterCx {
                timers: &mut $rig.timers,
                notes: &mut $rig.notes,
                bus: &$rig.bus,
                tracker: &mut $rig.tracker,
                cfg: &$rig.cfg,
            }
        };
    }

    impl Rig {
        fn new(spec: UnitSpec) -> Self {
            let path = ServicePath::instance("svc", "main");
            let repo = Arc::new(MemoryRepository::new());
            repo.put_instance(InstanceRecord {
                path: path.clone(),
                unit: spec,
                depgroups: vec![],
            });
            let spawner = SimSpawner::new();
            let (tracker, _handle) = SimTracker::new();
            Rig {
                restarter: Restarter::new(Box::new(spawner.clone())),
                spawner,
                timers: TimerSet::new(),
                notes: NoteQueue::new(),
                bus: Bus::new(64),
                tracker,
                cfg: Config::default(),
                repo,
                path,
            }
        }

        fn request(&mut self, kind: RequestKind) {
            let path = self.path.clone();
            let repo = self.repo.clone();
            self.restarter
                .handle_request(&path, kind, RestartOn::Restart, repo.as_ref(), &mut rcx!(self))
                .unwrap();
        }

        fn exit(&mut self, pid: crate::process::Pid, status: ExitStatus) {
            self.restarter
                .handle_process_event(ProcessEvent::Exit { pid, status }, &mut rcx!(self));
        }

        fn fire_due_timers(&mut self) {
            loop {
                let Some((_, payload)) = self.timers.poll_now() else {
                    break;
                };
                self.restarter.handle_timer(payload, &mut rcx!(self));
            }
        }

        fn state(&self) -> UnitState {
            self.restarter.unit(&self.path).unwrap().state()
        }

        fn unit(&self) -> &Unit {
            self.restarter.unit(&self.path).unwrap()
        }

        fn drain_notes(&mut self) -> Vec<Note> {
            let mut out = Vec::new();
            while let Some(n) = self.notes.pop() {
                out.push(n);
            }
            out
        }
    }

    fn simple_spec() -> UnitSpec {
        UnitSpec::new(UnitType::Simple).with_method(MethodKind::Start, "/bin/true")
    }

    fn forks_spec() -> UnitSpec {
        UnitSpec::new(UnitType::Forks).with_method(MethodKind::Start, "/usr/sbin/mydaemon")
    }

    #[tokio::test(start_paused = true)]
    async fn simple_unit_clean_start() {
        let mut rig = Rig::new(simple_spec());
        rig.request(RequestKind::Start);

        // PreStart is skipped (no method), start is forked, and simple
        // units are online as soon as start runs.
        assert_eq!(rig.state(), UnitState::Online);
        let spawned = rig.spawner.spawned();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].method, MethodKind::Start);
        assert_eq!(rig.unit().main_pid(), spawned[0].pid);
        assert!(rig.unit().has_pid(spawned[0].pid));
        assert!(!rig.unit().has_method_timer());

        let notes = rig.drain_notes();
        assert!(notes.iter().any(|n| matches!(
            n,
            Note::StateChange { kind: StateChangeKind::Online, .. }
        )));
        rig.restarter.verify_invariants().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn prestart_runs_before_start() {
        let mut rig = Rig::new(
            UnitSpec::new(UnitType::Simple)
                .with_method(MethodKind::PreStart, "/bin/mkdir -p /run/svc")
                .with_method(MethodKind::Start, "/bin/true"),
        );
        rig.request(RequestKind::Start);
        assert_eq!(rig.state(), UnitState::PreStart);
        assert!(rig.unit().has_method_timer());

        let prestart_pid = rig.spawner.last_spawned().unwrap().pid;
        rig.exit(prestart_pid, ExitStatus::Exited(0));

        assert_eq!(rig.state(), UnitState::Online);
        let methods: Vec<MethodKind> = rig.spawner.spawned().iter().map(|s| s.method).collect();
        assert_eq!(methods, vec![MethodKind::PreStart, MethodKind::Start]);
        rig.restarter.verify_invariants().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unit_add_is_idempotent() {
        let mut rig = Rig::new(simple_spec());
        let path = rig.path.clone();
        rig.restarter.unit_add(&path);
        let before = rig.restarter.units().count();
        rig.restarter.unit_add(&path);
        assert_eq!(rig.restarter.units().count(), before);
        assert_eq!(rig.state(), UnitState::Uninitialised);
        assert!(rig.unit().pids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_advances_a_forks_unit() {
        let mut rig = Rig::new(forks_spec());
        rig.request(RequestKind::Start);
        assert_eq!(rig.state(), UnitState::Start);
        assert!(rig.unit().has_method_timer());

        let pid = rig.unit().main_pid();
        rig.restarter.notify_ready(pid, &mut rcx!(rig));
        assert_eq!(rig.state(), UnitState::Online);
        assert!(!rig.unit().has_method_timer());
        rig.restarter.verify_invariants().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn five_abnormal_exits_retry_the_sixth_lands_in_maintenance() {
        let mut rig = Rig::new(forks_spec());
        rig.request(RequestKind::Start);

        for round in 1..=5 {
            let pid = rig.unit().main_pid();
            rig.exit(pid, ExitStatus::Exited(1));
            assert_eq!(rig.unit().fail_count(MethodKind::Start), round);
            assert_ne!(rig.state(), UnitState::Maintenance);

            // Cool-down, then the re-entry delay, then prestart→start.
            advance(Duration::from_millis(4999)).await;
            rig.fire_due_timers();
            assert_ne!(rig.state(), UnitState::Start, "cooldown not over yet");
            advance(Duration::from_millis(1)).await;
            rig.fire_due_timers();
            advance(Duration::from_millis(500)).await;
            rig.fire_due_timers();
            assert_eq!(rig.state(), UnitState::Start, "round {round} restarted");
        }

        let pid = rig.unit().main_pid();
        rig.exit(pid, ExitStatus::Exited(1));
        assert_eq!(rig.state(), UnitState::Maintenance);
        assert!(rig.unit().pids().is_empty());
        assert!(!rig.unit().has_method_timer());

        // No further timers may bring it back.
        advance(Duration::from_secs(30)).await;
        rig.fire_due_timers();
        assert_eq!(rig.state(), UnitState::Maintenance);
        rig.restarter.verify_invariants().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_escalates_term_then_kill_then_lands_offline() {
        let mut rig = Rig::new(forks_spec());
        rig.request(RequestKind::Start);
        let pid = rig.unit().main_pid();
        rig.restarter.notify_ready(pid, &mut rcx!(rig));
        assert_eq!(rig.state(), UnitState::Online);
        rig.drain_notes();

        rig.request(RequestKind::Stop);
        assert_eq!(rig.state(), UnitState::StopTerm);
        assert!(rig
            .spawner
            .kills()
            .iter()
            .any(|(p, sig)| *p == pid && *sig == KillSignal::Term));

        // The child ignores SIGTERM: the method budget elapses and the
        // restarter escalates.
        advance(Duration::from_millis(2000)).await;
        rig.fire_due_timers();
        assert_eq!(rig.state(), UnitState::StopKill);
        assert!(rig
            .spawner
            .kills()
            .iter()
            .any(|(p, sig)| *p == pid && *sig == KillSignal::Kill));

        rig.exit(pid, ExitStatus::Signaled(9));
        assert_eq!(rig.state(), UnitState::Offline);
        assert!(rig.unit().pids().is_empty());

        let notes = rig.drain_notes();
        assert!(notes.iter().any(|n| matches!(
            n,
            Note::StateChange { kind: StateChangeKind::Offline, .. }
        )));
        rig.restarter.verify_invariants().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_method_runs_before_signalling() {
        let mut rig = Rig::new(
            UnitSpec::new(UnitType::Forks)
                .with_method(MethodKind::Start, "/usr/sbin/mydaemon")
                .with_method(MethodKind::Stop, "/usr/sbin/mydaemon --shutdown"),
        );
        rig.request(RequestKind::Start);
        let main = rig.unit().main_pid();
        rig.restarter.notify_ready(main, &mut rcx!(rig));

        rig.request(RequestKind::Stop);
        assert_eq!(rig.state(), UnitState::Stop);
        let stop_pid = rig.spawner.last_spawned().unwrap().pid;
        assert_eq!(rig.unit().secondary_pid(), stop_pid);

        // The stop method exits, the daemon too: straight landing.
        rig.exit(stop_pid, ExitStatus::Exited(0));
        rig.exit(main, ExitStatus::Exited(0));
        assert_eq!(rig.state(), UnitState::Offline);
        rig.restarter.verify_invariants().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn poststop_runs_after_the_pid_set_empties() {
        let mut rig = Rig::new(
            UnitSpec::new(UnitType::Simple)
                .with_method(MethodKind::Start, "/bin/true")
                .with_method(MethodKind::PostStop, "/bin/rm -f /run/svc.lock"),
        );
        rig.request(RequestKind::Start);
        let main = rig.unit().main_pid();
        rig.drain_notes();

        rig.request(RequestKind::Stop);
        rig.exit(main, ExitStatus::Signaled(15));
        assert_eq!(rig.state(), UnitState::PostStop);

        let poststop_pid = rig.spawner.last_spawned().unwrap().pid;
        rig.exit(poststop_pid, ExitStatus::Exited(0));
        assert_eq!(rig.state(), UnitState::Offline);
        rig.restarter.verify_invariants().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn start_timeout_counts_like_a_transient_failure() {
        let mut rig = Rig::new(forks_spec());
        rig.request(RequestKind::Start);
        let pid = rig.unit().main_pid();

        advance(Duration::from_millis(2000)).await;
        rig.fire_due_timers();
        assert_eq!(rig.unit().fail_count(MethodKind::PreStart), 1);
        // The stale method child is purged on the way out.
        assert!(rig
            .spawner
            .kills()
            .iter()
            .any(|(p, sig)| *p == pid && *sig == KillSignal::Term));
        rig.restarter.verify_invariants().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fork_failure_lands_in_maintenance_immediately() {
        let mut rig = Rig::new(simple_spec());
        rig.spawner.fail_next();
        rig.request(RequestKind::Start);
        assert_eq!(rig.state(), UnitState::Maintenance);
        assert!(rig.unit().pids().is_empty());
        rig.restarter.verify_invariants().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_exit_while_online_hands_policy_to_the_graph() {
        let mut rig = Rig::new(simple_spec());
        rig.request(RequestKind::Start);
        let pid = rig.unit().main_pid();
        rig.drain_notes();

        rig.exit(pid, ExitStatus::Signaled(11));
        assert_eq!(rig.state(), UnitState::Offline);

        let notes = rig.drain_notes();
        // The offline note carries error severity for restart gating.
        assert!(notes.iter().any(|n| matches!(
            n,
            Note::StateChange {
                kind: StateChangeKind::Offline,
                reason: RestartOn::Error,
                ..
            }
        )));
        assert_eq!(rig.unit().fail_count(MethodKind::Start), 0);
        rig.restarter.verify_invariants().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn main_pid_reassignment_requires_a_tracked_pid() {
        let mut rig = Rig::new(forks_spec());
        rig.request(RequestKind::Start);
        let old_main = rig.unit().main_pid();

        // A forked grandchild surfaces as a Child event, then claims
        // MAINPID.
        rig.restarter.handle_process_event(
            ProcessEvent::Child {
                parent: old_main,
                pid: 4242,
            },
            &mut rcx!(rig),
        );
        rig.restarter.notify_main_pid(old_main, 4242);
        assert_eq!(rig.unit().main_pid(), 4242);

        // An untracked PID is refused.
        rig.restarter.notify_main_pid(4242, 9999);
        assert_eq!(rig.unit().main_pid(), 4242);
        rig.restarter.verify_invariants().unwrap();
    }
}
