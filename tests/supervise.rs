//! End-to-end supervision scenarios over deterministic backends.
//!
//! A full [`Manager`] is driven by hand: notes go in through `step_note`,
//! process exits through `step_process_event`, and timers through paused
//! tokio time plus `run_due_timers`. The spawner and tracker are the sim
//! backends, so every fork and kill is a ledger entry.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::advance;

use unitvisor::{
    AdminKind, Config, DepGroup, ExitStatus, GroupKind, InstanceRecord, KillSignal, Manager,
    MemoryRepository, MethodKind, Note, NotifyDirective, NotifyMessage, ProcessEvent, RestartOn,
    ServicePath, ServiceRecord, SimSpawner, SimTracker, UnitSpec, UnitState, UnitType,
    VertexState,
};

struct World {
    manager: Manager,
    spawner: SimSpawner,
    repo: Arc<MemoryRepository>,
}

impl World {
    fn new() -> Self {
        let repo = Arc::new(MemoryRepository::new());
        let spawner = SimSpawner::new();
        let (tracker, _handle) = SimTracker::new();
        let manager = Manager::new(
            Config::default(),
            repo.clone(),
            Box::new(tracker),
            Box::new(spawner.clone()),
            Vec::new(),
        );
        World {
            manager,
            spawner,
            repo,
        }
    }

    fn add_service(&self, svc: &str, inst: &str, unit: UnitSpec, depgroups: Vec<DepGroup>) {
        let path = ServicePath::instance(svc, inst);
        self.repo.put_instance(InstanceRecord {
            path: path.clone(),
            unit,
            depgroups,
        });
        self.repo.put_service(ServiceRecord {
            path: ServicePath::service(svc),
            instances: vec![path],
            depgroups: vec![],
        });
    }

    fn install(&mut self, svcs: &[&str]) {
        for svc in svcs {
            match self.repo.lookup_service(svc) {
                Some(rec) => self.manager.install_service(&rec),
                None => panic!("service {svc} not in repository"),
            }
        }
        self.manager.setup_graph();
    }

    fn enable(&mut self, path: &ServicePath) {
        self.manager.step_note(Note::admin(
            AdminKind::Enable,
            path.clone(),
            RestartOn::Restart,
        ));
    }

    fn disable(&mut self, path: &ServicePath) {
        self.manager.step_note(Note::admin(
            AdminKind::Disable,
            path.clone(),
            RestartOn::Restart,
        ));
    }

    fn exit(&mut self, pid: unitvisor::Pid, status: ExitStatus) {
        self.manager
            .step_process_event(ProcessEvent::Exit { pid, status });
    }

    fn ready(&mut self, pid: unitvisor::Pid) {
        self.manager.on_notify(NotifyMessage {
            pid: Some(pid),
            directives: vec![NotifyDirective::Ready],
        });
    }
}

trait RepoExt {
    fn lookup_service(&self, svc: &str) -> Option<ServiceRecord>;
}

impl RepoExt for MemoryRepository {
    fn lookup_service(&self, svc: &str) -> Option<ServiceRecord> {
        use unitvisor::{RepoEntry, Repository};
        match self.lookup(&ServicePath::service(svc)) {
            Ok(RepoEntry::Service(rec)) => Some(rec),
            _ => None,
        }
    }
}

fn simple_unit() -> UnitSpec {
    UnitSpec::new(UnitType::Simple).with_method(MethodKind::Start, "/bin/true")
}

fn forks_unit() -> UnitSpec {
    UnitSpec::new(UnitType::Forks).with_method(MethodKind::Start, "/usr/sbin/mydaemon")
}

#[tokio::test(start_paused = true)]
async fn enable_drives_a_simple_unit_online() {
    let mut world = World::new();
    world.add_service("a", "i", simple_unit(), vec![]);
    world.install(&["a"]);

    let ai = ServicePath::instance("a", "i");
    world.enable(&ai);

    assert_eq!(world.manager.unit_state(&ai), Some(UnitState::Online));
    assert_eq!(world.manager.vertex_state(&ai), Some(VertexState::Online));

    let spawned = world.spawner.spawned();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].cmd, "/bin/true");
    world.manager.verify_invariants().unwrap();
}

#[tokio::test(start_paused = true)]
async fn disable_escalates_past_a_term_ignoring_child() {
    let mut world = World::new();
    world.add_service("a", "i", forks_unit(), vec![]);
    world.install(&["a"]);

    let ai = ServicePath::instance("a", "i");
    world.enable(&ai);
    assert_eq!(world.manager.unit_state(&ai), Some(UnitState::Start));

    let main = world.spawner.last_spawned().unwrap().pid;
    world.ready(main);
    assert_eq!(world.manager.unit_state(&ai), Some(UnitState::Online));

    world.disable(&ai);
    assert_eq!(world.manager.unit_state(&ai), Some(UnitState::StopTerm));

    // SIGTERM is ignored; after the method budget the restarter escalates.
    advance(Duration::from_millis(2000)).await;
    world.manager.run_due_timers();
    assert_eq!(world.manager.unit_state(&ai), Some(UnitState::StopKill));

    world.exit(main, ExitStatus::Signaled(9));
    assert_eq!(world.manager.unit_state(&ai), Some(UnitState::Offline));
    assert_eq!(world.manager.vertex_state(&ai), Some(VertexState::Disabled));

    let kills = world.spawner.kills();
    let first_kill = kills.iter().position(|(_, s)| *s == KillSignal::Kill);
    let first_term = kills.iter().position(|(_, s)| *s == KillSignal::Term);
    assert!(first_term.unwrap() < first_kill.unwrap());
    assert!(world.manager.restarter().unit(&ai).unwrap().pids().is_empty());
    world.manager.verify_invariants().unwrap();
}

#[tokio::test(start_paused = true)]
async fn dependents_follow_their_dependency_up() {
    let mut world = World::new();
    let ai = ServicePath::instance("a", "i");
    world.add_service("a", "i", simple_unit(), vec![]);
    world.add_service(
        "b",
        "i",
        simple_unit(),
        vec![DepGroup {
            name: "needs-a".into(),
            kind: GroupKind::RequireAll,
            restart_on: RestartOn::Any,
            targets: vec![ai.clone()],
        }],
    );
    world.install(&["a", "b"]);

    let bi = ServicePath::instance("b", "i");
    // b cannot come up yet: its dependency is down.
    world.enable(&bi);
    assert_eq!(world.manager.unit_state(&bi), None);

    // a coming up pulls b along.
    world.enable(&ai);
    assert_eq!(world.manager.unit_state(&ai), Some(UnitState::Online));
    assert_eq!(world.manager.unit_state(&bi), Some(UnitState::Online));

    let order: Vec<ServicePath> = world
        .spawner
        .spawned()
        .iter()
        .map(|s| s.path.clone())
        .collect();
    assert_eq!(order, vec![ai, bi]);
    world.manager.verify_invariants().unwrap();
}

#[tokio::test(start_paused = true)]
async fn a_crashing_dependency_stops_its_dependents() {
    let mut world = World::new();
    let ai = ServicePath::instance("a", "i");
    world.add_service("a", "i", forks_unit(), vec![]);
    world.add_service(
        "b",
        "i",
        simple_unit(),
        vec![DepGroup {
            name: "needs-a".into(),
            kind: GroupKind::RequireAll,
            restart_on: RestartOn::Error,
            targets: vec![ai.clone()],
        }],
    );
    world.install(&["a", "b"]);

    let bi = ServicePath::instance("b", "i");
    world.enable(&bi); // waits on its dependency
    world.enable(&ai);
    let a_main = world.spawner.last_spawned().unwrap().pid;
    world.ready(a_main);

    // a coming online pulled b up behind it.
    assert_eq!(world.manager.unit_state(&bi), Some(UnitState::Online));
    let b_main = world.spawner.last_spawned().unwrap().pid;

    // a crashes: the offline note carries error severity, which the
    // error-subscribed group propagates to b as a stop.
    world.exit(a_main, ExitStatus::Signaled(11));
    assert_eq!(world.manager.unit_state(&bi), Some(UnitState::StopTerm));
    assert!(world
        .spawner
        .kills()
        .iter()
        .any(|(pid, sig)| *pid == b_main && *sig == KillSignal::Term));

    world.exit(b_main, ExitStatus::Signaled(15));
    assert_eq!(world.manager.unit_state(&bi), Some(UnitState::Offline));
    world.manager.verify_invariants().unwrap();
}
