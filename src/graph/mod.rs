//! # The dependency graph engine.
//!
//! A vertex exists for each service, each instance, and each dependency
//! group. Dependency edges are generated like so:
//!
//! - Service → Service's instances
//! - Service → Service's dependency groups
//! - Instance → Instance's dependency groups (own and inherited)
//! - Dependency group → the group's targets (services and instances)
//!
//! The engine computes satisfiability under the four quantifier kinds,
//! reacts to state-change and administrative notes, and issues start/stop
//! decisions onto the note bus.

mod engine;
mod satisfy;
mod vertex;

pub use engine::GraphEngine;
pub use satisfy::{can_come_up, can_go_down, deps_satisfied, is_running, Satisfiability};
pub use vertex::{Edge, Graph, Vertex, VertexId, VertexKind, VertexState};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::events::Bus;
    use crate::notes::{AdminKind, Note, NoteQueue, RequestKind, RestartOn, StateChangeKind};
    use crate::path::ServicePath;
    use crate::repository::{
        DepGroup, GroupKind, InstanceRecord, MemoryRepository, RepoEntry, Repository,
        ServiceRecord,
    };
    use crate::units::{MethodKind, UnitSpec, UnitType};

    use super::*;

    struct Rig {
        engine: GraphEngine,
        repo: Arc<MemoryRepository>,
        bus: Bus,
        notes: NoteQueue,
    }

    impl Rig {
        fn new() -> Self {
            let repo = Arc::new(MemoryRepository::new());
            Self {
                engine: GraphEngine::new(repo.clone()),
                repo,
                bus: Bus::new(64),
                notes: NoteQueue::new(),
            }
        }

        fn add_instance(&self, svc: &str, inst: &str, depgroups: Vec<DepGroup>) -> ServicePath {
            let path = ServicePath::instance(svc, inst);
            self.repo.put_instance(InstanceRecord {
                path: path.clone(),
                unit: UnitSpec::new(UnitType::Simple).with_method(MethodKind::Start, "/bin/true"),
                depgroups,
            });
            self.repo.put_service(ServiceRecord {
                path: ServicePath::service(svc),
                instances: vec![path.clone()],
                depgroups: vec![],
            });
            path
        }

        fn install(&mut self, svcs: &[&str]) {
            for svc in svcs {
                match self.repo.lookup(&ServicePath::service(*svc)).unwrap() {
                    RepoEntry::Service(rec) => {
                        self.engine.install_service(&rec);
                    }
                    other => panic!("expected service record, got {other:?}"),
                }
            }
            self.engine.setup_all(&self.bus).unwrap();
        }

        /// Drains the queue, answering restarter requests the way a
        /// perfectly obedient restarter would. Returns everything seen.
        fn drain(&mut self) -> Vec<Note> {
            let mut seen = Vec::new();
            while let Some(note) = self.notes.pop() {
                seen.push(note.clone());
                match &note {
                    Note::RestarterReq { path, kind, reason } => {
                        let kind = match kind {
                            RequestKind::Start => StateChangeKind::Online,
                            RequestKind::Stop => StateChangeKind::Offline,
                        };
                        self.notes
                            .push(Note::state_change(kind, path.clone(), *reason));
                    }
                    _ => self.engine.process_note(&note, &mut self.notes, &self.bus),
                }
            }
            seen
        }

        /// Processes notes through the engine only, leaving restarter
        /// requests unanswered in the returned list.
        fn drain_graph_only(&mut self) -> Vec<Note> {
            let mut requests = Vec::new();
            while let Some(note) = self.notes.pop() {
                match &note {
                    Note::RestarterReq { .. } => requests.push(note),
                    _ => self.engine.process_note(&note, &mut self.notes, &self.bus),
                }
            }
            requests
        }

        fn push_state(&mut self, kind: StateChangeKind, path: &ServicePath, reason: RestartOn) {
            self.notes
                .push(Note::state_change(kind, path.clone(), reason));
        }

        fn push_admin(&mut self, kind: AdminKind, path: &ServicePath) {
            self.notes
                .push(Note::admin(kind, path.clone(), RestartOn::Restart));
        }

        fn flags(&self, path: &ServicePath) -> (VertexState, bool, bool, bool) {
            let v = self.engine.vertex_by_path(path).unwrap();
            (v.state(), v.is_enabled(), v.to_offline(), v.to_disable())
        }
    }

    fn group(kind: GroupKind, restart_on: RestartOn, targets: &[ServicePath]) -> DepGroup {
        DepGroup {
            name: "deps".into(),
            kind,
            restart_on,
            targets: targets.to_vec(),
        }
    }

    #[test]
    fn enable_brings_a_satisfied_instance_online() {
        let mut rig = Rig::new();
        let ai = rig.add_instance("a", "i", vec![]);
        rig.install(&["a"]);

        rig.push_admin(AdminKind::Enable, &ai);
        let seen = rig.drain();

        let state_changes: Vec<&Note> = seen
            .iter()
            .filter(|n| matches!(n, Note::StateChange { .. } | Note::RestarterReq { .. }))
            .collect();
        // Offline bootstrap first, then the start decision.
        assert!(matches!(
            state_changes[0],
            Note::StateChange {
                kind: StateChangeKind::Offline,
                ..
            }
        ));
        assert!(seen.iter().any(|n| matches!(
            n,
            Note::RestarterReq {
                kind: RequestKind::Start,
                ..
            }
        )));
        assert_eq!(rig.flags(&ai).0, VertexState::Online);
        rig.engine.graph().verify_invariants().unwrap();
    }

    #[test]
    fn install_service_is_idempotent() {
        let mut rig = Rig::new();
        rig.add_instance("a", "i", vec![]);
        rig.install(&["a"]);

        let vertices = rig.engine.graph().len();
        let edges: usize = rig
            .engine
            .graph()
            .iter()
            .map(|(_, v)| v.dependencies().len())
            .sum();

        rig.install(&["a"]);
        let edges_after: usize = rig
            .engine
            .graph()
            .iter()
            .map(|(_, v)| v.dependencies().len())
            .sum();
        assert_eq!(rig.engine.graph().len(), vertices);
        assert_eq!(edges_after, edges);
    }

    #[test]
    fn mutual_requirement_rejects_the_second_edge() {
        let mut rig = Rig::new();
        let ai = ServicePath::instance("a", "i");
        let bi = ServicePath::instance("b", "i");
        rig.add_instance("a", "i", vec![group(GroupKind::RequireAll, RestartOn::Any, &[bi.clone()])]);
        rig.add_instance("b", "i", vec![group(GroupKind::RequireAll, RestartOn::Any, &[ai.clone()])]);
        rig.install(&["a", "b"]);

        let ga = rig.engine.vertex_by_path(&ai.depgroup(0)).unwrap();
        let gb = rig.engine.vertex_by_path(&bi.depgroup(0)).unwrap();
        let group_target_edges = ga.dependencies().len() + gb.dependencies().len();
        assert_eq!(group_target_edges, 1, "exactly one group→target edge survives");
        rig.engine.graph().verify_invariants().unwrap();
    }

    #[test]
    fn exclusion_tracks_the_target_lifecycle() {
        let mut rig = Rig::new();
        let bi = ServicePath::instance("b", "i");
        let ai = rig.add_instance(
            "a",
            "i",
            vec![group(GroupKind::ExcludeAll, RestartOn::None, &[bi.clone()])],
        );
        rig.add_instance("b", "i", vec![]);
        rig.install(&["a", "b"]);

        rig.push_state(StateChangeKind::Online, &bi, RestartOn::None);
        rig.drain_graph_only();
        assert_eq!(
            rig.engine.deps_satisfied(&ai, true),
            Some(Satisfiability::Unsatisfiable)
        );

        rig.push_state(StateChangeKind::Offline, &bi, RestartOn::None);
        rig.drain_graph_only();
        assert_eq!(
            rig.engine.deps_satisfied(&ai, true),
            Some(Satisfiability::Unsatisfied)
        );

        rig.push_state(StateChangeKind::Disabled, &bi, RestartOn::None);
        rig.drain_graph_only();
        assert_eq!(
            rig.engine.deps_satisfied(&ai, true),
            Some(Satisfiability::Satisfied)
        );
    }

    #[test]
    fn stop_propagation_is_cut_below_the_subscribed_severity() {
        let mut rig = Rig::new();
        let xi = ServicePath::instance("x", "i");
        let ai = rig.add_instance(
            "a",
            "i",
            vec![group(GroupKind::RequireAll, RestartOn::Error, &[xi.clone()])],
        );
        rig.add_instance("x", "i", vec![]);
        rig.install(&["a", "x"]);

        // Both online.
        rig.push_state(StateChangeKind::Online, &xi, RestartOn::None);
        rig.push_state(StateChangeKind::Online, &ai, RestartOn::None);
        rig.drain_graph_only();

        // A restart-severity stop is below the group's Error subscription:
        // no stop is propagated to a.
        rig.push_state(StateChangeKind::Offline, &xi, RestartOn::Restart);
        let requests = rig.drain_graph_only();
        assert!(!requests.iter().any(|n| matches!(
            n,
            Note::RestarterReq { kind: RequestKind::Stop, path, .. } if path == &ai
        )));

        // Bring x back up, then stop it for an error: now a is stopped.
        rig.push_state(StateChangeKind::Online, &xi, RestartOn::None);
        rig.push_state(StateChangeKind::Online, &ai, RestartOn::None);
        rig.drain_graph_only();
        rig.push_state(StateChangeKind::Offline, &xi, RestartOn::Error);
        let requests = rig.drain_graph_only();
        assert!(requests.iter().any(|n| matches!(
            n,
            Note::RestarterReq { kind: RequestKind::Stop, path, .. } if path == &ai
        )));
    }

    #[test]
    fn disable_completes_through_offline_into_disabled() {
        let mut rig = Rig::new();
        let ai = rig.add_instance("a", "i", vec![]);
        rig.install(&["a"]);

        rig.push_admin(AdminKind::Enable, &ai);
        rig.drain();
        assert_eq!(rig.flags(&ai).0, VertexState::Online);

        rig.push_admin(AdminKind::Disable, &ai);
        let seen = rig.drain();
        assert!(seen.iter().any(|n| matches!(
            n,
            Note::RestarterReq { kind: RequestKind::Stop, .. }
        )));
        assert!(seen.iter().any(|n| matches!(
            n,
            Note::StateChange { kind: StateChangeKind::Disabled, .. }
        )));
        assert_eq!(
            rig.flags(&ai),
            (VertexState::Disabled, false, false, false)
        );
    }

    #[test]
    fn enable_then_disable_equals_disable_once() {
        let mut once = Rig::new();
        let ai = once.add_instance("a", "i", vec![]);
        once.install(&["a"]);
        once.push_admin(AdminKind::Disable, &ai);
        once.drain();

        let mut round = Rig::new();
        round.add_instance("a", "i", vec![]);
        round.install(&["a"]);
        round.push_admin(AdminKind::Enable, &ai);
        round.drain();
        round.push_admin(AdminKind::Disable, &ai);
        round.drain();

        assert_eq!(once.flags(&ai), round.flags(&ai));
    }

    #[test]
    fn notes_for_unknown_paths_are_discarded() {
        let mut rig = Rig::new();
        rig.add_instance("a", "i", vec![]);
        rig.install(&["a"]);

        rig.push_state(
            StateChangeKind::Online,
            &ServicePath::instance("ghost", "i"),
            RestartOn::None,
        );
        let requests = rig.drain_graph_only();
        assert!(requests.is_empty());
    }

    #[test]
    fn maintenance_marks_the_vertex_unsatisfiable() {
        let mut rig = Rig::new();
        let bi = ServicePath::instance("b", "i");
        let ai = rig.add_instance(
            "a",
            "i",
            vec![group(GroupKind::RequireAll, RestartOn::Any, &[bi.clone()])],
        );
        rig.add_instance("b", "i", vec![]);
        rig.install(&["a", "b"]);

        rig.push_state(StateChangeKind::Maintenance, &bi, RestartOn::Error);
        rig.drain_graph_only();
        assert_eq!(rig.flags(&bi).0, VertexState::Maintenance);
        assert_eq!(
            rig.engine.deps_satisfied(&ai, true),
            Some(Satisfiability::Unsatisfiable)
        );
        assert_eq!(rig.engine.can_come_up(&ai), Some(false));
    }
}
