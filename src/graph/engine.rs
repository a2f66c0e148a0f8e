//! # The graph engine.
//!
//! Maintains the typed dependency graph, reacts to state-change and
//! administrative notes, and issues start/stop decisions onto the note bus.
//!
//! ## Construction
//! [`GraphEngine::install_service`] creates service and instance vertices
//! (find-or-add) and links them; [`GraphEngine::setup_vertex`] then pulls
//! dependency groups from the repository, synthesizes group vertices in the
//! path namespace (`…#depgroups/<n>`), and inserts edges behind the
//! reachability check — a prospective edge whose target can already reach
//! its owner is refused and logged as a cyclical dependency.
//!
//! ## Propagation
//! Note processing walks dependents (notify-start, notify-stop,
//! notify-misc) and dependencies (offlining). Stop propagation is gated:
//! when it crosses a dependency group whose `restart_on` severity is below
//! the triggering reason, the walk is cut. `ExcludeAll` groups never
//! propagate stops downward.

use std::sync::Arc;

use crate::error::RepoError;
use crate::events::{Bus, Event, EventKind};
use crate::notes::{AdminKind, Note, NoteQueue, RequestKind, RestartOn, StateChangeKind};
use crate::path::ServicePath;
use crate::repository::{DepGroup, GroupKind, RepoEntry, Repository, ServiceRecord};

use super::satisfy::{can_come_up, can_go_down, deps_satisfied, is_running, Satisfiability};
use super::vertex::{Graph, Vertex, VertexId, VertexKind, VertexState};

/// Typed dependency graph plus its note reactions.
pub struct GraphEngine {
    graph: Graph,
    repo: Arc<dyn Repository>,
}

impl GraphEngine {
    /// Creates an engine over the given repository.
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            graph: Graph::new(),
            repo,
        }
    }

    /// Read access to the underlying graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Vertex lookup by path.
    pub fn vertex_by_path(&self, path: &ServicePath) -> Option<&Vertex> {
        self.graph.find(path).map(|id| self.graph.vertex(id))
    }

    /// Installs a service and its instances: find-or-add vertices plus the
    /// `Service → Instance` edges. Idempotent for identical inputs.
    pub fn install_service(&mut self, svc: &ServiceRecord) -> VertexId {
        let sv = self.graph.find_or_add(&svc.path, VertexKind::Service);
        for inst in &svc.instances {
            let iv = self.install_instance(inst);
            if let Err(err) = self.graph.dependency_add(sv, iv) {
                tracing::error!(path = %svc.path, error = %err, "instance link refused");
            }
        }
        sv
    }

    /// Installs one instance vertex (find-or-add).
    pub fn install_instance(&mut self, path: &ServicePath) -> VertexId {
        self.graph.find_or_add(path, VertexKind::Instance)
    }

    /// Runs [`GraphEngine::setup_vertex`] over every vertex.
    pub fn setup_all(&mut self, bus: &Bus) -> Result<(), RepoError> {
        let ids: Vec<VertexId> = self.graph.iter().map(|(id, _)| id).collect();
        for id in ids {
            self.setup_vertex(id, bus)?;
        }
        Ok(())
    }

    /// Idempotent vertex setup: enables the vertex and populates its
    /// dependency groups from the repository.
    pub fn setup_vertex(&mut self, id: VertexId, bus: &Bus) -> Result<(), RepoError> {
        if self.graph.vertex(id).is_setup() {
            return Ok(());
        }
        {
            let v = self.graph.vertex_mut(id);
            v.is_setup = true;
            v.is_enabled = true;
        }
        self.update_vertex(id, bus)
    }

    /// Refreshes every set-up service/instance vertex from the repository.
    ///
    /// Called on a repository change notification. Group paths are
    /// synthesized from stable indices, so re-running setup finds the
    /// existing vertices and edge insertion stays idempotent.
    pub fn refresh(&mut self, bus: &Bus) -> Result<(), RepoError> {
        let ids: Vec<VertexId> = self
            .graph
            .iter()
            .filter(|(_, v)| v.is_setup() && !matches!(v.kind(), VertexKind::Group { .. }))
            .map(|(id, _)| id)
            .collect();
        for id in ids {
            self.update_vertex(id, bus)?;
        }
        Ok(())
    }

    /// Pulls fresh dependency groups for a vertex out of the repository.
    fn update_vertex(&mut self, id: VertexId, bus: &Bus) -> Result<(), RepoError> {
        let (path, kind) = {
            let v = self.graph.vertex(id);
            (v.path().clone(), v.kind())
        };

        let mut groups: Vec<DepGroup> = Vec::new();
        match kind {
            VertexKind::Instance => {
                match self.repo.lookup(&path) {
                    Ok(RepoEntry::Instance(rec)) => groups.extend(rec.depgroups),
                    Ok(RepoEntry::Service(_)) => {
                        tracing::warn!(%path, "instance path resolved to a service record");
                        return Ok(());
                    }
                    Err(err) if err.is_transient() => return Err(err),
                    Err(err) => {
                        tracing::warn!(%path, error = %err, "instance missing from repository");
                        return Ok(());
                    }
                }
                // Instances inherit their service's dependency groups.
                let svc_path = ServicePath::service(path.svc());
                match self.repo.lookup(&svc_path) {
                    Ok(RepoEntry::Service(rec)) => groups.extend(rec.depgroups),
                    Ok(RepoEntry::Instance(_)) => {
                        tracing::warn!(path = %svc_path, "service path resolved to an instance");
                    }
                    Err(err) if err.is_transient() => return Err(err),
                    Err(_) => {}
                }
            }
            VertexKind::Service => match self.repo.lookup(&path) {
                Ok(RepoEntry::Service(rec)) => groups.extend(rec.depgroups),
                Ok(RepoEntry::Instance(_)) => {
                    tracing::warn!(%path, "service path resolved to an instance record");
                    return Ok(());
                }
                Err(err) if err.is_transient() => return Err(err),
                Err(err) => {
                    tracing::warn!(%path, error = %err, "service missing from repository");
                    return Ok(());
                }
            },
            VertexKind::Group { .. } => return Ok(()),
        }

        for (n, dg) in groups.iter().enumerate() {
            let dg_path = path.depgroup(n);
            self.setup_depgroup(id, dg, dg_path, bus)?;
        }
        Ok(())
    }

    /// Synthesizes one group vertex and links its targets.
    fn setup_depgroup(
        &mut self,
        owner: VertexId,
        dg: &DepGroup,
        dg_path: ServicePath,
        bus: &Bus,
    ) -> Result<(), RepoError> {
        let dgv = self.graph.find_or_add(
            &dg_path,
            VertexKind::Group {
                kind: dg.kind,
                restart_on: dg.restart_on,
            },
        );
        {
            let v = self.graph.vertex_mut(dgv);
            v.is_setup = true;
            v.is_enabled = true;
        }
        if let Err(err) = self.graph.dependency_add(owner, dgv) {
            tracing::error!(path = %self.graph.vertex(owner).path(), error = %err, "group link refused");
            return Ok(());
        }

        for target in &dg.targets {
            let kind = if target.is_instance() {
                VertexKind::Instance
            } else {
                VertexKind::Service
            };
            let tid = self.graph.find_or_add(target, kind);
            if let Err(err) = self.graph.dependency_add(dgv, tid) {
                let owner_path = self.graph.vertex(owner).path().clone();
                tracing::error!(path = %owner_path, error = %err, "cyclical dependency");
                bus.publish(
                    Event::now(EventKind::CycleRejected)
                        .with_path(owner_path)
                        .with_error(err.to_string()),
                );
                return Ok(());
            }
            self.setup_vertex(tid, bus)?;
        }
        Ok(())
    }

    // ---------------------------
    // Satisfiability probes
    // ---------------------------

    /// Evaluates a path's satisfiability as a dependency target.
    pub fn satisfies(&self, path: &ServicePath, recurse: bool) -> Option<Satisfiability> {
        self.graph
            .find(path)
            .map(|id| super::satisfy::vertex_satisfies(&self.graph, id, recurse))
    }

    /// Evaluates a path's own dependency list.
    pub fn deps_satisfied(&self, path: &ServicePath, recurse: bool) -> Option<Satisfiability> {
        self.graph
            .find(path)
            .map(|id| deps_satisfied(&self.graph, id, recurse))
    }

    /// True if the instance at `path` can come up.
    pub fn can_come_up(&self, path: &ServicePath) -> Option<bool> {
        self.graph.find(path).map(|id| can_come_up(&self.graph, id))
    }

    // ---------------------------
    // Note processing
    // ---------------------------

    /// Reacts to one note off the bus. Restarter requests are not ours;
    /// notes for unknown paths are logged and discarded.
    pub fn process_note(&mut self, note: &Note, notes: &mut NoteQueue, bus: &Bus) {
        let Some(id) = self.graph.find(note.path()) else {
            tracing::warn!(path = %note.path(), "discarding note for unknown path");
            return;
        };
        match note {
            Note::AdminReq { kind, reason, .. } => {
                self.process_admin(id, *kind, *reason, notes, bus)
            }
            Note::StateChange { kind, reason, .. } => {
                self.process_state_change(id, *kind, *reason, notes, bus)
            }
            Note::RestarterReq { .. } => {}
        }
    }

    fn set_state(&mut self, id: VertexId, state: VertexState, bus: &Bus) {
        let v = self.graph.vertex_mut(id);
        v.state = state;
        bus.publish(
            Event::now(EventKind::VertexState)
                .with_path(v.path.clone())
                .with_detail(state.as_str()),
        );
    }

    fn process_admin(
        &mut self,
        id: VertexId,
        kind: AdminKind,
        _reason: RestartOn,
        notes: &mut NoteQueue,
        bus: &Bus,
    ) {
        match kind {
            AdminKind::Disable => {
                {
                    let v = self.graph.vertex_mut(id);
                    v.to_disable = true;
                    v.to_offline = true;
                    v.is_enabled = false;
                    tracing::info!(
                        path = %v.path,
                        "administrative disable, shutting down dependents first"
                    );
                }
                for dep in dependent_ids(&self.graph, id) {
                    notify_admin_disable(&mut self.graph, dep);
                }
                if can_go_down(&self.graph, id, true) {
                    tracing::info!(
                        path = %self.graph.vertex(id).path(),
                        "no subnodes to deal with, can disable directly"
                    );
                }
                let all: Vec<VertexId> = self.graph.iter().map(|(vid, _)| vid).collect();
                for vid in all {
                    offline_if_possible(&self.graph, vid, RestartOn::Restart, notes);
                }
            }
            AdminKind::Enable => {
                let path = {
                    let v = self.graph.vertex_mut(id);
                    v.to_disable = false;
                    v.to_offline = false;
                    v.is_enabled = true;
                    tracing::info!(path = %v.path, "administrative enable");
                    v.path.clone()
                };
                notes.push(Note::state_change(
                    StateChangeKind::Offline,
                    path,
                    RestartOn::Restart,
                ));
            }
            AdminKind::Restart => {
                tracing::warn!(
                    path = %self.graph.vertex(id).path(),
                    "admin restart not handled"
                );
            }
        }
    }

    fn process_state_change(
        &mut self,
        id: VertexId,
        kind: StateChangeKind,
        reason: RestartOn,
        notes: &mut NoteQueue,
        bus: &Bus,
    ) {
        match kind {
            StateChangeKind::Online => {
                self.set_state(id, VertexState::Online, bus);
                for dep in dependent_ids(&self.graph, id) {
                    notify_start(&self.graph, dep, reason, notes);
                }
            }

            StateChangeKind::Offline => {
                let was_to_offline = self.graph.vertex(id).to_offline();
                self.set_state(id, VertexState::Offline, bus);
                self.graph.vertex_mut(id).to_offline = false;

                if was_to_offline {
                    // Finish transitive shutdowns that were waiting on us.
                    for dep in dependency_ids(&self.graph, id) {
                        offline_dependency(&self.graph, dep, reason, notes);
                    }
                    if self.graph.vertex(id).to_disable() {
                        notes.push(Note::state_change(
                            StateChangeKind::Disabled,
                            self.graph.vertex(id).path().clone(),
                            reason,
                        ));
                    }
                } else if self.graph.vertex(id).kind().is_instance()
                    && can_come_up(&self.graph, id)
                {
                    notes.push(Note::request(
                        RequestKind::Start,
                        self.graph.vertex(id).path().clone(),
                        reason,
                    ));
                }

                for dep in dependent_ids(&self.graph, id) {
                    notify_stop(&self.graph, dep, reason, notes);
                }
            }

            StateChangeKind::Disabled => {
                {
                    let v = self.graph.vertex_mut(id);
                    v.to_offline = false;
                    v.to_disable = false;
                }
                self.set_state(id, VertexState::Disabled, bus);
                // Re-probe dependents: exclusions may have opened up.
                for dep in dependent_ids(&self.graph, id) {
                    notify_misc(&self.graph, dep, reason, notes);
                }
            }

            StateChangeKind::Maintenance => {
                {
                    let v = self.graph.vertex_mut(id);
                    v.to_offline = false;
                    v.to_disable = false;
                }
                self.set_state(id, VertexState::Maintenance, bus);
                for dep in dependent_ids(&self.graph, id) {
                    notify_stop(&self.graph, dep, reason, notes);
                }
            }
        }
    }
}

fn dependent_ids(g: &Graph, id: VertexId) -> Vec<VertexId> {
    g.vertex(id).dependents().iter().map(|e| e.to).collect()
}

fn dependency_ids(g: &Graph, id: VertexId) -> Vec<VertexId> {
    g.vertex(id).dependencies().iter().map(|e| e.to).collect()
}

/// A dependency of `id` came up: bring up instances that are now able.
fn notify_start(g: &Graph, id: VertexId, reason: RestartOn, notes: &mut NoteQueue) {
    let v = g.vertex(id);
    match v.kind() {
        VertexKind::Instance => {
            if can_come_up(g, id) {
                if is_running(v.state()) {
                    tracing::debug!(path = %v.path(), "not bringing up, already up");
                    if reason > RestartOn::Error {
                        tracing::debug!(path = %v.path(), "restart-class reason while already up");
                    }
                } else {
                    tracing::info!(path = %v.path(), "bringing up, dependency went up");
                    notes.push(Note::request(
                        RequestKind::Start,
                        v.path().clone(),
                        RestartOn::None,
                    ));
                }
            }
        }
        VertexKind::Group { .. } | VertexKind::Service => {
            for dep in dependent_ids(g, id) {
                notify_start(g, dep, v.kind().restart_on(), notes);
            }
        }
    }
}

/// A dependency of `id` went down: propagate the stop, cut at groups whose
/// severity subscription is below the reason.
fn notify_stop(g: &Graph, id: VertexId, reason: RestartOn, notes: &mut NoteQueue) {
    let v = g.vertex(id);
    match v.kind() {
        VertexKind::Instance => {
            // This only reaches us through groups subscribed to the reason.
            if !is_running(v.state()) {
                tracing::debug!(path = %v.path(), "not bringing down, already down");
            } else {
                tracing::debug!(path = %v.path(), "bringing down, dependency went down");
                notes.push(Note::request(RequestKind::Stop, v.path().clone(), reason));
            }
        }
        VertexKind::Group { kind, restart_on } => {
            // Exclusions never propagate stops downward.
            if kind == GroupKind::ExcludeAll {
                return;
            }
            if restart_on < reason {
                return;
            }
            for dep in dependent_ids(g, id) {
                notify_stop(g, dep, reason, notes);
            }
        }
        VertexKind::Service => {
            for dep in dependent_ids(g, id) {
                notify_stop(g, dep, reason, notes);
            }
        }
    }
}

/// Something changed nearby: re-probe instances that may now come up.
fn notify_misc(g: &Graph, id: VertexId, reason: RestartOn, notes: &mut NoteQueue) {
    let v = g.vertex(id);
    if v.kind().is_instance() && can_come_up(g, id) && !is_running(v.state()) {
        notes.push(Note::request(
            RequestKind::Start,
            v.path().clone(),
            reason,
        ));
    }
    for dep in dependent_ids(g, id) {
        notify_misc(g, dep, reason, notes);
    }
}

/// Marks dependents for shutdown ahead of a disable.
fn notify_admin_disable(g: &mut Graph, id: VertexId) {
    match g.vertex(id).kind() {
        VertexKind::Instance => {
            let v = g.vertex_mut(id);
            if !is_running(v.state()) {
                tracing::debug!(path = %v.path, "not bringing down, already down");
            }
            v.to_offline = true;
            for dep in dependent_ids(g, id) {
                notify_admin_disable(g, dep);
            }
        }
        VertexKind::Group { kind, restart_on } => {
            // Exclusions are not marked, nor are groups that would not
            // restart for this class of event anyway.
            if kind == GroupKind::ExcludeAll
                || matches!(restart_on, RestartOn::None | RestartOn::Error)
            {
                return;
            }
            for dep in dependent_ids(g, id) {
                notify_admin_disable(g, dep);
            }
        }
        VertexKind::Service => {
            for dep in dependent_ids(g, id) {
                notify_admin_disable(g, dep);
            }
        }
    }
}

/// Emits a stop for a shutdown-marked instance whose subtree can go down.
fn offline_if_possible(g: &Graph, id: VertexId, reason: RestartOn, notes: &mut NoteQueue) {
    let v = g.vertex(id);
    if !v.to_offline() {
        return;
    }
    if v.kind().is_instance() && can_go_down(g, id, true) {
        notes.push(Note::request(RequestKind::Stop, v.path().clone(), reason));
    }
}

/// Called after an instance goes offline: offline its dependencies if they
/// are due to go offline.
fn offline_dependency(g: &Graph, id: VertexId, reason: RestartOn, notes: &mut NoteQueue) {
    let v = g.vertex(id);
    if v.kind().is_instance() {
        if !v.to_offline() {
            return;
        }
        if can_go_down(g, id, true) {
            notes.push(Note::request(RequestKind::Stop, v.path().clone(), reason));
        }
    } else {
        for dep in dependency_ids(g, id) {
            offline_dependency(g, dep, reason, notes);
        }
    }
}
