//! # Graph storage: arena vertices with stable handles.
//!
//! The dependency graph is an arena of [`Vertex`] values addressed by
//! [`VertexId`]. Edges store two handles and are recorded twice, once in
//! `from.dependencies` and once in `to.dependents` with the labels swapped,
//! so both directions can be walked without chasing ownership. Vertices are
//! never removed during a run; acyclicity is the invariant defended at edge
//! insertion.

use std::collections::HashMap;

use crate::error::GraphError;
use crate::notes::RestartOn;
use crate::path::ServicePath;
use crate::repository::GroupKind;

/// Stable handle to a vertex in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexId(pub(crate) usize);

/// What a vertex stands for, with kind-specific payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexKind {
    /// A whole service; its instances are direct dependencies.
    Service,
    /// One service instance; the only kind the restarter runs.
    Instance,
    /// A synthesized dependency-group node.
    Group {
        /// Quantifier kind.
        kind: GroupKind,
        /// Stop-propagation severity subscription.
        restart_on: RestartOn,
    },
}

impl VertexKind {
    /// Quantifier kind, for group vertices.
    pub fn group_kind(self) -> Option<GroupKind> {
        match self {
            VertexKind::Group { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Severity subscription; non-group vertices propagate everything.
    pub fn restart_on(self) -> RestartOn {
        match self {
            VertexKind::Group { restart_on, .. } => restart_on,
            _ => RestartOn::Any,
        }
    }

    /// True for instance vertices.
    pub fn is_instance(self) -> bool {
        matches!(self, VertexKind::Instance)
    }
}

/// Lifecycle state of a vertex.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VertexState {
    /// Never driven anywhere.
    #[default]
    Uninitialised,
    /// Down, eligible to come back.
    Offline,
    /// Up.
    Online,
    /// Up with reduced function.
    Degraded,
    /// Administratively down.
    Disabled,
    /// Failed permanently.
    Maintenance,
}

impl VertexState {
    /// Stable lowercase name for logs and events.
    pub fn as_str(self) -> &'static str {
        match self {
            VertexState::Uninitialised => "uninitialised",
            VertexState::Offline => "offline",
            VertexState::Online => "online",
            VertexState::Degraded => "degraded",
            VertexState::Disabled => "disabled",
            VertexState::Maintenance => "maintenance",
        }
    }
}

/// Directed relation `from → to` where `from` depends on `to`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    /// The depending vertex.
    pub from: VertexId,
    /// The prerequisite vertex.
    pub to: VertexId,
}

/// One graph node.
#[derive(Debug)]
pub struct Vertex {
    pub(crate) path: ServicePath,
    pub(crate) kind: VertexKind,
    pub(crate) state: VertexState,
    pub(crate) is_setup: bool,
    pub(crate) is_enabled: bool,
    pub(crate) to_offline: bool,
    pub(crate) to_disable: bool,
    pub(crate) dependencies: Vec<Edge>,
    pub(crate) dependents: Vec<Edge>,
}

impl Vertex {
    fn new(path: ServicePath, kind: VertexKind) -> Self {
        Self {
            path,
            kind,
            state: VertexState::Uninitialised,
            is_setup: false,
            is_enabled: false,
            to_offline: false,
            to_disable: false,
            dependencies: Vec::new(),
            dependents: Vec::new(),
        }
    }

    /// The vertex path.
    pub fn path(&self) -> &ServicePath {
        &self.path
    }

    /// The vertex kind.
    pub fn kind(&self) -> VertexKind {
        self.kind
    }

    /// Current lifecycle state.
    pub fn state(&self) -> VertexState {
        self.state
    }

    /// True once setup has populated the vertex from the repository.
    pub fn is_setup(&self) -> bool {
        self.is_setup
    }

    /// Administrative enable flag.
    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    /// True while the vertex is expected to finish shutting down.
    pub fn to_offline(&self) -> bool {
        self.to_offline
    }

    /// True while a disable is pending completion of the shutdown.
    pub fn to_disable(&self) -> bool {
        self.to_disable
    }

    /// Edges to prerequisite vertices, in insertion order.
    pub fn dependencies(&self) -> &[Edge] {
        &self.dependencies
    }

    /// Edges to consumer vertices, in insertion order.
    pub fn dependents(&self) -> &[Edge] {
        &self.dependents
    }
}

/// Arena of vertices plus a path index.
#[derive(Debug, Default)]
pub struct Graph {
    vertices: Vec<Vertex>,
    index: HashMap<ServicePath, VertexId>,
}

impl Graph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// True if the graph has no vertices.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Immutable access by handle.
    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.0]
    }

    pub(crate) fn vertex_mut(&mut self, id: VertexId) -> &mut Vertex {
        &mut self.vertices[id.0]
    }

    /// Handle of the vertex for a path, if present.
    pub fn find(&self, path: &ServicePath) -> Option<VertexId> {
        self.index.get(path).copied()
    }

    /// Iterates all vertices with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (VertexId, &Vertex)> {
        self.vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (VertexId(i), v))
    }

    /// Returns the existing vertex for a path or allocates a new one of the
    /// given kind.
    pub(crate) fn find_or_add(&mut self, path: &ServicePath, kind: VertexKind) -> VertexId {
        if let Some(id) = self.find(path) {
            return id;
        }
        let id = VertexId(self.vertices.len());
        self.vertices.push(Vertex::new(path.clone(), kind));
        self.index.insert(path.clone(), id);
        id
    }

    /// True if a dependency edge `from → to` exists.
    pub fn has_edge(&self, from: VertexId, to: VertexId) -> bool {
        self.vertex(from)
            .dependencies
            .iter()
            .any(|e| e.to == to)
    }

    /// Records the mirror pair for a dependency `from → to`.
    fn edge_add(&mut self, from: VertexId, to: VertexId) {
        self.vertex_mut(from).dependencies.push(Edge { from, to });
        self.vertex_mut(to)
            .dependents
            .push(Edge { from: to, to: from });
    }

    /// Returns true if `to` is reachable from `from` over dependency edges.
    ///
    /// Traversal does not descend into `ExcludeAll` groups: they express
    /// negative dependency, so a path through one is not a real ordering
    /// relation.
    pub fn is_reachable(&self, from: VertexId, to: VertexId) -> bool {
        let mut seen = vec![false; self.vertices.len()];
        self.reach(from, to, &mut seen)
    }

    fn reach(&self, v: VertexId, to: VertexId, seen: &mut [bool]) -> bool {
        if seen[v.0] {
            return false;
        }
        seen[v.0] = true;

        if self.vertex(v).kind.group_kind() == Some(GroupKind::ExcludeAll) {
            return false;
        }
        if v == to {
            return true;
        }
        self.vertex(v)
            .dependencies
            .iter()
            .any(|e| self.reach(e.to, to, seen))
    }

    /// Adds a dependency edge after the reachability check.
    ///
    /// Re-adding an existing edge is a no-op, which keeps repeated setup
    /// passes idempotent. If the target can already reach the owner the
    /// edge is refused.
    pub(crate) fn dependency_add(
        &mut self,
        owner: VertexId,
        target: VertexId,
    ) -> Result<(), GraphError> {
        if self.has_edge(owner, target) {
            return Ok(());
        }
        if self.is_reachable(target, owner) {
            return Err(GraphError::CyclicalDependency {
                owner: self.vertex(owner).path.clone(),
                target: self.vertex(target).path.clone(),
            });
        }
        self.edge_add(owner, target);
        Ok(())
    }

    /// Checks graph invariants: acyclicity and edge mirroring.
    ///
    /// Test support: production code never calls this.
    pub fn verify_invariants(&self) -> Result<(), String> {
        for (id, v) in self.iter() {
            for e in &v.dependencies {
                let mirrored = self
                    .vertex(e.to)
                    .dependents
                    .iter()
                    .any(|m| m.to == id);
                if !mirrored {
                    return Err(format!(
                        "edge {} -> {} has no mirror",
                        v.path,
                        self.vertex(e.to).path
                    ));
                }
            }
            for e in &v.dependencies {
                if self.is_reachable(e.to, id) {
                    return Err(format!("cycle through {}", v.path));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(graph: &mut Graph, svc: &str, inst_name: &str) -> VertexId {
        graph.find_or_add(
            &ServicePath::instance(svc, inst_name),
            VertexKind::Instance,
        )
    }

    #[test]
    fn find_or_add_is_idempotent() {
        let mut g = Graph::new();
        let a = inst(&mut g, "a", "i");
        let again = inst(&mut g, "a", "i");
        assert_eq!(a, again);
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn edges_are_mirrored() {
        let mut g = Graph::new();
        let a = inst(&mut g, "a", "i");
        let b = inst(&mut g, "b", "i");
        g.dependency_add(a, b).unwrap();

        assert!(g.has_edge(a, b));
        assert_eq!(g.vertex(b).dependents()[0].to, a);
        g.verify_invariants().unwrap();
    }

    #[test]
    fn cycle_is_refused() {
        let mut g = Graph::new();
        let a = inst(&mut g, "a", "i");
        let b = inst(&mut g, "b", "i");
        g.dependency_add(a, b).unwrap();

        let err = g.dependency_add(b, a).unwrap_err();
        assert!(matches!(err, GraphError::CyclicalDependency { .. }));
        assert!(!g.has_edge(b, a));
        g.verify_invariants().unwrap();
    }

    #[test]
    fn reachability_does_not_cross_exclusion_groups() {
        let mut g = Graph::new();
        let a = inst(&mut g, "a", "i");
        let excl = g.find_or_add(
            &ServicePath::instance("a", "i").depgroup(0),
            VertexKind::Group {
                kind: GroupKind::ExcludeAll,
                restart_on: RestartOn::None,
            },
        );
        let b = inst(&mut g, "b", "i");
        g.dependency_add(a, excl).unwrap();
        g.dependency_add(excl, b).unwrap();

        assert!(!g.is_reachable(a, b));
        // the mutual exclusion shape is legal: b may exclude a right back
        let bg = g.find_or_add(
            &ServicePath::instance("b", "i").depgroup(0),
            VertexKind::Group {
                kind: GroupKind::ExcludeAll,
                restart_on: RestartOn::None,
            },
        );
        g.dependency_add(b, bg).unwrap();
        g.dependency_add(bg, a).unwrap();
    }
}
