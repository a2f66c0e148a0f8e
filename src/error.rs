//! # Error types used by the supervisor runtime.
//!
//! Four enums cover the taxonomy of failures:
//!
//! - [`ManagerError`] — errors raised by the event loop and its bootstrap.
//! - [`GraphError`] — dependency-graph construction failures.
//! - [`SpawnError`] — method fork/exec failures.
//! - [`RepoError`] — service-repository access failures.
//!
//! All provide `as_label()` returning a short stable snake_case label for
//! logs and metrics. None of these escape the event loop: they are recorded,
//! logged with a path-qualified entry, and turned into either a retry
//! schedule or a `Maintenance` landing state.

use thiserror::Error;

use crate::path::ServicePath;

/// Errors produced by the manager runtime itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ManagerError {
    /// The notification socket could not be bound.
    #[error("failed to bind notification socket: {0}")]
    NotifySocket(#[source] std::io::Error),

    /// OS signal listener registration failed during bootstrap.
    #[error("failed to register signal listeners: {0}")]
    Signals(#[source] std::io::Error),
}

impl ManagerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ManagerError::NotifySocket(_) => "manager_notify_socket",
            ManagerError::Signals(_) => "manager_signals",
        }
    }
}

/// Errors produced while building or mutating the dependency graph.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum GraphError {
    /// Inserting the edge would have made the target able to reach its own
    /// owner. The edge is refused and the owner marked mis-configured.
    #[error("cyclical dependency: {owner} -> {target}")]
    CyclicalDependency {
        /// Vertex that owns the refused edge.
        owner: ServicePath,
        /// Prospective edge target.
        target: ServicePath,
    },

    /// A note referenced a path with no vertex in the graph.
    #[error("no vertex for path {0}")]
    UnknownPath(ServicePath),
}

impl GraphError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            GraphError::CyclicalDependency { .. } => "graph_cyclical_dependency",
            GraphError::UnknownPath(_) => "graph_unknown_path",
        }
    }
}

/// Errors produced when forking a unit method.
///
/// Fork failure is exceptional: the owning unit targets `Maintenance`
/// immediately rather than retrying.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The OS refused to spawn the child.
    #[error("fork failed: {0}")]
    Fork(#[source] std::io::Error),

    /// The handshake pipe for the pending-process gate could not be made.
    #[error("handshake pipe failed: {0}")]
    Pipe(#[source] std::io::Error),
}

impl SpawnError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            SpawnError::Fork(_) => "spawn_fork",
            SpawnError::Pipe(_) => "spawn_pipe",
        }
    }
}

/// Errors produced by service-repository access.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RepoError {
    /// No record exists for the given path.
    #[error("no repository record for {0}")]
    NotFound(ServicePath),

    /// The repository is unreachable; the manager schedules a capped retry.
    #[error("repository disconnected: {reason}")]
    Disconnected {
        /// Transport-level detail.
        reason: String,
    },
}

impl RepoError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            RepoError::NotFound(_) => "repo_not_found",
            RepoError::Disconnected { .. } => "repo_disconnected",
        }
    }

    /// True if the failure is a transport problem worth retrying, as opposed
    /// to a definitive negative lookup.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepoError::Disconnected { .. })
    }
}
