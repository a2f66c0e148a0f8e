//! # The note type and its vocabulary.
//!
//! A [`Note`] is one typed message on the in-process bus. Three families
//! exist:
//!
//! - [`Note::StateChange`] — a vertex/unit reached a lifecycle state.
//! - [`Note::AdminReq`] — an administrative instruction for a vertex.
//! - [`Note::RestarterReq`] — a start/stop decision for a unit.
//!
//! Every note carries a [`RestartOn`] *reason*: the severity of the event
//! that caused it. Dependency groups subscribe to a minimum severity, and
//! stop propagation is cut at groups whose subscription is below the
//! triggering reason.

use crate::path::ServicePath;

/// Restart-on condition, totally ordered by severity.
///
/// `None < Error < Restart < Refresh < Any`. A group with `restart_on =
/// Error` reacts only to error-severity stops; one with `Any` reacts to
/// everything.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RestartOn {
    /// Never propagate restarts.
    #[default]
    None = 0,
    /// Propagate on error-caused stops only.
    Error = 1,
    /// Also propagate administrative restarts.
    Restart = 2,
    /// Also propagate refreshes.
    Refresh = 3,
    /// Propagate every stop.
    Any = 4,
}

impl RestartOn {
    /// Severity as the wire integer.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses the wire integer back into a condition.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(RestartOn::None),
            1 => Some(RestartOn::Error),
            2 => Some(RestartOn::Restart),
            3 => Some(RestartOn::Refresh),
            4 => Some(RestartOn::Any),
            _ => None,
        }
    }
}

/// Sub-type of a [`Note::StateChange`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateChangeKind {
    /// The subject is up.
    Online,
    /// The subject is down but eligible to come back.
    Offline,
    /// The subject was administratively disabled.
    Disabled,
    /// The subject failed permanently and needs administrative action.
    Maintenance,
}

/// Sub-type of a [`Note::AdminReq`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdminKind {
    /// Enable the subject and bring it up if satisfiable.
    Enable,
    /// Take the subject down and keep it down.
    Disable,
    /// Restart the subject.
    Restart,
}

/// Sub-type of a [`Note::RestarterReq`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Bring the unit up.
    Start,
    /// Bring the unit down.
    Stop,
}

/// One typed message on the note bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Note {
    /// A lifecycle state was reached. Consumed by the graph engine.
    StateChange {
        /// Subject path.
        path: ServicePath,
        /// Which state.
        kind: StateChangeKind,
        /// Severity of the triggering event.
        reason: RestartOn,
    },
    /// Administrative instruction. Consumed by the graph engine.
    AdminReq {
        /// Subject path.
        path: ServicePath,
        /// Which instruction.
        kind: AdminKind,
        /// Severity to propagate with.
        reason: RestartOn,
    },
    /// Start/stop decision. Consumed by the restarter core.
    RestarterReq {
        /// Subject path.
        path: ServicePath,
        /// Which decision.
        kind: RequestKind,
        /// Severity of the triggering event.
        reason: RestartOn,
    },
}

impl Note {
    /// Shorthand for a state-change note.
    pub fn state_change(kind: StateChangeKind, path: ServicePath, reason: RestartOn) -> Self {
        Note::StateChange { path, kind, reason }
    }

    /// Shorthand for an administrative note.
    pub fn admin(kind: AdminKind, path: ServicePath, reason: RestartOn) -> Self {
        Note::AdminReq { path, kind, reason }
    }

    /// Shorthand for a restarter request.
    pub fn request(kind: RequestKind, path: ServicePath, reason: RestartOn) -> Self {
        Note::RestarterReq { path, kind, reason }
    }

    /// Subject path of the note.
    pub fn path(&self) -> &ServicePath {
        match self {
            Note::StateChange { path, .. }
            | Note::AdminReq { path, .. }
            | Note::RestarterReq { path, .. } => path,
        }
    }

    /// Carried reason severity.
    pub fn reason(&self) -> RestartOn {
        match self {
            Note::StateChange { reason, .. }
            | Note::AdminReq { reason, .. }
            | Note::RestarterReq { reason, .. } => *reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_is_totally_ordered() {
        assert!(RestartOn::None < RestartOn::Error);
        assert!(RestartOn::Error < RestartOn::Restart);
        assert!(RestartOn::Restart < RestartOn::Refresh);
        assert!(RestartOn::Refresh < RestartOn::Any);
    }

    #[test]
    fn severity_round_trips_through_wire_integer() {
        for sev in [
            RestartOn::None,
            RestartOn::Error,
            RestartOn::Restart,
            RestartOn::Refresh,
            RestartOn::Any,
        ] {
            assert_eq!(RestartOn::from_u8(sev.as_u8()), Some(sev));
        }
        assert_eq!(RestartOn::from_u8(5), None);
    }
}
