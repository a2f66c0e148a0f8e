//! # Unit states, types, and method tables.
//!
//! The vocabulary of the restarter core: which lifecycle state a unit is in,
//! what kind of service it supervises, and which command line runs for each
//! method slot.

use std::fmt;

/// Lifecycle state of a unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum UnitState {
    /// Freshly created, never driven anywhere.
    #[default]
    Uninitialised,
    /// Down, eligible to come back up.
    Offline,
    /// The `prestart` method is executing.
    PreStart,
    /// The `start` method is executing.
    Start,
    /// The `poststart` method is executing.
    PostStart,
    /// Up. The terminal success state for a startup.
    Online,
    /// The `stop` method is executing.
    Stop,
    /// `SIGTERM` was delivered; waiting for the PID set to empty.
    StopTerm,
    /// `SIGKILL` was delivered; waiting for the PID set to empty.
    StopKill,
    /// The `poststop` method is executing.
    PostStop,
    /// Terminal failure. Administrative action required to leave.
    Maintenance,
    /// Bookkeeping-only: no target pending.
    None,
}

impl UnitState {
    /// True for the stop-side states.
    pub fn is_stopping(self) -> bool {
        matches!(
            self,
            UnitState::Stop | UnitState::StopTerm | UnitState::StopKill | UnitState::PostStop
        )
    }

    /// Stable lowercase name for logs and events.
    pub fn as_str(self) -> &'static str {
        match self {
            UnitState::Uninitialised => "uninitialised",
            UnitState::Offline => "offline",
            UnitState::PreStart => "prestart",
            UnitState::Start => "start",
            UnitState::PostStart => "poststart",
            UnitState::Online => "online",
            UnitState::Stop => "stop",
            UnitState::StopTerm => "stopterm",
            UnitState::StopKill => "stopkill",
            UnitState::PostStop => "poststop",
            UnitState::Maintenance => "maintenance",
            UnitState::None => "none",
        }
    }

    /// The method that executes in this state, if any.
    pub fn method(self) -> Option<MethodKind> {
        match self {
            UnitState::PreStart => Some(MethodKind::PreStart),
            UnitState::Start => Some(MethodKind::Start),
            UnitState::PostStart => Some(MethodKind::PostStart),
            UnitState::Stop => Some(MethodKind::Stop),
            UnitState::PostStop => Some(MethodKind::PostStop),
            _ => None,
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the supervised service behaves once its `start` method runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum UnitType {
    /// The start process *is* the service; online as soon as it runs.
    #[default]
    Simple,
    /// Runs to completion; online as soon as it runs.
    Oneshot,
    /// The start process daemonizes; the real main PID comes from a pidfile
    /// or a readiness notification.
    Forks,
    /// A grouping node with no process of its own.
    Group,
}

/// Method slots a unit may define.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Runs before `start`.
    PreStart,
    /// The main method.
    Start,
    /// Runs after `start` succeeds.
    PostStart,
    /// Polite shutdown.
    Stop,
    /// Cleanup after the PID set empties.
    PostStop,
}

impl MethodKind {
    /// All method slots, in table order.
    pub const ALL: [MethodKind; 5] = [
        MethodKind::PreStart,
        MethodKind::Start,
        MethodKind::PostStart,
        MethodKind::Stop,
        MethodKind::PostStop,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            MethodKind::PreStart => 0,
            MethodKind::Start => 1,
            MethodKind::PostStart => 2,
            MethodKind::Stop => 3,
            MethodKind::PostStop => 4,
        }
    }

    /// Stable lowercase name for logs and events.
    pub fn as_str(self) -> &'static str {
        match self {
            MethodKind::PreStart => "prestart",
            MethodKind::Start => "start",
            MethodKind::PostStart => "poststart",
            MethodKind::Stop => "stop",
            MethodKind::PostStop => "poststop",
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method table indexed by [`MethodKind`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Methods {
    table: [Option<String>; 5],
}

impl Methods {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Command line for a method slot, if defined.
    pub fn get(&self, kind: MethodKind) -> Option<&str> {
        self.table[kind.index()].as_deref()
    }

    /// Defines (or replaces) a method slot.
    pub fn set(&mut self, kind: MethodKind, cmd: impl Into<String>) {
        self.table[kind.index()] = Some(cmd.into());
    }

    /// Builder-style [`Methods::set`].
    pub fn with(mut self, kind: MethodKind, cmd: impl Into<String>) -> Self {
        self.set(kind, cmd);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_know_their_methods() {
        assert_eq!(UnitState::PreStart.method(), Some(MethodKind::PreStart));
        assert_eq!(UnitState::Stop.method(), Some(MethodKind::Stop));
        assert_eq!(UnitState::Online.method(), None);
        assert_eq!(UnitState::StopTerm.method(), None);
    }

    #[test]
    fn stopping_covers_the_whole_stop_side() {
        for s in [
            UnitState::Stop,
            UnitState::StopTerm,
            UnitState::StopKill,
            UnitState::PostStop,
        ] {
            assert!(s.is_stopping(), "{s} should be stopping");
        }
        assert!(!UnitState::Online.is_stopping());
        assert!(!UnitState::Offline.is_stopping());
    }

    #[test]
    fn method_table_round_trips() {
        let m = Methods::new()
            .with(MethodKind::Start, "/bin/true")
            .with(MethodKind::Stop, "/bin/kill -TERM 1");
        assert_eq!(m.get(MethodKind::Start), Some("/bin/true"));
        assert_eq!(m.get(MethodKind::Stop), Some("/bin/kill -TERM 1"));
        assert_eq!(m.get(MethodKind::PreStart), None);
    }
}
