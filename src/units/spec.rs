//! # Unit specification.
//!
//! [`UnitSpec`] bundles what the restarter needs to know to supervise one
//! instance: the unit type, the method table, and (for `forks`-type units)
//! the pidfile the daemon writes after detaching. Specs come out of the
//! service repository when a unit is first referenced by the graph.

use std::path::PathBuf;

use super::state::{MethodKind, Methods, UnitType};

/// Supervision parameters for one service instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnitSpec {
    /// How the supervised service behaves.
    pub utype: UnitType,
    /// Command lines per method slot.
    pub methods: Methods,
    /// Pidfile written by `forks`-type daemons after the start method exits.
    pub pidfile: Option<PathBuf>,
}

impl UnitSpec {
    /// Creates a spec of the given type with an empty method table.
    pub fn new(utype: UnitType) -> Self {
        Self {
            utype,
            methods: Methods::new(),
            pidfile: None,
        }
    }

    /// Builder-style method definition.
    pub fn with_method(mut self, kind: MethodKind, cmd: impl Into<String>) -> Self {
        self.methods.set(kind, cmd);
        self
    }

    /// Builder-style pidfile declaration.
    pub fn with_pidfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.pidfile = Some(path.into());
        self
    }
}
