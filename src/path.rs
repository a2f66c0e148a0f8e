//! # Service paths.
//!
//! A [`ServicePath`] names a service or one of its instances with a two-part
//! identifier. Paths are plain values: compared, hashed, and cloned by value,
//! and used as the key for every unit, vertex, and repository lookup in the
//! crate.
//!
//! Dependency-group vertices live in the same namespace as real nodes. Their
//! paths are synthesized from the owning path by appending `#depgroups/<n>`
//! to the last component, so the third group of instance `db:main` becomes
//! `db:main#depgroups/2`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Two-part identifier `(service, instance?)`.
///
/// The serialized form is the wire shape used by the note envelope:
/// `{"svc": "...", "inst": "..."|null}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServicePath {
    svc: String,
    inst: Option<String>,
}

impl ServicePath {
    /// Path naming a service as a whole.
    pub fn service(svc: impl Into<String>) -> Self {
        Self {
            svc: svc.into(),
            inst: None,
        }
    }

    /// Path naming one instance of a service.
    pub fn instance(svc: impl Into<String>, inst: impl Into<String>) -> Self {
        Self {
            svc: svc.into(),
            inst: Some(inst.into()),
        }
    }

    /// Service component.
    pub fn svc(&self) -> &str {
        &self.svc
    }

    /// Instance component, if this path names an instance.
    pub fn inst(&self) -> Option<&str> {
        self.inst.as_deref()
    }

    /// True if this path names an instance rather than a whole service.
    pub fn is_instance(&self) -> bool {
        self.inst.is_some()
    }

    /// Synthesizes the path of the `n`-th dependency group owned by this
    /// path, by appending `#depgroups/<n>` to the last component.
    pub fn depgroup(&self, n: usize) -> Self {
        match &self.inst {
            Some(inst) => Self {
                svc: self.svc.clone(),
                inst: Some(format!("{inst}#depgroups/{n}")),
            },
            None => Self {
                svc: format!("{}#depgroups/{n}", self.svc),
                inst: None,
            },
        }
    }
}

impl fmt::Display for ServicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inst {
            Some(inst) => write!(f, "{}:{}", self.svc, inst),
            None => write!(f, "{}", self.svc),
        }
    }
}
