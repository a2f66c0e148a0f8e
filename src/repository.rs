//! # Service repository interface.
//!
//! The persisted catalog itself is an external collaborator; the graph
//! engine and restarter consume it through the [`Repository`] trait:
//! path lookup returning service/instance records with their dependency
//! groups, plus a change subscription that fires on catalog updates.
//!
//! [`MemoryRepository`] is the in-crate implementation used by tests and
//! demos, and doubles as the reference for what the RPC-backed catalog
//! client must provide.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::watch;

use crate::error::RepoError;
use crate::notes::RestartOn;
use crate::path::ServicePath;
use crate::units::UnitSpec;

/// Quantifier kind of a dependency group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupKind {
    /// Every target must be satisfied.
    RequireAll,
    /// At least one target must be satisfied; an empty group is satisfied.
    RequireAny,
    /// Targets that cannot run are acceptable; running targets must be up.
    OptionalAll,
    /// Negative dependency: targets must not be running nor headed up.
    ExcludeAll,
}

/// One named dependency group as declared in the catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepGroup {
    /// Group name (diagnostics only; the graph keys groups by path suffix).
    pub name: String,
    /// Quantifier kind.
    pub kind: GroupKind,
    /// Stop-propagation severity subscription.
    pub restart_on: RestartOn,
    /// Paths of the services/instances this group references.
    pub targets: Vec<ServicePath>,
}

/// Catalog record for a whole service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Service path.
    pub path: ServicePath,
    /// Paths of the service's instances.
    pub instances: Vec<ServicePath>,
    /// Dependency groups declared at service level (inherited by every
    /// instance).
    pub depgroups: Vec<DepGroup>,
}

/// Catalog record for one instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceRecord {
    /// Instance path.
    pub path: ServicePath,
    /// Supervision parameters for the restarter.
    pub unit: UnitSpec,
    /// Dependency groups declared at instance level.
    pub depgroups: Vec<DepGroup>,
}

/// Result of a repository lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepoEntry {
    /// The path named a service.
    Service(ServiceRecord),
    /// The path named an instance.
    Instance(InstanceRecord),
}

/// Read-mostly catalog accessed by path lookup.
pub trait Repository: Send + Sync {
    /// Fetches the record for a path.
    fn lookup(&self, path: &ServicePath) -> Result<RepoEntry, RepoError>;

    /// Returns a receiver that observes a version counter bumped on every
    /// catalog update.
    fn subscribe(&self) -> watch::Receiver<u64>;

    /// Cheap connectivity probe, used by the manager's reconnect retry.
    fn ping(&self) -> Result<(), RepoError> {
        Ok(())
    }
}

/// In-memory catalog for tests and demos.
pub struct MemoryRepository {
    entries: RwLock<HashMap<ServicePath, RepoEntry>>,
    version: watch::Sender<u64>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            entries: RwLock::new(HashMap::new()),
            version,
        }
    }

    /// Inserts (or replaces) a service record and bumps the version.
    pub fn put_service(&self, record: ServiceRecord) {
        let mut entries = self.entries.write().expect("repository lock poisoned");
        entries.insert(record.path.clone(), RepoEntry::Service(record));
        drop(entries);
        self.bump();
    }

    /// Inserts (or replaces) an instance record and bumps the version.
    pub fn put_instance(&self, record: InstanceRecord) {
        let mut entries = self.entries.write().expect("repository lock poisoned");
        entries.insert(record.path.clone(), RepoEntry::Instance(record));
        drop(entries);
        self.bump();
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

impl Repository for MemoryRepository {
    fn lookup(&self, path: &ServicePath) -> Result<RepoEntry, RepoError> {
        self.entries
            .read()
            .expect("repository lock poisoned")
            .get(path)
            .cloned()
            .ok_or_else(|| RepoError::NotFound(path.clone()))
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{MethodKind, UnitType};

    #[test]
    fn lookup_finds_what_was_put() {
        let repo = MemoryRepository::new();
        let path = ServicePath::instance("db", "main");
        repo.put_instance(InstanceRecord {
            path: path.clone(),
            unit: UnitSpec::new(UnitType::Simple).with_method(MethodKind::Start, "/bin/true"),
            depgroups: vec![],
        });

        match repo.lookup(&path).unwrap() {
            RepoEntry::Instance(rec) => assert_eq!(rec.path, path),
            other => panic!("unexpected entry: {other:?}"),
        }
        assert!(matches!(
            repo.lookup(&ServicePath::service("ghost")),
            Err(RepoError::NotFound(_))
        ));
    }

    #[test]
    fn updates_bump_the_version() {
        let repo = MemoryRepository::new();
        let mut rx = repo.subscribe();
        assert_eq!(*rx.borrow_and_update(), 0);

        repo.put_service(ServiceRecord {
            path: ServicePath::service("net"),
            instances: vec![],
            depgroups: vec![],
        });
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);
    }
}
