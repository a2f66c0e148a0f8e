//! Supervise a real child process end to end.
//!
//! Builds an in-memory catalog with one `simple` service, binds the
//! notification socket in a temp directory, enables the instance, and runs
//! the manager loop until Ctrl-C.
//!
//! ```bash
//! cargo run --example supervise
//! ```

use std::sync::Arc;

use unitvisor::{
    AdminKind, ChildReaper, Config, InstanceRecord, LogWriter, Manager, MemoryRepository,
    MethodKind, Note, OsSpawner, Repository, RestartOn, ServicePath, ServiceRecord, UnitSpec,
    UnitType,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let repo = Arc::new(MemoryRepository::new());

    let path = ServicePath::instance("ticker", "default");
    repo.put_instance(InstanceRecord {
        path: path.clone(),
        unit: UnitSpec::new(UnitType::Simple)
            .with_method(MethodKind::Start, "sleep 600")
            .with_method(MethodKind::PostStop, "true"),
        depgroups: vec![],
    });
    repo.put_service(ServiceRecord {
        path: ServicePath::service("ticker"),
        instances: vec![path.clone()],
        depgroups: vec![],
    });

    let socket_dir = tempfile::tempdir()?;
    let mut cfg = Config::default();
    cfg.notify_socket = socket_dir.path().join("notify.sock");

    let mut manager = Manager::new(
        cfg,
        repo.clone(),
        Box::new(ChildReaper::new()?),
        Box::new(OsSpawner::new()),
        vec![Arc::new(LogWriter::new())],
    );
    manager.bind_notify()?;

    let rec = match repo.lookup(&ServicePath::service("ticker"))? {
        unitvisor::RepoEntry::Service(rec) => rec,
        _ => unreachable!(),
    };
    manager.install_service(&rec);
    manager.setup_graph();

    let handle = manager.handle();
    handle.submit(Note::admin(AdminKind::Enable, path, RestartOn::Restart));

    println!("supervising; Ctrl-C to stop");
    manager.run().await?;
    Ok(())
}
