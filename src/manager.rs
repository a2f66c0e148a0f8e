//! # The manager: single-threaded event loop over all supervisor state.
//!
//! One [`Manager`] per supervisor process owns every piece of mutable state
//! — the graph engine, the unit table, the timer set, the note queue — so
//! no locks exist anywhere in the core. The loop multiplexes:
//!
//! - process tracker events,
//! - timer firings,
//! - readiness datagrams,
//! - notes arriving from outside (RPC inbox, admin tooling),
//! - repository change notifications,
//! - the shutdown signal.
//!
//! After every external event the note queue is drained to empty, in
//! insertion order, before the loop parks again. All callback code runs to
//! completion between waits; the kernel wait is the only suspension point.
//!
//! ## Architecture
//! ```text
//! tracker ─┐                           ┌─► Restarter (units)
//! timers  ─┤                           │      │ StateChange notes
//! notify  ─┼─► select! ─► dispatch ────┤      ▼
//! inbox   ─┤               ▲           └─► GraphEngine
//! repo    ─┘               │                  │ RestarterReq notes
//!                          └── drain ◄────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::error::{ManagerError, RepoError};
use crate::events::{Bus, Event, EventKind};
use crate::graph::{GraphEngine, VertexState};
use crate::notes::{Note, NoteQueue, StateChangeKind};
use crate::notify::{NotifyDirective, NotifyMessage, NotifyReceiver};
use crate::os_signals;
use crate::path::ServicePath;
use crate::process::{ProcessEvent, ProcessTracker, Spawner};
use crate::repository::{Repository, ServiceRecord};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::timers::{TimerPayload, TimerSet};
use crate::units::{Restarter, RestarterCx, UnitState};
use crate::wire;

/// Cloneable handle for feeding notes into a running manager.
#[derive(Clone)]
pub struct ManagerHandle {
    notes: mpsc::UnboundedSender<Note>,
}

impl ManagerHandle {
    /// Enqueues a note; returns `false` if the manager is gone.
    pub fn submit(&self, note: Note) -> bool {
        self.notes.send(note).is_ok()
    }
}

enum LoopEvent {
    Shutdown,
    Process(ProcessEvent),
    Timer(TimerPayload),
    Notify(NotifyMessage),
    Note(Note),
    RepoChanged,
}

/// Explicit context object owning all supervisor state.
///
/// Constructed once in the event-loop bootstrap; tests instantiate their
/// own over deterministic backends.
pub struct Manager {
    cfg: Config,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    graph: GraphEngine,
    restarter: Restarter,
    timers: TimerSet<TimerPayload>,
    notes: NoteQueue,
    tracker: Box<dyn ProcessTracker>,
    repo: Arc<dyn Repository>,
    repo_watch: watch::Receiver<u64>,
    inbox_tx: mpsc::UnboundedSender<Note>,
    inbox_rx: mpsc::UnboundedReceiver<Note>,
    notify: Option<NotifyReceiver>,
    repo_up: bool,
    repo_retry_delay: Duration,
    repo_retry_timer_armed: bool,
}

impl Manager {
    /// Builds a manager over the given backends.
    pub fn new(
        cfg: Config,
        repo: Arc<dyn Repository>,
        tracker: Box<dyn ProcessTracker>,
        spawner: Box<dyn Spawner>,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Self {
        let bus = Bus::new(cfg.bus_capacity);
        let subs = Arc::new(SubscriberSet::new(subscribers));
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let repo_watch = repo.subscribe();
        let repo_retry_delay = cfg.repo_retry_first;

        Self {
            cfg,
            bus,
            subs,
            graph: GraphEngine::new(repo.clone()),
            restarter: Restarter::new(spawner),
            timers: TimerSet::new(),
            notes: NoteQueue::new(),
            tracker,
            repo,
            repo_watch,
            inbox_tx,
            inbox_rx,
            notify: None,
            repo_up: true,
            repo_retry_delay,
            repo_retry_timer_armed: false,
        }
    }

    /// Handle for feeding notes in from outside the loop.
    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            notes: self.inbox_tx.clone(),
        }
    }

    /// The observability bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Read access to the restarter side.
    pub fn restarter(&self) -> &Restarter {
        &self.restarter
    }

    /// Read access to the graph side.
    pub fn graph_engine(&self) -> &GraphEngine {
        &self.graph
    }

    /// Current state of the unit at `path`.
    pub fn unit_state(&self, path: &ServicePath) -> Option<UnitState> {
        self.restarter.unit(path).map(|u| u.state())
    }

    /// Current state of the vertex at `path`.
    pub fn vertex_state(&self, path: &ServicePath) -> Option<VertexState> {
        self.graph.vertex_by_path(path).map(|v| v.state())
    }

    /// True while the repository is believed reachable.
    pub fn repo_up(&self) -> bool {
        self.repo_up
    }

    /// Number of pending timers.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Binds the readiness notification socket at the configured path.
    pub fn bind_notify(&mut self) -> Result<(), ManagerError> {
        let receiver =
            NotifyReceiver::bind(&self.cfg.notify_socket).map_err(ManagerError::NotifySocket)?;
        self.notify = Some(receiver);
        Ok(())
    }

    /// Installs a service into the graph.
    pub fn install_service(&mut self, record: &ServiceRecord) {
        self.graph.install_service(record);
    }

    /// Runs vertex setup over the whole graph, scheduling a repository
    /// retry if the catalog is unreachable.
    pub fn setup_graph(&mut self) {
        if let Err(err) = self.graph.setup_all(&self.bus) {
            self.repo_down(err);
        }
    }

    /// Runs the event loop until a shutdown signal arrives.
    pub async fn run(&mut self) -> Result<(), ManagerError> {
        self.spawn_subscriber_listener();
        loop {
            self.drain_notes();

            let ev = tokio::select! {
                res = os_signals::wait_for_shutdown_signal() => {
                    res.map_err(ManagerError::Signals)?;
                    LoopEvent::Shutdown
                }
                Some(pe) = self.tracker.next_event() => LoopEvent::Process(pe),
                fired = self.timers.expired() => LoopEvent::Timer(fired.1),
                msg = recv_notify(&mut self.notify) => match msg {
                    Ok(m) => LoopEvent::Notify(m),
                    Err(err) => {
                        tracing::warn!(error = %err, "notification receive failed");
                        continue;
                    }
                },
                Some(note) = self.inbox_rx.recv() => LoopEvent::Note(note),
                res = self.repo_watch.changed() => match res {
                    Ok(()) => LoopEvent::RepoChanged,
                    Err(_) => continue,
                },
            };

            match ev {
                LoopEvent::Shutdown => {
                    self.bus.publish(Event::now(EventKind::ShutdownRequested));
                    break;
                }
                LoopEvent::Process(pe) => self.on_process_event(pe),
                LoopEvent::Timer(payload) => self.on_timer(payload),
                LoopEvent::Notify(msg) => self.on_notify(msg),
                LoopEvent::Note(note) => self.submit_note(note),
                LoopEvent::RepoChanged => self.on_repo_changed(),
            }
        }
        Ok(())
    }

    /// Spawns the background task fanning bus events out to subscribers.
    fn spawn_subscriber_listener(&self) {
        let mut rx = self.bus.subscribe();
        let subs = Arc::clone(&self.subs);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => subs.emit_arc(Arc::new(ev)),
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        });
    }

    // ---------------------------
    // Dispatch
    // ---------------------------

    /// Enqueues one note.
    pub fn submit_note(&mut self, note: Note) {
        self.bus.publish(
            Event::now(EventKind::NoteEnqueued).with_detail(wire::encode_line(&note)),
        );
        self.notes.push(note);
    }

    /// Enqueues one note and drains the queue to empty.
    pub fn step_note(&mut self, note: Note) {
        self.submit_note(note);
        self.drain_notes();
    }

    /// Feeds one process event through the restarter and drains.
    pub fn step_process_event(&mut self, ev: ProcessEvent) {
        self.on_process_event(ev);
        self.drain_notes();
    }

    /// Fires every already-due timer, draining after each.
    pub fn run_due_timers(&mut self) {
        while let Some((_, payload)) = self.timers.poll_now() {
            self.on_timer(payload);
            self.drain_notes();
        }
    }

    /// Drains the note queue to empty, in insertion order.
    pub fn drain_notes(&mut self) {
        while let Some(note) = self.notes.pop() {
            match &note {
                Note::RestarterReq { path, kind, reason } => {
                    let mut cx = RestarterCx {
                        timers: &mut self.timers,
                        notes: &mut self.notes,
                        bus: &self.bus,
                        tracker: self.tracker.as_mut(),
                        cfg: &self.cfg,
                    };
                    let outcome = self.restarter.handle_request(
                        path,
                        *kind,
                        *reason,
                        self.repo.as_ref(),
                        &mut cx,
                    );
                    if let Err(err) = outcome {
                        tracing::warn!(%path, error = %err, "dropping request, repository away");
                        self.repo_down(err);
                    }
                }
                Note::StateChange { path, kind, .. } => {
                    if *kind == StateChangeKind::Online && self.cfg.is_repository_path(path) {
                        self.repo_came_up();
                    }
                    self.graph.process_note(&note, &mut self.notes, &self.bus);
                }
                Note::AdminReq { .. } => {
                    self.graph.process_note(&note, &mut self.notes, &self.bus);
                }
            }
        }
    }

    fn on_process_event(&mut self, ev: ProcessEvent) {
        let mut cx = RestarterCx {
            timers: &mut self.timers,
            notes: &mut self.notes,
            bus: &self.bus,
            tracker: self.tracker.as_mut(),
            cfg: &self.cfg,
        };
        self.restarter.handle_process_event(ev, &mut cx);
    }

    fn on_timer(&mut self, payload: TimerPayload) {
        if payload == TimerPayload::RepoRetry {
            self.repo_retry_timer_armed = false;
            self.probe_repo();
            return;
        }
        let mut cx = RestarterCx {
            timers: &mut self.timers,
            notes: &mut self.notes,
            bus: &self.bus,
            tracker: self.tracker.as_mut(),
            cfg: &self.cfg,
        };
        self.restarter.handle_timer(payload, &mut cx);
    }

    /// Routes a notification datagram to the unit owning the sender PID.
    pub fn on_notify(&mut self, msg: NotifyMessage) {
        let Some(pid) = msg.pid else {
            tracing::warn!("notification without peer credentials dropped");
            return;
        };
        for directive in msg.directives {
            match directive {
                NotifyDirective::Ready => {
                    let mut cx = RestarterCx {
                        timers: &mut self.timers,
                        notes: &mut self.notes,
                        bus: &self.bus,
                        tracker: self.tracker.as_mut(),
                        cfg: &self.cfg,
                    };
                    self.restarter.notify_ready(pid, &mut cx);
                }
                NotifyDirective::Status(status) => {
                    let mut cx = RestarterCx {
                        timers: &mut self.timers,
                        notes: &mut self.notes,
                        bus: &self.bus,
                        tracker: self.tracker.as_mut(),
                        cfg: &self.cfg,
                    };
                    self.restarter.notify_status(pid, &status, &mut cx);
                }
                NotifyDirective::MainPid(new_main) => {
                    self.restarter.notify_main_pid(pid, new_main);
                }
            }
        }
        self.drain_notes();
    }

    fn on_repo_changed(&mut self) {
        if let Err(err) = self.graph.refresh(&self.bus) {
            self.repo_down(err);
            return;
        }
        self.drain_notes();
    }

    // ---------------------------
    // Repository connectivity
    // ---------------------------

    fn repo_down(&mut self, err: RepoError) {
        if self.repo_up {
            self.bus.publish(
                Event::now(EventKind::RepositoryDown).with_error(err.to_string()),
            );
        }
        self.repo_up = false;
        if !self.repo_retry_timer_armed {
            self.timers.add(self.repo_retry_delay, TimerPayload::RepoRetry);
            self.repo_retry_timer_armed = true;
            self.repo_retry_delay =
                (self.repo_retry_delay * 2).min(self.cfg.repo_retry_max);
        }
    }

    fn probe_repo(&mut self) {
        match self.repo.ping() {
            Ok(()) => self.repo_came_up(),
            Err(err) => {
                tracing::warn!(error = %err, "repository still away");
                self.repo_down(err);
            }
        }
    }

    /// The service repository is reachable again: reconnect dependents.
    fn repo_came_up(&mut self) {
        if !self.repo_up {
            self.bus.publish(Event::now(EventKind::RepositoryUp));
        }
        self.repo_up = true;
        self.repo_retry_delay = self.cfg.repo_retry_first;
        if let Err(err) = self.graph.refresh(&self.bus) {
            self.repo_down(err);
        }
    }

    /// Checks every unit and graph invariant; returns the first violation.
    ///
    /// Test support: production code never calls this.
    pub fn verify_invariants(&self) -> Result<(), String> {
        self.restarter.verify_invariants()?;
        self.graph.graph().verify_invariants()
    }
}

/// Select arm helper: pends forever when no notification socket is bound.
async fn recv_notify(notify: &mut Option<NotifyReceiver>) -> std::io::Result<NotifyMessage> {
    match notify {
        Some(receiver) => receiver.recv().await,
        None => futures::future::pending().await,
    }
}
