//! # Runtime events emitted by the manager, restarter, and graph engine.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Unit lifecycle**: state entries, method forks, timeouts, process exits
//! - **Graph activity**: note traffic, cycle rejections, vertex states
//! - **Manager activity**: shutdown, repository connectivity
//! - **Subscriber plumbing**: overflow and panic isolation reports
//!
//! The [`Event`] struct carries metadata such as timestamps, the subject
//! path, PIDs, and error messages.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically, so events can be ordered even when delivered out-of-order
//! through async channels.
//!
//! ## Example
//! ```rust
//! use unitvisor::{Event, EventKind, ServicePath};
//!
//! let ev = Event::now(EventKind::MethodForked)
//!     .with_path(ServicePath::instance("db", "main"))
//!     .with_pid(4711)
//!     .with_detail("start");
//!
//! assert_eq!(ev.kind, EventKind::MethodForked);
//! assert_eq!(ev.pid, Some(4711));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::path::ServicePath;
use crate::process::Pid;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    SubscriberPanicked,
    /// Subscriber dropped an event (queue full or worker closed).
    SubscriberOverflow,

    // === Manager events ===
    /// Shutdown requested (OS signal received).
    ShutdownRequested,
    /// The service repository became reachable.
    RepositoryUp,
    /// The service repository became unreachable; a retry is scheduled.
    RepositoryDown,

    // === Unit lifecycle events ===
    /// A unit entered a state (the state name rides in `detail`).
    UnitStateEntered,
    /// A method was forked (method kind in `detail`, child in `pid`).
    MethodForked,
    /// A method timer fired before completion or readiness.
    MethodTimeout,
    /// A tracked process exited (exit description in `detail`).
    ProcessExited,
    /// A restart was scheduled after a transient failure.
    RestartScheduled,
    /// A unit landed in `Maintenance` (the reason rides in `error`).
    UnitMaintenance,
    /// A supervised child signalled readiness.
    UnitReady,
    /// A supervised child sent a status line (text in `detail`).
    UnitStatus,

    // === Graph events ===
    /// A note was enqueued on the note bus (description in `detail`).
    NoteEnqueued,
    /// An edge insertion was refused because it would close a cycle.
    CycleRejected,
    /// A vertex changed lifecycle state (state name in `detail`).
    VertexState,
}

/// Runtime event with optional metadata.
///
/// ## Fields
/// - `seq`: unique sequence number for ordering (monotonically increasing)
/// - `at`: wall-clock timestamp (may go backwards due to NTP; logging only)
/// - `kind`: event classification
/// - `path`, `pid`, `detail`, `error`, `delay`: optional metadata
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (may go backwards, use for logging only).
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Subject service path, if applicable.
    pub path: Option<ServicePath>,
    /// Subject PID, if applicable.
    pub pid: Option<Pid>,
    /// Free-form detail (state names, method kinds, status text).
    pub detail: Option<String>,
    /// Error message, if the event represents a failure.
    pub error: Option<String>,
    /// Delay until a scheduled follow-up (restart, retry), if relevant.
    pub delay: Option<Duration>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            path: None,
            pid: None,
            detail: None,
            error: None,
            delay: None,
        }
    }

    /// Attaches the subject path.
    pub fn with_path(mut self, path: ServicePath) -> Self {
        self.path = Some(path);
        self
    }

    /// Attaches the subject PID.
    pub fn with_pid(mut self, pid: Pid) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches free-form detail.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    /// Attaches a scheduled delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Creates a subscriber overflow event.
    ///
    /// Emitted when a subscriber's queue is full and an event is dropped.
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::now(EventKind::SubscriberOverflow)
            .with_error(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::now(EventKind::SubscriberPanicked)
            .with_detail(subscriber)
            .with_error(info)
    }
}
