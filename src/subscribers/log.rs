//! # LogWriter — simple event printer
//!
//! A minimal subscriber that prints incoming [`Event`]s to stdout.
//! Use it for test or demo.
//!
//! ## Example output
//! ```text
//! [state] path=db:main state=start
//! [forked] path=db:main method=start pid=4711
//! [timeout] path=db:main
//! [exit] path=db:main pid=4711 status="exited(1)"
//! [restart] path=db:main delay=5s
//! [maintenance] path=db:main err="method failed more than 5 times"
//! [cycle-rejected] path=a
//! [shutdown-requested]
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn path_of(e: &Event) -> String {
    e.path.as_ref().map(|p| p.to_string()).unwrap_or_default()
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::UnitStateEntered => {
                println!("[state] path={} state={:?}", path_of(e), e.detail);
            }
            EventKind::MethodForked => {
                println!(
                    "[forked] path={} method={:?} pid={:?}",
                    path_of(e),
                    e.detail,
                    e.pid
                );
            }
            EventKind::MethodTimeout => {
                println!("[timeout] path={}", path_of(e));
            }
            EventKind::ProcessExited => {
                println!(
                    "[exit] path={} pid={:?} status={:?}",
                    path_of(e),
                    e.pid,
                    e.detail
                );
            }
            EventKind::RestartScheduled => {
                println!("[restart] path={} delay={:?}", path_of(e), e.delay);
            }
            EventKind::UnitMaintenance => {
                println!("[maintenance] path={} err={:?}", path_of(e), e.error);
            }
            EventKind::UnitReady => {
                println!("[ready] path={}", path_of(e));
            }
            EventKind::UnitStatus => {
                println!("[status] path={} text={:?}", path_of(e), e.detail);
            }
            EventKind::NoteEnqueued => {
                println!("[note] {}", e.detail.as_deref().unwrap_or(""));
            }
            EventKind::CycleRejected => {
                println!("[cycle-rejected] path={}", path_of(e));
            }
            EventKind::VertexState => {
                println!("[vertex] path={} state={:?}", path_of(e), e.detail);
            }
            EventKind::ShutdownRequested => {
                println!("[shutdown-requested]");
            }
            EventKind::RepositoryUp => {
                println!("[repository-up]");
            }
            EventKind::RepositoryDown => {
                println!("[repository-down] err={:?}", e.error);
            }
            EventKind::SubscriberPanicked | EventKind::SubscriberOverflow => {
                println!("[subscriber-trouble] err={:?}", e.error);
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
