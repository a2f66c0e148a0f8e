//! # Timer set: monotonic millisecond timers for the event loop.
//!
//! [`TimerSet`] wraps [`tokio_util::time::DelayQueue`] behind the contract
//! the restarter needs:
//!
//! - **Monotonic scheduling** — delays ride on the runtime clock, not wall
//!   time.
//! - **Cancellation is idempotent** — [`TimerSet::del`] may be called with a
//!   stale id; a cancelled timer never delivers.
//! - **At-most-once delivery** — an id is dead after it fires.
//!
//! Timer ids are never reused: the set hands out its own monotonically
//! increasing [`TimerId`]s and maps them onto the queue's slab keys
//! internally, so a stale id held by a unit can never cancel somebody
//! else's timer.
//!
//! Firings are consumed on the event-loop thread via [`TimerSet::expired`]
//! (awaiting) or [`TimerSet::poll_now`] (non-blocking, used when draining).

use std::collections::HashMap;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio_util::time::delay_queue::{DelayQueue, Key};

use crate::path::ServicePath;

/// Handle to one scheduled timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Payload delivered when a supervisor timer fires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimerPayload {
    /// A unit's method execution budget elapsed.
    Method(ServicePath),
    /// A unit's post-failure cool-down elapsed.
    RestartCooldown(ServicePath),
    /// A unit's restart re-entry delay elapsed.
    RestartEntry(ServicePath),
    /// The repository reconnect probe is due.
    RepoRetry,
}

/// Set of pending timers with stable, non-reusable ids.
#[derive(Debug)]
pub struct TimerSet<T> {
    queue: DelayQueue<(u64, T)>,
    live: HashMap<u64, Key>,
    next_id: u64,
}

impl<T> Default for TimerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerSet<T> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            queue: DelayQueue::new(),
            live: HashMap::new(),
            next_id: 1,
        }
    }

    /// Schedules `payload` to be delivered after `delay`.
    pub fn add(&mut self, delay: Duration, payload: T) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        let key = self.queue.insert((id, payload), delay);
        self.live.insert(id, key);
        TimerId(id)
    }

    /// Cancels a timer. Idempotent: returns `false` if the timer already
    /// fired or was already cancelled.
    pub fn del(&mut self, id: TimerId) -> bool {
        match self.live.remove(&id.0) {
            Some(key) => self.queue.try_remove(&key).is_some(),
            None => false,
        }
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// True if no timer is pending.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Polls for an expired timer.
    fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<Option<(TimerId, T)>> {
        match self.queue.poll_expired(cx) {
            Poll::Ready(Some(expired)) => {
                let (id, payload) = expired.into_inner();
                self.live.remove(&id);
                Poll::Ready(Some((TimerId(id), payload)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Waits for the next firing.
    ///
    /// Pends forever while the set is empty. That is sound inside the
    /// single-threaded event loop: timers are only inserted by the loop
    /// body, so an empty set cannot gain members while the loop is parked
    /// here — some other event arm wakes it first.
    pub async fn expired(&mut self) -> (TimerId, T) {
        futures::future::poll_fn(|cx| match self.poll_expired(cx) {
            Poll::Ready(Some(fired)) => Poll::Ready(fired),
            _ => Poll::Pending,
        })
        .await
    }

    /// Returns an already-expired timer without waiting, if any.
    pub fn poll_now(&mut self) -> Option<(TimerId, T)> {
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        match self.poll_expired(&mut cx) {
            Poll::Ready(fired) => fired,
            Poll::Pending => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn delivers_after_delay() {
        let mut ts: TimerSet<&str> = TimerSet::new();
        ts.add(Duration::from_millis(2000), "method");

        advance(Duration::from_millis(1999)).await;
        assert!(ts.poll_now().is_none());

        advance(Duration::from_millis(1)).await;
        let (_, payload) = ts.poll_now().expect("timer due");
        assert_eq!(payload, "method");
        assert!(ts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_delivers() {
        let mut ts: TimerSet<&str> = TimerSet::new();
        let id = ts.add(Duration::from_millis(100), "doomed");
        assert!(ts.del(id));
        // cancelling again is a no-op
        assert!(!ts.del(id));

        advance(Duration::from_millis(200)).await;
        assert!(ts.poll_now().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_once_per_id() {
        let mut ts: TimerSet<&str> = TimerSet::new();
        let id = ts.add(Duration::from_millis(50), "once");

        advance(Duration::from_millis(50)).await;
        assert!(ts.poll_now().is_some());
        assert!(ts.poll_now().is_none());
        // the id is dead after firing
        assert!(!ts.del(id));
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_timers_fire_in_monotonic_order() {
        let mut ts: TimerSet<u32> = TimerSet::new();
        ts.add(Duration::from_millis(500), 2);
        ts.add(Duration::from_millis(100), 1);

        advance(Duration::from_millis(500)).await;
        assert_eq!(ts.poll_now().map(|(_, p)| p), Some(1));
        assert_eq!(ts.poll_now().map(|(_, p)| p), Some(2));
    }
}
