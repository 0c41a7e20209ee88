//! Time abstraction for controllers and their harnesses.
//!
//! - `TimeSource` trait: "now" in nanoseconds since the UNIX epoch, and sleep
//! - `RealTime`: wall clock, advanced by tokio's clock
//! - `VirtualTime`: a clock that only moves when told to

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll, Waker},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use futures::future::BoxFuture;
use parking_lot::Mutex;

/// Abstraction over time supporting both real and virtual clocks.
pub trait TimeSource: Send + Sync + Clone + 'static {
    /// Current time as nanoseconds since the UNIX epoch.
    fn now_nanos(&self) -> u64;

    fn now(&self) -> Duration {
        Duration::from_nanos(self.now_nanos())
    }

    /// A future completing once `duration` has elapsed on this clock.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Completes at `deadline_nanos`, or immediately if it already passed.
    fn sleep_until(&self, deadline_nanos: u64) -> BoxFuture<'static, ()> {
        let now = self.now_nanos();
        self.sleep(Duration::from_nanos(deadline_nanos.saturating_sub(now)))
    }
}

/// Wall-clock time.
///
/// The UNIX-epoch offset is read once at construction; elapsed time is then
/// measured on tokio's monotonic clock, so paused tokio tests advance it too.
#[derive(Clone, Debug)]
pub struct RealTime {
    epoch_offset: u64,
    started: tokio::time::Instant,
}

impl Default for RealTime {
    fn default() -> Self {
        Self::new()
    }
}

impl RealTime {
    pub fn new() -> Self {
        let epoch_offset = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Self {
            epoch_offset,
            started: tokio::time::Instant::now(),
        }
    }
}

impl TimeSource for RealTime {
    fn now_nanos(&self) -> u64 {
        self.epoch_offset
            .saturating_add(self.started.elapsed().as_nanos() as u64)
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[derive(Debug, Default)]
struct VirtualTimeState {
    current_nanos: AtomicU64,
    /// Wakers of pending sleeps, with their deadlines.
    sleepers: Mutex<Vec<(u64, Waker)>>,
}

/// Deterministic clock for tests and simulated runs.
///
/// Time only advances through [`VirtualTime::advance`] or
/// [`VirtualTime::advance_to`]; sleeps whose deadline is reached are woken
/// at that point. Clones share the same clock.
#[derive(Clone, Debug, Default)]
pub struct VirtualTime {
    state: Arc<VirtualTimeState>,
}

impl VirtualTime {
    /// A clock starting at the epoch.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_time(initial_nanos: u64) -> Self {
        let time = Self::new();
        time.state
            .current_nanos
            .store(initial_nanos, Ordering::SeqCst);
        time
    }

    pub fn advance(&self, duration: Duration) {
        let target = self
            .now_nanos()
            .saturating_add(duration.as_nanos() as u64);
        self.advance_to(target);
    }

    /// Moves the clock forward to `target_nanos` and wakes every expired
    /// sleep. Moving backwards is ignored.
    pub fn advance_to(&self, target_nanos: u64) {
        let previous = self
            .state
            .current_nanos
            .fetch_max(target_nanos, Ordering::SeqCst);
        if target_nanos <= previous {
            return;
        }

        let expired: Vec<Waker> = {
            let mut sleepers = self.state.sleepers.lock();
            let (expired, pending): (Vec<_>, Vec<_>) = sleepers
                .drain(..)
                .partition(|(deadline, _)| *deadline <= target_nanos);
            *sleepers = pending;
            expired.into_iter().map(|(_, waker)| waker).collect()
        };
        for waker in expired {
            waker.wake();
        }
    }

    /// Earliest deadline among pending sleeps.
    pub fn next_wakeup_deadline(&self) -> Option<u64> {
        self.state
            .sleepers
            .lock()
            .iter()
            .map(|(deadline, _)| *deadline)
            .min()
    }
}

impl TimeSource for VirtualTime {
    fn now_nanos(&self) -> u64 {
        self.state.current_nanos.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let deadline = self
            .now_nanos()
            .saturating_add(duration.as_nanos() as u64);
        Box::pin(VirtualSleep {
            deadline,
            state: self.state.clone(),
        })
    }
}

struct VirtualSleep {
    deadline: u64,
    state: Arc<VirtualTimeState>,
}

impl Future for VirtualSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut sleepers = self.state.sleepers.lock();
        // checked under the lock so an advance cannot slip in between
        if self.state.current_nanos.load(Ordering::SeqCst) >= self.deadline {
            return Poll::Ready(());
        }
        sleepers.push((self.deadline, cx.waker().clone()));
        Poll::Pending
    }
}
