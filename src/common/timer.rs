//! Single-fire, cancellable timeouts.
//!
//! A timer is either fired or cancelled, never both: whichever side flips the
//! shared `settled` flag first wins. Cancelling after the timer fired is a
//! no-op, and so is firing after a cancel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use super::error::AgreementError;
use super::lock;

pub type OnFire = Box<dyn FnOnce() + Send + 'static>;

pub trait Timer: Send + Sync {
    fn arm(&self, after: Duration, on_fire: OnFire) -> TimerHandle;
}

/// Owned handle to an armed timer. Dropping the handle cancels the timer.
pub struct TimerHandle {
    settled: Arc<AtomicBool>,
    task: Option<AbortHandle>,
}

impl TimerHandle {
    fn new(settled: Arc<AtomicBool>, task: Option<AbortHandle>) -> Self {
        TimerHandle { settled, task }
    }

    pub fn cancel(&self) {
        if !self.settled.swap(true, Ordering::SeqCst) {
            if let Some(task) = &self.task {
                task.abort();
            }
        }
    }

    /// True once the timer has either fired or been cancelled.
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("settled", &self.is_settled())
            .finish()
    }
}

fn fire(settled: &AtomicBool, on_fire: OnFire) -> bool {
    if settled.swap(true, Ordering::SeqCst) {
        return false;
    }
    on_fire();
    true
}

/// Timer backed by a sleeping tokio task per arm.
pub struct TokioTimer {
    runtime: Handle,
}

impl TokioTimer {
    pub fn new() -> Result<Self, AgreementError> {
        let runtime = Handle::try_current().map_err(|_| AgreementError::NoRuntime)?;
        Ok(TokioTimer { runtime })
    }
}

impl Timer for TokioTimer {
    fn arm(&self, after: Duration, on_fire: OnFire) -> TimerHandle {
        let settled = Arc::new(AtomicBool::new(false));
        let task_settled = settled.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            fire(&task_settled, on_fire);
        });
        TimerHandle::new(settled, Some(task.abort_handle()))
    }
}

struct PendingTimer {
    after: Duration,
    settled: Arc<AtomicBool>,
    on_fire: OnFire,
}

/// Timer that only fires when told to. Drives deterministic simulations.
#[derive(Default)]
pub struct ManualTimer {
    pending: Mutex<Vec<PendingTimer>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of armed timers that have neither fired nor been cancelled.
    pub fn pending(&self) -> usize {
        lock(&self.pending)
            .iter()
            .filter(|timer| !timer.settled.load(Ordering::SeqCst))
            .count()
    }

    /// Durations of the still-pending timers, in arming order.
    pub fn pending_durations(&self) -> Vec<Duration> {
        lock(&self.pending)
            .iter()
            .filter(|timer| !timer.settled.load(Ordering::SeqCst))
            .map(|timer| timer.after)
            .collect()
    }

    /// Fires every pending timer and returns how many actually fired.
    /// Timers armed by the callbacks themselves stay pending.
    pub fn fire_all(&self) -> usize {
        let due = std::mem::take(&mut *lock(&self.pending));
        due.into_iter()
            .filter(|timer| !timer.settled.load(Ordering::SeqCst))
            .map(|timer| fire(&timer.settled, timer.on_fire))
            .filter(|fired| *fired)
            .count()
    }
}

impl Timer for ManualTimer {
    fn arm(&self, after: Duration, on_fire: OnFire) -> TimerHandle {
        let settled = Arc::new(AtomicBool::new(false));
        lock(&self.pending).push(PendingTimer {
            after,
            settled: settled.clone(),
            on_fire,
        });
        TimerHandle::new(settled, None)
    }
}
