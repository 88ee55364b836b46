//! Single-slot one-shot timer.
//!
//! A [`TimerSlot`] holds at most one pending tokio task. Arming replaces
//! whatever was pending; cancelling aborts it. Every arm/cancel bumps a
//! generation counter, and an elapsed timer only runs its callback if it can
//! still claim the current generation.
//!
//! Once claimed, the task is detached from the slot: a later `arm` or
//! `cancel` cannot abort a callback that is already running.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

#[derive(Default)]
struct SlotState {
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

/// Owner of exactly one pending deferred callback.
#[derive(Default)]
pub struct TimerSlot {
    state: Mutex<SlotState>,
}

impl TimerSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Arm the slot to run `callback` after `delay`, replacing any pending timer.
    ///
    /// The callback receives the generation it was armed with. Returns that
    /// generation. Must be called from within a tokio runtime.
    pub fn arm_after<F, Fut>(self: &Arc<Self>, delay: Duration, callback: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;
        if let Some(previous) = state.pending.take() {
            previous.abort();
        }

        let slot: Weak<Self> = Arc::downgrade(self);
        // The slot lock is held until the handle is stored, so `claim`
        // cannot observe the slot before `pending` is set.
        state.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let claimed = slot.upgrade().is_some_and(|slot| slot.claim(generation));
            if claimed {
                callback(generation).await;
            }
        }));
        generation
    }

    /// Arm the slot for a wall-clock instant. Instants in the past fire
    /// immediately.
    pub fn arm_at<F, Fut>(self: &Arc<Self>, at: DateTime<Utc>, callback: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.arm_after(delay_until(at, Utc::now()), callback)
    }

    /// Abort the pending timer, if any, and invalidate its generation.
    ///
    /// Returns `true` if a timer was pending.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        match state.pending.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// `true` while a timer is armed and has not yet been claimed.
    pub fn is_armed(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Current generation. Changes on every `arm_*` and `cancel`.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// `true` if `generation` is still the slot's current generation.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    fn claim(&self, generation: u64) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        // Detach: dropping a JoinHandle does not abort the task.
        state.pending = None;
        true
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = state.pending.take() {
            handle.abort();
        }
    }
}

/// Non-negative delay from `now` until `at`.
pub fn delay_until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn bump(hits: &Arc<AtomicUsize>) -> impl FnOnce(u64) -> std::future::Ready<()> + Send + 'static {
        let hits = Arc::clone(hits);
        move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let slot = TimerSlot::new();
        let hits = counter();
        slot.arm_after(Duration::from_secs(10), bump(&hits));
        assert!(slot.is_armed());

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!slot.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_pending_timer() {
        let slot = TimerSlot::new();
        let first = counter();
        let second = counter();

        let g1 = slot.arm_after(Duration::from_secs(10), bump(&first));
        tokio::time::sleep(Duration::from_secs(5)).await;
        let g2 = slot.arm_after(Duration::from_secs(10), bump(&second));
        assert!(g2 > g1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_callback() {
        let slot = TimerSlot::new();
        let hits = counter();
        let armed = slot.arm_after(Duration::from_secs(1), bump(&hits));

        assert!(slot.cancel());
        assert!(!slot.is_current(armed));
        assert!(!slot.cancel(), "nothing left to cancel");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn running_callback_survives_rearm() {
        let slot = TimerSlot::new();
        let finished = counter();
        let seen_generation = Arc::new(AtomicU64::new(0));

        let done = Arc::clone(&finished);
        let seen = Arc::clone(&seen_generation);
        let armed = slot.arm_after(Duration::from_secs(1), move |generation| async move {
            seen.store(generation, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(10)).await;
            done.fetch_add(1, Ordering::SeqCst);
        });

        // Callback is now mid-flight.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(seen_generation.load(Ordering::SeqCst), armed);
        assert!(!slot.is_armed());

        slot.cancel();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn arm_at_past_instant_fires_immediately() {
        let slot = TimerSlot::new();
        let hits = counter();
        slot.arm_at(Utc::now() - chrono::Duration::minutes(5), bump(&hits));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_until_never_negative() {
        let now = Utc::now();
        assert_eq!(delay_until(now - chrono::Duration::seconds(5), now), Duration::ZERO);
        assert_eq!(
            delay_until(now + chrono::Duration::seconds(5), now),
            Duration::from_secs(5)
        );
    }
}
