//! Scheduled tasks owned by a session
//!
//! Every timer (delayed greeting, periodic re-announce) is a tokio task
//! registered here under an owner key. Cancelling an owner aborts all of
//! its tasks; dropping the scheduler aborts everything, so no timer
//! outlives the session or connection that created it.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Shortest period `schedule_every` will run at
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Who a task belongs to. Session-wide tasks and per-peer tasks live in
/// separate namespaces, so no peer id can name a session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    Session(&'static str),
    Peer(String),
}

impl Owner {
    pub fn peer(id: impl Into<String>) -> Self {
        Owner::Peer(id.into())
    }
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<(Owner, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once after `delay`
    pub fn schedule_once<F>(&mut self, owner: Owner, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        self.push(owner, handle);
    }

    /// Call `tick` every `interval`, first after one full interval.
    /// The task stops when `tick` returns `false`. Intervals shorter than
    /// [`MIN_INTERVAL`] are raised to it.
    pub fn schedule_every<F>(&mut self, owner: Owner, interval: Duration, mut tick: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let interval = if interval < MIN_INTERVAL {
            tracing::warn!(
                "Interval {:?} for {:?} too short; using {:?}",
                interval,
                owner,
                MIN_INTERVAL
            );
            MIN_INTERVAL
        } else {
            interval
        };
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                timer.tick().await;
                if !tick() {
                    break;
                }
            }
        });
        self.push(owner, handle);
    }

    /// Abort every task registered under `owner`. Returns how many were live.
    pub fn cancel_owner(&mut self, owner: &Owner) -> usize {
        let mut cancelled = 0;
        self.tasks.retain(|(key, handle)| {
            if key != owner {
                return true;
            }
            if !handle.is_finished() {
                cancelled += 1;
            }
            handle.abort();
            false
        });
        cancelled
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.tasks.drain(..) {
            handle.abort();
        }
    }

    /// Number of tasks still pending or running
    pub fn active(&self) -> usize {
        self.tasks.iter().filter(|(_, h)| !h.is_finished()).count()
    }

    pub fn active_for(&self, owner: &Owner) -> usize {
        self.tasks
            .iter()
            .filter(|(key, h)| key == owner && !h.is_finished())
            .count()
    }

    fn push(&mut self, owner: Owner, handle: JoinHandle<()>) {
        self.tasks.retain(|(_, h)| !h.is_finished());
        self.tasks.push((owner, handle));
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const KEEP_ALIVE: Owner = Owner::Session("keep-alive");

    #[tokio::test(start_paused = true)]
    async fn test_schedule_once_fires_after_delay() {
        let mut scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        scheduler.schedule_once(Owner::peer("peer-1"), Duration::from_millis(500), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_owner_prevents_firing() {
        let mut scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        scheduler.schedule_once(Owner::peer("peer-1"), Duration::from_millis(500), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.schedule_once(Owner::peer("peer-2"), Duration::from_secs(60), async {});

        assert_eq!(scheduler.cancel_owner(&Owner::peer("peer-1")), 1);
        assert_eq!(scheduler.active_for(&Owner::peer("peer-1")), 0);
        assert_eq!(scheduler.active_for(&Owner::peer("peer-2")), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_every_repeats_until_false() {
        let mut scheduler = Scheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        scheduler.schedule_every(KEEP_ALIVE, Duration::from_secs(30), move || {
            counter.fetch_add(1, Ordering::SeqCst) < 2
        });

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_everything() {
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let mut scheduler = Scheduler::new();
            let counter = fired.clone();
            scheduler.schedule_every(KEEP_ALIVE, Duration::from_secs(1), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            });
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_named_like_session_task_is_separate() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_every(KEEP_ALIVE, Duration::from_secs(30), || true);
        scheduler.schedule_once(Owner::peer("keep-alive"), Duration::from_secs(60), async {});

        assert_eq!(scheduler.cancel_owner(&Owner::peer("keep-alive")), 1);
        assert_eq!(scheduler.active_for(&KEEP_ALIVE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_raised_not_fatal() {
        let mut scheduler = Scheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        scheduler.schedule_every(KEEP_ALIVE, Duration::ZERO, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        tokio::time::sleep(MIN_INTERVAL * 5 + Duration::from_millis(1)).await;
        assert!(ticks.load(Ordering::SeqCst) >= 1);
        assert_eq!(scheduler.active_for(&KEEP_ALIVE), 1);
    }
}
