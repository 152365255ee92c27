//! Periodic timers that run one at a time on the caller's thread
//!
//! There is no background thread here. Time only moves when the owner calls
//! [`Scheduler::fire_next`] with a later deadline, and each call hands back
//! at most one timer, so two timer callbacks can never overlap.

use std::fmt;
use std::time::Duration;

/// Timers can't fire more often than this, otherwise a zero interval would never let the clock move on.
const SHORTEST_INTERVAL: Duration = Duration::from_millis(1);

struct Timer<K> {
    key: K,
    interval: Duration,
    /// `None` when stopped
    due: Option<Duration>,
}

pub struct Scheduler<K> {
    now: Duration,
    timers: Vec<Timer<K>>,
}

impl<K: Copy + Eq + fmt::Debug> Default for Scheduler<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + fmt::Debug> Scheduler<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            timers: Vec::with_capacity(2),
        }
    }

    /// Adds a stopped timer. Registration order breaks ties between timers due at the same time.
    pub fn register(&mut self, key: K, interval: Duration) {
        debug_assert!(self.timer(key).is_none(), "{key:?} registered twice");
        self.timers.push(Timer {
            key,
            interval: interval.max(SHORTEST_INTERVAL),
            due: None,
        });
    }

    /// Time since the scheduler was created
    #[inline]
    #[must_use]
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Arms a stopped timer to fire one interval from now. Does nothing if it's already running.
    pub fn start(&mut self, key: K) {
        let now = self.now;
        if let Some(t) = self.timer_mut(key) {
            if t.due.is_none() {
                t.due = Some(now + t.interval);
            }
        }
    }

    pub fn stop(&mut self, key: K) {
        if let Some(t) = self.timer_mut(key) {
            t.due = None;
        }
    }

    pub fn stop_all(&mut self) {
        for t in &mut self.timers {
            t.due = None;
        }
    }

    /// A running timer will next fire one new interval from now.
    pub fn set_interval(&mut self, key: K, interval: Duration) {
        let now = self.now;
        if let Some(t) = self.timer_mut(key) {
            t.interval = interval.max(SHORTEST_INTERVAL);
            if t.due.is_some() {
                t.due = Some(now + t.interval);
            }
        }
    }

    #[must_use]
    pub fn is_running(&self, key: K) -> bool {
        self.timer(key).map_or(false, |t| t.due.is_some())
    }

    /// Absolute time of the earliest running timer
    #[must_use]
    pub fn next_due(&self) -> Option<Duration> {
        self.timers.iter().filter_map(|t| t.due).min()
    }

    /// Takes the earliest timer that is due at or before `deadline`.
    ///
    /// The clock jumps to that timer's due time, and the timer is re-armed for its next interval
    /// before it's returned, so the callback is free to stop it or change its interval.
    pub fn fire_next(&mut self, deadline: Duration) -> Option<K> {
        let t = self.timers.iter_mut()
            .filter(|t| t.due.map_or(false, |due| due <= deadline))
            // min_by_key keeps the first of equal elements, so ties go to the earlier registration
            .min_by_key(|t| t.due)?;
        let due = t.due?;
        t.due = Some(due + t.interval);
        let key = t.key;
        if due > self.now {
            self.now = due;
        }
        Some(key)
    }

    /// Moves the clock forward without firing anything. Call after draining [`fire_next`](Self::fire_next).
    pub fn advance_to(&mut self, deadline: Duration) {
        if deadline > self.now {
            self.now = deadline;
        }
    }

    fn timer(&self, key: K) -> Option<&Timer<K>> {
        self.timers.iter().find(|t| t.key == key)
    }

    fn timer_mut(&mut self, key: K) -> Option<&mut Timer<K>> {
        self.timers.iter_mut().find(|t| t.key == key)
    }
}

#[cfg(test)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum TestTimer { Fast, Slow }

#[cfg(test)]
fn drain(s: &mut Scheduler<TestTimer>, deadline_ms: u64) -> Vec<(TestTimer, u64)> {
    let deadline = Duration::from_millis(deadline_ms);
    let mut fired = vec![];
    while let Some(k) = s.fire_next(deadline) {
        fired.push((k, s.now().as_millis() as u64));
    }
    s.advance_to(deadline);
    fired
}

#[test]
fn fires_in_deadline_order() {
    let mut s = Scheduler::new();
    s.register(TestTimer::Fast, Duration::from_millis(10));
    s.register(TestTimer::Slow, Duration::from_millis(25));
    s.start(TestTimer::Fast);
    s.start(TestTimer::Slow);
    assert_eq!(drain(&mut s, 50), [
        (TestTimer::Fast, 10), (TestTimer::Fast, 20), (TestTimer::Slow, 25),
        (TestTimer::Fast, 30), (TestTimer::Fast, 40), (TestTimer::Fast, 50), (TestTimer::Slow, 50),
    ]);
    assert_eq!(Duration::from_millis(50), s.now());
    assert_eq!(Some(Duration::from_millis(60)), s.next_due());
}

#[test]
fn stopped_timers_dont_fire() {
    let mut s = Scheduler::new();
    s.register(TestTimer::Fast, Duration::from_millis(10));
    s.register(TestTimer::Slow, Duration::from_millis(10));
    s.start(TestTimer::Slow);
    s.stop(TestTimer::Slow);
    assert!(drain(&mut s, 100).is_empty());
    assert_eq!(None, s.next_due());
    assert!(!s.is_running(TestTimer::Fast));
}

#[test]
fn interval_change_rearms_from_now() {
    let mut s = Scheduler::new();
    s.register(TestTimer::Fast, Duration::from_millis(10));
    s.start(TestTimer::Fast);
    assert_eq!(drain(&mut s, 15), [(TestTimer::Fast, 10)]);
    s.set_interval(TestTimer::Fast, Duration::from_millis(100));
    assert!(drain(&mut s, 114).is_empty());
    assert_eq!(drain(&mut s, 115), [(TestTimer::Fast, 115)]);
}

#[test]
fn zero_interval_still_advances() {
    let mut s = Scheduler::new();
    s.register(TestTimer::Fast, Duration::ZERO);
    s.start(TestTimer::Fast);
    assert_eq!(3, drain(&mut s, 3).len());
}

#[test]
fn start_is_idempotent() {
    let mut s = Scheduler::new();
    s.register(TestTimer::Fast, Duration::from_millis(10));
    s.start(TestTimer::Fast);
    drain(&mut s, 5);
    s.start(TestTimer::Fast);
    assert_eq!(Some(Duration::from_millis(10)), s.next_due());
}
