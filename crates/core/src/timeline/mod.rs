//! Clocks and the deferred-callback queue that every timed behaviour in the
//! core runs on.
//!
//! Nothing here blocks: components arm timers with [`TimerQueue::arm`] and an
//! outer event loop pumps them by calling the owner's `poll(now)`. Each timer
//! carries the [`Generation`] that was current when it was armed, so timers
//! belonging to a superseded session can be recognised and dropped when they
//! come due.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Source of "now", in seconds.
pub trait Clock {
    fn now(&self) -> f64;
}

/// Wall clock measured from the moment it was started.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::start()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Virtual clock moved by hand. Clones share the same time, so one clone can
/// be handed to the audio context and another kept by the driver.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    time: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, seconds: f64) {
        self.time.set(seconds.max(0.0));
    }

    pub fn advance(&self, delta: f64) {
        self.time.set((self.time.get() + delta).max(0.0));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.time.get()
    }
}

/// Monotonically increasing token identifying one armed session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// A timer that has come due.
#[derive(Debug, Clone, PartialEq)]
pub struct Timer<K> {
    pub due: f64,
    pub generation: Generation,
    pub kind: K,
    seq: u64,
}

/// Pending timers ordered by due time, ties broken by arming order.
#[derive(Debug)]
pub struct TimerQueue<K> {
    pending: Vec<Timer<K>>,
    next_seq: u64,
    generation: Generation,
}

impl<K> TimerQueue<K> {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            next_seq: 0,
            generation: Generation::default(),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// True when `timer` belongs to the current generation.
    pub fn is_current(&self, timer: &Timer<K>) -> bool {
        timer.generation == self.generation
    }

    /// Starts a new generation and drops every pending timer.
    pub fn invalidate(&mut self) -> Generation {
        self.generation = self.generation.next();
        self.pending.clear();
        self.generation
    }

    /// Arms a timer tagged with the current generation.
    pub fn arm(&mut self, due: f64, kind: K) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Timer {
            due,
            generation: self.generation,
            kind,
            seq,
        });
    }

    /// Removes pending timers whose kind matches `predicate`.
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&K) -> bool) {
        self.pending.retain(|timer| !predicate(&timer.kind));
    }

    /// Pops the earliest timer due at or before `now`.
    pub fn pop_due(&mut self, now: f64) -> Option<Timer<K>> {
        let index = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, timer)| timer.due <= now)
            .min_by(|(_, a), (_, b)| {
                a.due
                    .total_cmp(&b.due)
                    .then_with(|| a.seq.cmp(&b.seq))
            })
            .map(|(index, _)| index)?;
        Some(self.pending.swap_remove(index))
    }

    /// Due time of the next pending timer, if any.
    pub fn next_due(&self) -> Option<f64> {
        self.pending
            .iter()
            .map(|timer| timer.due)
            .min_by(|a, b| a.total_cmp(b))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}
