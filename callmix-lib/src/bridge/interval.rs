//! Interval hooks: periodic callbacks on a participant's thread.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::BridgeChannel;

/// What an interval callback wants done with its hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalAction {
    /// Fire again one period after the missed deadline.
    Keep,
    Remove,
    /// Change the period and fire that long from now.
    Reschedule(Duration),
}

pub type IntervalCallback = Arc<dyn Fn(&Arc<BridgeChannel>) -> IntervalAction + Send + Sync>;

#[derive(Clone)]
pub(crate) struct IntervalHook {
    pub(crate) id: u64,
    pub(crate) period: Duration,
    pub(crate) trip: Instant,
    seqno: u64,
    pub(crate) callback: IntervalCallback,
    pub(crate) remove_on_pull: bool,
}

impl PartialEq for IntervalHook {
    fn eq(&self, other: &Self) -> bool {
        self.trip == other.trip && self.seqno == other.seqno
    }
}

impl Eq for IntervalHook {}

impl PartialOrd for IntervalHook {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IntervalHook {
    // Reversed so the max-heap pops the earliest trip first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .trip
            .cmp(&self.trip)
            .then_with(|| other.seqno.cmp(&self.seqno))
    }
}

/// Min-heap of interval hooks keyed by (trip time, insertion order).
#[derive(Clone, Default)]
pub struct IntervalHooks {
    heap: BinaryHeap<IntervalHook>,
    next_seqno: u64,
}

impl IntervalHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Schedule `callback` every `period`, first firing at `start + period`.
    pub(crate) fn add(
        &mut self,
        id: u64,
        period: Duration,
        start: Instant,
        callback: IntervalCallback,
        remove_on_pull: bool,
    ) {
        let seqno = self.bump_seqno();
        self.heap.push(IntervalHook {
            id,
            period,
            trip: start + period,
            seqno,
            callback,
            remove_on_pull,
        });
    }

    /// Put a fired hook back with a new trip time.
    pub(crate) fn reinsert(&mut self, mut hook: IntervalHook) {
        hook.seqno = self.bump_seqno();
        self.heap.push(hook);
    }

    fn bump_seqno(&mut self) -> u64 {
        let seqno = self.next_seqno;
        self.next_seqno += 1;
        seqno
    }

    /// Earliest deadline, if any hook is scheduled.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|hook| hook.trip)
    }

    /// Remove and return the earliest hook if it is due at `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<IntervalHook> {
        if self.heap.peek()?.trip <= now {
            self.heap.pop()
        } else {
            None
        }
    }

    pub(crate) fn remove_where(&mut self, mut remove: impl FnMut(&IntervalHook) -> bool) {
        self.heap.retain(|hook| !remove(hook));
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &IntervalHook> {
        self.heap.iter()
    }
}

/// Next trip after `now` for a hook that was due at `trip`.
///
/// Skips whole periods so a late thread fires once and then stays on the
/// original cadence.
pub(crate) fn next_trip(trip: Instant, period: Duration, now: Instant) -> Instant {
    if period.is_zero() {
        return now;
    }
    if now < trip {
        return trip + period;
    }
    let late = (now - trip).as_nanos();
    let period_ns = period.as_nanos();
    let into_period = late % period_ns;
    let remaining = period_ns - into_period;
    now + Duration::from_nanos(remaining as u64)
}
