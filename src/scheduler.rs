//! Tick-ordered event queue driving a run
//!
//! Events are plain data. `step()` hands the earliest one back to the owner,
//! which dispatches it and may schedule or cancel freely in the meantime.

use crate::error::{Result, SimError};
use std::collections::VecDeque;

pub type Tick = i64;

pub const TICKS_PER_SECOND: Tick = 1024;
/// One logic frame is 1/16 s
pub const TICKS_PER_FRAME: Tick = 64;

/// Whole ticks for a duration in seconds (truncated)
pub fn seconds(s: f64) -> Tick {
    (s * TICKS_PER_SECOND as f64) as Tick
}

pub fn frames(n: i64) -> Tick {
    n * TICKS_PER_FRAME
}

/// Whole ticks for a latency in milliseconds (truncated)
pub fn ms(ms: i64) -> Tick {
    ms * TICKS_PER_SECOND / 1000
}

/// Convert a fractional delay into ticks, rejecting anything that is not a
/// non-negative whole number.
pub fn whole_ticks(delay: f64) -> Result<Tick> {
    if !delay.is_finite() || delay < 0.0 || delay.fract() != 0.0 {
        return Err(SimError::InvalidDelay(delay));
    }
    Ok(delay as Tick)
}

#[derive(Debug, Clone)]
struct Entry<E> {
    tick: Tick,
    event: E,
}

/// Stable priority queue keyed by absolute tick
#[derive(Debug, Clone)]
pub struct Scheduler<E> {
    now: Tick,
    queue: VecDeque<Entry<E>>,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self {
            now: 0,
            queue: VecDeque::new(),
        }
    }
}

impl<E: PartialEq> Scheduler<E> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn now(&self) -> Tick {
        self.now
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn peek_tick(&self) -> Option<Tick> {
        self.queue.front().map(|e| e.tick)
    }

    /// Queue `event` at `now + delay` and return the absolute tick, which is
    /// the handle later passed to [`Scheduler::cancel`].
    pub fn schedule(&mut self, delay: Tick, event: E) -> Result<Tick> {
        if delay < 0 {
            return Err(SimError::InvalidDelay(delay as f64));
        }
        let tick = self.now + delay;
        // After every entry with tick <= target, so equal ticks keep insertion order
        let idx = self.queue.partition_point(|e| e.tick <= tick);
        self.queue.insert(idx, Entry { tick, event });
        Ok(tick)
    }

    /// Remove the first entry at `tick` equal to `event`.
    pub fn cancel(&mut self, tick: Tick, event: &E) -> bool {
        let start = self.queue.partition_point(|e| e.tick < tick);
        let found = self
            .queue
            .iter()
            .skip(start)
            .take_while(|e| e.tick == tick)
            .position(|e| e.event == *event);
        match found {
            Some(offset) => {
                self.queue.remove(start + offset);
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, tick: Tick, event: &E) -> bool {
        let start = self.queue.partition_point(|e| e.tick < tick);
        self.queue
            .iter()
            .skip(start)
            .take_while(|e| e.tick == tick)
            .any(|e| e.event == *event)
    }

    /// Pop the earliest event and advance the clock to it.
    pub fn step(&mut self) -> Option<(Tick, E)> {
        let entry = self.queue.pop_front()?;
        self.now = entry.tick;
        Some((entry.tick, entry.event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_equal_ticks_keep_insertion_order() {
        let mut s = Scheduler::new();
        s.schedule(5, "c").unwrap();
        s.schedule(2, "a").unwrap();
        s.schedule(2, "b").unwrap();

        assert_eq!(s.step(), Some((2, "a")));
        assert_eq!(s.step(), Some((2, "b")));
        assert_eq!(s.step(), Some((5, "c")));
        assert_eq!(s.step(), None);
        assert_eq!(s.now(), 5);
    }

    #[test]
    fn test_cancel() {
        let mut s = Scheduler::new();
        let h = s.schedule(10, 1u32).unwrap();
        s.schedule(10, 2u32).unwrap();

        assert!(s.cancel(h, &1));
        assert!(!s.cancel(h, &1));
        assert!(!s.cancel(99, &2));
        assert_eq!(s.step(), Some((10, 2)));
        assert!(s.is_empty());
    }

    #[test]
    fn test_schedule_is_relative_to_now() {
        let mut s = Scheduler::new();
        s.schedule(100, 'x').unwrap();
        s.step();
        let h = s.schedule(24, 'y').unwrap();
        assert_eq!(h, 124);
        assert!(s.is_scheduled(124, &'y'));
    }

    #[test]
    fn test_invalid_delays() {
        let mut s: Scheduler<u8> = Scheduler::new();
        assert!(matches!(s.schedule(-1, 0), Err(SimError::InvalidDelay(_))));
        assert!(whole_ticks(1.5).is_err());
        assert!(whole_ticks(-2.0).is_err());
        assert!(whole_ticks(f64::NAN).is_err());
        assert_eq!(whole_ticks(48.0).unwrap(), 48);
    }

    #[test]
    fn test_units() {
        assert_eq!(seconds(1.5), 1536);
        assert_eq!(frames(16), TICKS_PER_SECOND);
        assert_eq!(ms(1000), 1024);
    }

    proptest! {
        #[test]
        fn prop_step_order_is_stable(delays in proptest::collection::vec(0i64..50, 0..64)) {
            let mut s = Scheduler::new();
            for (i, d) in delays.iter().enumerate() {
                s.schedule(*d, i).unwrap();
            }
            let mut last: Option<(Tick, usize)> = None;
            while let Some((tick, i)) = s.step() {
                prop_assert_eq!(tick, delays[i]);
                if let Some((t0, i0)) = last {
                    prop_assert!(t0 < tick || (t0 == tick && i0 < i));
                }
                last = Some((tick, i));
            }
        }
    }
}
