// src/clock.rs - Injectable time and randomness sources

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Wall-clock source shared by every per-channel component
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }

    pub fn advance_secs(&self, seconds: i64) {
        self.advance(chrono::Duration::seconds(seconds));
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Uniform choice among `len` candidates (timer messages, 8-ball answers, giveaway winners)
pub trait Picker: Send + Sync {
    /// Returns an index in `0..len`; callers never pass `len == 0`
    fn pick_index(&self, len: usize) -> usize;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngPicker;

impl Picker for ThreadRngPicker {
    fn pick_index(&self, len: usize) -> usize {
        rand::rng().random_range(0..len)
    }
}

/// Deterministic picker for reproducible runs
#[derive(Debug)]
pub struct SeededPicker {
    rng: Mutex<StdRng>,
}

impl SeededPicker {
    pub fn new(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl Picker for SeededPicker {
    fn pick_index(&self, len: usize) -> usize {
        self.rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .random_range(0..len)
    }
}

/// Pick one element of a slice, `None` when it is empty
pub fn choose<'a, T>(picker: &dyn Picker, items: &'a [T]) -> Option<&'a T> {
    if items.is_empty() {
        return None;
    }
    items.get(picker.pick_index(items.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance_secs(90);
        assert_eq!(clock.now() - start, chrono::Duration::seconds(90));
    }

    #[test]
    fn test_seeded_picker_is_reproducible() {
        let a = SeededPicker::new(7);
        let b = SeededPicker::new(7);
        let first: Vec<usize> = (0..10).map(|_| a.pick_index(5)).collect();
        let second: Vec<usize> = (0..10).map(|_| b.pick_index(5)).collect();
        assert_eq!(first, second);
        assert!(first.iter().all(|i| *i < 5));
    }

    #[test]
    fn test_choose_empty_slice() {
        let empty: [&str; 0] = [];
        assert!(choose(&ThreadRngPicker, &empty).is_none());
        assert_eq!(choose(&ThreadRngPicker, &["only"]), Some(&"only"));
    }
}
