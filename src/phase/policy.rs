//! Break selection.

use std::fmt::Debug;

use super::state::Phase;

/// Chooses which break follows an active phase.
pub trait BreakPolicy: Send + Sync + Debug {
    /// Break to start after the active phase of cycle `cycle_count`
    /// (zero-based, counting completed breaks).
    fn next_break(&self, cycle_count: u64) -> Phase;
}

/// Every `n`th break is long; the rest are short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EveryNth {
    every: u32,
}

impl EveryNth {
    /// Policy with a long break every `every` breaks. Zero disables long
    /// breaks.
    #[must_use]
    pub const fn new(every: u32) -> Self {
        Self { every }
    }
}

impl BreakPolicy for EveryNth {
    fn next_break(&self, cycle_count: u64) -> Phase {
        let every = u64::from(self.every);
        if every > 0 && (cycle_count + 1) % every == 0 {
            Phase::LongBreak
        } else {
            Phase::ShortBreak
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_fourth_break_is_long() {
        let policy = EveryNth::new(4);
        let kinds: Vec<Phase> = (0..8).map(|c| policy.next_break(c)).collect();
        assert_eq!(
            kinds,
            vec![
                Phase::ShortBreak,
                Phase::ShortBreak,
                Phase::ShortBreak,
                Phase::LongBreak,
                Phase::ShortBreak,
                Phase::ShortBreak,
                Phase::ShortBreak,
                Phase::LongBreak,
            ]
        );
    }

    #[test]
    fn zero_never_goes_long() {
        let policy = EveryNth::new(0);
        assert!((0..10).all(|c| policy.next_break(c) == Phase::ShortBreak));
    }

    #[test]
    fn one_is_always_long() {
        let policy = EveryNth::new(1);
        assert_eq!(policy.next_break(0), Phase::LongBreak);
        assert_eq!(policy.next_break(5), Phase::LongBreak);
    }
}
