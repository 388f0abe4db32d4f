//! Startup aligner: sleep to the next "nice round" multiple of an
//! interval on the wall clock.
//!
//! A pipeline that must start on a round instant (the top of a second,
//! a five-second boundary, a minute) sleeps here first. The target is
//! the next multiple of the interval aligned to the clock's zero
//! second, optionally pulled earlier by a premature delta and preceded
//! by a fixed standby sleep.

use crate::clock::{Clock, Deadline, Wake};
use crate::control::term_signal_seen;
use crate::error::{Error, Result};

/// Alignment parameters, all in nanoseconds.
#[derive(Debug, Clone, Copy)]
pub struct AlignSpec {
    /// The period whose next multiple is the target.
    pub interval: i64,
    /// Wake this much before the round instant.
    pub premature: i64,
    /// Sleep this long before even computing the target.
    pub standby: i64,
}

/// The next multiple of `interval` at or after `now`, aligned to the
/// clock's zero second.
pub fn next_round(now: Deadline, interval: i64) -> Deadline {
    let rem = now.rem_ns(interval);
    now.sub_ns(rem).add_ns(interval)
}

/// Sleep out the standby and then to the aligned instant.
///
/// Returns the instant that was waited for, or `None` when a
/// termination signal cut the wait short.
pub fn run_align(spec: &AlignSpec) -> Result<Option<Deadline>> {
    let wall = Clock::realtime();

    if spec.standby > 0 {
        let until = wall.now().add_ns(spec.standby);
        if !sleep_through(&wall, until)? {
            return Ok(None);
        }
    }

    let now = wall.now();
    let mut target = next_round(now, spec.interval).sub_ns(spec.premature);
    if target <= now {
        // The premature delta reached into the past; take the next slot.
        target = target.add_ns(spec.interval);
    }
    if !sleep_through(&wall, target)? {
        return Ok(None);
    }
    Ok(Some(target))
}

/// Absolute sleep that rides out signal interruptions. False means a
/// termination request arrived.
fn sleep_through(clock: &Clock, until: Deadline) -> Result<bool> {
    loop {
        if term_signal_seen() {
            return Ok(false);
        }
        match clock.sleep_until(until) {
            Wake::Expired => return Ok(true),
            Wake::Interrupted => continue,
            Wake::Fatal(e) => return Err(Error::io("clock", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::NANOS_PER_SEC;

    #[test]
    fn test_next_round_alignment() {
        let now = Deadline::new(1003, 250_000_000);
        // 5 s periods: next multiple is 1005.
        let t = next_round(now, 5 * NANOS_PER_SEC);
        assert_eq!(t, Deadline::new(1005, 0));
        // 1 s period: next whole second.
        let t = next_round(now, NANOS_PER_SEC);
        assert_eq!(t, Deadline::new(1004, 0));
        // 250 ms period.
        let t = next_round(now, 250_000_000);
        assert_eq!(t, Deadline::new(1003, 500_000_000));
    }

    #[test]
    fn test_next_round_on_exact_boundary_moves_forward() {
        let now = Deadline::new(1005, 0);
        let t = next_round(now, 5 * NANOS_PER_SEC);
        assert_eq!(t, Deadline::new(1010, 0));
    }

    #[test]
    fn test_align_returns_near_round_instant() {
        // A tiny interval keeps the test fast while proving alignment.
        let spec = AlignSpec {
            interval: 50_000_000,
            premature: 0,
            standby: 0,
        };
        let target = run_align(&spec).unwrap().expect("no termination");
        assert_eq!(target.rem_ns(50_000_000), 0);
        let now = Clock::realtime().now();
        // We woke at or after the target, within a loose bound.
        assert!(now >= target);
        assert!(now.diff_ns(target) < NANOS_PER_SEC);
    }

    #[test]
    fn test_premature_pulls_target_earlier() {
        let now = Deadline::new(1003, 0);
        let round = next_round(now, 5 * NANOS_PER_SEC);
        let pulled = round.sub_ns(500_000_000);
        assert_eq!(pulled, Deadline::new(1004, 500_000_000));
    }
}
