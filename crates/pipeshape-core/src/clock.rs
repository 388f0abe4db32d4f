//! Deadline clock: absolute-time sleeping and oversleep recovery.
//!
//! Wraps `clock_gettime`/`clock_nanosleep` over `(sec, nsec)` pairs. The
//! monotonic clock is preferred and probed once; hosts without it fall
//! back to the realtime clock, and whichever id was chosen is reused for
//! every sleep so deadlines and wakeups stay on the same timeline.

use std::io;

use crate::error::{Error, Result};

pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Oversleep recovery bound: a lag within `recov_max * RECOVERY_FACTOR`
/// is made up by compressing the next sleep.
pub const RECOVERY_FACTOR: i64 = 2;

// ---------------------------------------------------------------------------
// Deadline arithmetic
// ---------------------------------------------------------------------------

/// An absolute instant on the chosen clock.
///
/// Invariant: `0 <= nsec < 1_000_000_000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    pub sec: i64,
    pub nsec: u32,
}

impl Deadline {
    pub const ZERO: Deadline = Deadline { sec: 0, nsec: 0 };

    pub fn new(sec: i64, nsec: u32) -> Self {
        debug_assert!(nsec < NANOS_PER_SEC as u32);
        Deadline { sec, nsec }
    }

    /// The next deadline, `duration` nanoseconds later, normalized.
    pub fn add_ns(self, duration: i64) -> Deadline {
        let total = self.nsec as i64 + duration % NANOS_PER_SEC;
        let sec = self.sec + duration / NANOS_PER_SEC + total.div_euclid(NANOS_PER_SEC);
        let nsec = total.rem_euclid(NANOS_PER_SEC);
        Deadline { sec, nsec: nsec as u32 }
    }

    /// The previous deadline, `duration` nanoseconds earlier, with borrow.
    pub fn sub_ns(self, duration: i64) -> Deadline {
        self.add_ns(-duration)
    }

    /// Signed distance `self - other` in nanoseconds.
    pub fn diff_ns(self, other: Deadline) -> i64 {
        (self.sec - other.sec) * NANOS_PER_SEC + self.nsec as i64 - other.nsec as i64
    }

    /// Nanosecond remainder of this instant by a period, for aligning to
    /// the next "nice round" multiple of the period.
    pub fn rem_ns(self, period: i64) -> i64 {
        let total = self.sec as i128 * NANOS_PER_SEC as i128 + self.nsec as i128;
        total.rem_euclid(period as i128) as i64
    }

    fn to_timespec(self) -> libc::timespec {
        libc::timespec {
            tv_sec: self.sec as libc::time_t,
            tv_nsec: self.nsec as libc::c_long,
        }
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// How a `sleep_until` ended.
#[derive(Debug)]
pub enum Wake {
    /// The deadline passed.
    Expired,
    /// A signal broke the sleep before the deadline; the caller
    /// re-evaluates its predicates and may re-sleep the remainder.
    Interrupted,
    /// The clock itself failed.
    Fatal(io::Error),
}

/// A clock id fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    id: libc::clockid_t,
}

impl Clock {
    /// The monotonic clock where available, realtime otherwise.
    pub fn monotonic() -> Clock {
        let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        // SAFETY: clock_gettime writes into the timespec we own; a probe
        // read has no side effects.
        let ok = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) } == 0;
        Clock {
            id: if ok { libc::CLOCK_MONOTONIC } else { libc::CLOCK_REALTIME },
        }
    }

    /// The realtime (wall) clock.
    pub fn realtime() -> Clock {
        Clock { id: libc::CLOCK_REALTIME }
    }

    /// Current time on this clock.
    pub fn now(&self) -> Deadline {
        let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        // SAFETY: the timespec is owned by this frame; the id was probed
        // at construction, so the call cannot fail with EINVAL.
        unsafe {
            libc::clock_gettime(self.id, &mut ts);
        }
        Deadline {
            sec: ts.tv_sec as i64,
            nsec: ts.tv_nsec as u32,
        }
    }

    /// Block until the absolute deadline on this clock.
    pub fn sleep_until(&self, deadline: Deadline) -> Wake {
        let ts = deadline.to_timespec();
        let err = sleep_abs(self.id, &ts, || self.now());
        match err {
            0 => Wake::Expired,
            libc::EINTR => Wake::Interrupted,
            e => Wake::Fatal(io::Error::from_raw_os_error(e)),
        }
    }
}

#[cfg(target_os = "linux")]
fn sleep_abs(id: libc::clockid_t, ts: &libc::timespec, _now: impl Fn() -> Deadline) -> libc::c_int {
    // SAFETY: ts lives for the duration of the call; a null remainder is
    // allowed with TIMER_ABSTIME since the target never changes.
    unsafe { libc::clock_nanosleep(id, libc::TIMER_ABSTIME, ts, std::ptr::null_mut()) }
}

#[cfg(not(target_os = "linux"))]
fn sleep_abs(_id: libc::clockid_t, ts: &libc::timespec, now: impl Fn() -> Deadline) -> libc::c_int {
    // Hosts without clock_nanosleep get a relative sleep against the same
    // clock; the absolute target is re-derived by the caller on retry.
    let target = Deadline::new(ts.tv_sec as i64, ts.tv_nsec as u32);
    let gap = target.diff_ns(now());
    if gap <= 0 {
        return 0;
    }
    let rel = libc::timespec {
        tv_sec: (gap / NANOS_PER_SEC) as libc::time_t,
        tv_nsec: (gap % NANOS_PER_SEC) as libc::c_long,
    };
    // SAFETY: rel is owned by this frame and outlives the call.
    let rc = unsafe { libc::nanosleep(&rel, std::ptr::null_mut()) };
    if rc == 0 {
        0
    } else {
        io::Error::last_os_error().raw_os_error().unwrap_or(libc::EINVAL)
    }
}

// ---------------------------------------------------------------------------
// Pacer
// ---------------------------------------------------------------------------

/// Owns the planned next deadline for a constant-period pump, advancing
/// it by one period per tick with the oversleep policy applied.
///
/// Recovery mode tracks `recov_max`, the worst post-sleep lag seen so
/// far. A wakeup lagging within `recov_max * RECOVERY_FACTOR` keeps the
/// planned timeline, so the following sleep is shorter and the lost time
/// is made up. A worse lag abandons the slot and restarts the plan from
/// now. Strict mode always restarts: the instantaneous rate is never
/// exceeded.
#[derive(Debug)]
pub struct Pacer {
    clock: Clock,
    next: Deadline,
    recov_max: i64,
    strict: bool,
}

impl Pacer {
    pub fn new(clock: Clock, strict: bool) -> Pacer {
        let next = clock.now();
        Pacer { clock, next, recov_max: 0, strict }
    }

    /// The planned deadline of the next tick.
    pub fn next_deadline(&self) -> Deadline {
        self.next
    }

    /// Restart the plan from now plus one period. Used after a parameter
    /// change and after idle stretches that make the old plan stale.
    pub fn rearm(&mut self, period_ns: i64) {
        self.next = self.clock.now().add_ns(period_ns);
    }

    /// Never plan earlier than `floor` (per-line pacing measures from the
    /// arrival of a line's first character).
    pub fn not_before(&mut self, floor: Deadline) {
        if self.next < floor {
            self.next = floor;
        }
    }

    /// One tick: sleep to the planned deadline and, if it expired,
    /// advance the plan per the recovery policy. An `Interrupted` wake
    /// leaves the plan untouched so the caller can re-enter after
    /// checking its parameter channel.
    pub fn sleep_tick(&mut self, period_ns: i64) -> Result<bool> {
        match self.clock.sleep_until(self.next) {
            Wake::Expired => {
                self.advance(period_ns);
                Ok(true)
            }
            Wake::Interrupted => Ok(false),
            Wake::Fatal(e) => Err(Error::io("clock", e)),
        }
    }

    fn advance(&mut self, period_ns: i64) {
        let now = self.clock.now();
        let lag = now.diff_ns(self.next);
        if lag <= 0 {
            self.next = self.next.add_ns(period_ns);
            return;
        }
        let recoverable =
            !self.strict && lag <= self.recov_max.saturating_mul(RECOVERY_FACTOR);
        if lag > self.recov_max {
            self.recov_max = lag;
        }
        if recoverable {
            // Keep the planned timeline; the next sleep compresses.
            self.next = self.next.add_ns(period_ns);
        } else {
            // Decline to recover this slot.
            self.next = now.add_ns(period_ns);
        }
    }
}
