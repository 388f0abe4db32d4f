//! Process priority elevation as a capability query.
//!
//! The pumps sleep to nanosecond deadlines, so they ask for a real-time
//! scheduling class at startup. Failure is never fatal: each class falls
//! back to the next weaker one, and running at normal priority is a
//! valid outcome.

use crate::error::Result;

/// Highest priority class a filter may request.
pub const MAX_CLASS: u8 = 3;

/// Try to raise the calling process to `class`, falling back downward.
///
/// - `0`: normal scheduling (always succeeds, no-op)
/// - `1`: weakest real-time priority (the default for the pumps)
/// - `2`: strongest real-time priority available without privilege
/// - `3`: absolute strongest real-time priority
///
/// Returns the class actually achieved. Every downgrade emits a
/// warning-level diagnostic.
pub fn try_raise_priority(class: u8) -> Result<u8> {
    let mut want = class.min(MAX_CLASS);
    loop {
        if want == 0 {
            return Ok(0);
        }
        match set_class(want) {
            Ok(()) => return Ok(want),
            Err(e) => {
                log::warn!("priority class {want} unavailable ({e}), falling back");
                want -= 1;
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn set_class(class: u8) -> std::io::Result<()> {
    // SAFETY: both bound queries take no pointers.
    let (min, max) = unsafe {
        (
            libc::sched_get_priority_min(libc::SCHED_FIFO),
            libc::sched_get_priority_max(libc::SCHED_FIFO),
        )
    };
    if min < 0 || max < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let prio = match class {
        1 => min,
        2 => unprivileged_ceiling(max),
        _ => max,
    };
    let param = libc::sched_param { sched_priority: prio };
    // SAFETY: param is initialized and outlives the call; pid 0 targets
    // the calling process.
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// The strongest SCHED_FIFO priority RLIMIT_RTPRIO grants an
/// unprivileged process, capped at the scheduler maximum.
#[cfg(target_os = "linux")]
fn unprivileged_ceiling(max: libc::c_int) -> libc::c_int {
    let mut lim = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    // SAFETY: lim is owned by this frame; getrlimit only writes it.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_RTPRIO, &mut lim) };
    if rc != 0 {
        return max;
    }
    (lim.rlim_cur as libc::c_int).min(max).max(1)
}

#[cfg(not(target_os = "linux"))]
fn set_class(_class: u8) -> std::io::Result<()> {
    // No portable real-time class; report unavailable and let the
    // caller fall back to normal.
    Err(std::io::Error::from_raw_os_error(libc::ENOSYS))
}
