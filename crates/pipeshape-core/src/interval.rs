//! Duration and rate grammar.
//!
//! Converts a textual parameter to a nanosecond count or one of the two
//! sentinels: `100%` shuts the valve (infinite delay), `0%` opens it
//! (zero delay). Rate units are converted to the per-character period:
//! `bps` treats one character as 8 bits, `cps` as 10, so `2400bps` is the
//! 3_333_333 ns it takes one 8-bit character to cross a 2400 bit/s line.

use crate::error::{Error, Result};

/// Longest token the grammar accepts, in bytes.
pub const MAX_TOKEN: usize = 63;

/// Ceiling for the converted value: the seconds part must fit an `i32`.
const MAX_SECONDS: i64 = i32::MAX as i64;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A parsed holding/periodic time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    /// A finite delay in nanoseconds (>= 0).
    Finite(i64),
    /// Zero delay; the pump never sleeps (`0%`).
    Immediate,
    /// Infinite delay; the pump sleeps until a parameter change (`100%`).
    Infinite,
}

impl Interval {
    /// The finite nanosecond count, treating `Immediate` as zero.
    /// Returns `None` for `Infinite`.
    pub fn nanos(self) -> Option<i64> {
        match self {
            Interval::Finite(ns) => Some(ns),
            Interval::Immediate => Some(0),
            Interval::Infinite => None,
        }
    }

    /// True when the pump should skip sleeping entirely.
    pub fn is_immediate(self) -> bool {
        matches!(self, Interval::Immediate | Interval::Finite(0))
    }
}

/// Unit suffixes, longest first so `ms` wins over `s` and `kbps` over `bps`.
/// Each entry is (suffix, bits-per-character or 0, decimal scale).
/// A zero bits field marks a plain time unit whose scale is the
/// nanoseconds-per-unit factor.
const UNITS: &[(&str, u32, i64)] = &[
    ("kbps", 8, 1_000),
    ("Mbps", 8, 1_000_000),
    ("Gbps", 8, 1_000_000_000),
    ("bps", 8, 1),
    ("cps", 10, 1),
    ("ms", 0, 1_000_000),
    ("us", 0, 1_000),
    ("ns", 0, 1),
    ("s", 0, NANOS_PER_SEC),
];

/// Parse a duration/rate token into an [`Interval`].
///
/// Grammar: `<number>[<unit>]` with `<number>` a finite non-negative
/// decimal and `<unit>` one of `s` (default), `ms`, `us`, `ns`, `bps`,
/// `kbps`, `Mbps`, `Gbps`, `cps`, `%`. The result truncates to integer
/// nanoseconds. A rate whose per-character period lands below 1 ns is
/// invalid, never clamped.
pub fn parse_interval(token: &str) -> Result<Interval> {
    let bad = || Error::BadInterval(token.to_string());

    let tok = token.trim_matches(|c: char| c.is_ascii_whitespace());
    if tok.is_empty() || tok.len() > MAX_TOKEN {
        return Err(bad());
    }

    if let Some(num) = tok.strip_suffix('%') {
        return match num {
            "0" => Ok(Interval::Immediate),
            "100" => Ok(Interval::Infinite),
            _ => Err(bad()),
        };
    }

    let (num, unit) = split_unit(tok);
    if num.is_empty() {
        return Err(bad());
    }

    match unit {
        Some(&(_, bits, scale)) if bits > 0 => {
            let value: f64 = num.parse().map_err(|_| bad())?;
            if !value.is_finite() || value <= 0.0 {
                return Err(bad());
            }
            // period = bits * 1e9 / (scale * value), truncated.
            let period = (bits as f64) * 1e9 / (scale as f64 * value);
            if period < 1.0 {
                return Err(bad());
            }
            clamp_finite(period as i64, bad)
        }
        Some(&(_, _, scale)) => parse_time(num, scale, bad),
        None => parse_time(num, NANOS_PER_SEC, bad),
    }
}

/// Split a token into its numeric part and a recognized unit suffix.
fn split_unit(tok: &str) -> (&str, Option<&'static (&'static str, u32, i64)>) {
    for entry in UNITS {
        if let Some(num) = tok.strip_suffix(entry.0) {
            return (num, Some(entry));
        }
    }
    (tok, None)
}

/// Parse a plain time number against a nanoseconds-per-unit scale.
fn parse_time(num: &str, scale: i64, bad: impl Fn() -> Error) -> Result<Interval> {
    if num.starts_with('-') || num.starts_with('+') {
        return Err(bad());
    }
    let ns = if num.bytes().all(|b| b.is_ascii_digit()) {
        // Integer path keeps full precision.
        let v: i64 = num.parse().map_err(|_| bad())?;
        v.checked_mul(scale).ok_or_else(&bad)?
    } else {
        let v: f64 = num.parse().map_err(|_| bad())?;
        if !v.is_finite() || v < 0.0 {
            return Err(bad());
        }
        let ns = v * scale as f64;
        if ns >= i64::MAX as f64 {
            return Err(bad());
        }
        ns as i64
    };
    clamp_finite(ns, bad)
}

fn clamp_finite(ns: i64, bad: impl Fn() -> Error) -> Result<Interval> {
    if ns < 0 || ns / NANOS_PER_SEC > MAX_SECONDS {
        return Err(bad());
    }
    Ok(Interval::Finite(ns))
}
