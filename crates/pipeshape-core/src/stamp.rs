//! First-field timestamps for the timed head.
//!
//! A line's leading whitespace-delimited field is one of three shapes:
//! localized calendar time `YYYYMMDDhhmmss[.frac]`, UNIX epoch seconds,
//! or seconds elapsed since program start. All three parse to a wall
//! clock `(sec, nsec)` pair; the elapsed form is offset by the caller's
//! start instant.

use crate::clock::{Deadline, NANOS_PER_SEC};
use crate::error::{Error, Result};

/// Which shape the first field takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampMode {
    /// `YYYYMMDDhhmmss[.frac]` in the local zone (or UTC with `-u`).
    Calendar,
    /// UNIX epoch seconds, fractional part optional.
    Epoch,
    /// Seconds since program start, fractional part optional.
    Elapsed,
}

/// Split a line into its first whitespace-delimited field and the rest.
/// Leading blanks are skipped; the field ends at the next blank.
pub fn first_field(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !matches!(b, b' ' | b'\t'))
        .unwrap_or(line.len());
    let rest = &line[start..];
    let end = rest
        .iter()
        .position(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
        .unwrap_or(rest.len());
    &rest[..end]
}

/// Parse a timestamp field.
///
/// `start` anchors the `Elapsed` mode; `utc` selects `timegm` over
/// `mktime` for calendar fields.
pub fn parse_stamp(
    field: &str,
    mode: StampMode,
    utc: bool,
    start: Deadline,
) -> Result<Deadline> {
    match mode {
        StampMode::Calendar => parse_calendar(field, utc),
        StampMode::Epoch => parse_seconds(field),
        StampMode::Elapsed => {
            let rel = parse_seconds(field)?;
            Ok(start.add_ns(rel.sec * NANOS_PER_SEC + rel.nsec as i64))
        }
    }
}

/// `<sec>[.frac]` with up to nanosecond precision, truncating deeper
/// digits.
fn parse_seconds(field: &str) -> Result<Deadline> {
    let bad = || Error::BadTimestamp(field.to_string());
    let (whole, frac) = match field.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (field, None),
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let sec: i64 = whole.parse().map_err(|_| bad())?;
    let nsec = match frac {
        None => 0,
        Some(f) => parse_frac(f).ok_or_else(bad)?,
    };
    Ok(Deadline::new(sec, nsec))
}

/// Fractional digits to nanoseconds, right-padded with zeros.
fn parse_frac(frac: &str) -> Option<u32> {
    if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut nsec: u32 = 0;
    for (i, b) in frac.bytes().enumerate() {
        if i == 9 {
            break;
        }
        nsec = nsec * 10 + (b - b'0') as u32;
    }
    for _ in frac.len()..9 {
        nsec *= 10;
    }
    Some(nsec)
}

/// `YYYYMMDDhhmmss[.frac]` through the C library's calendar arithmetic.
fn parse_calendar(field: &str, utc: bool) -> Result<Deadline> {
    let bad = || Error::BadTimestamp(field.to_string());
    let (digits, frac) = match field.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (field, None),
    };
    if digits.len() != 14 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let num = |range: std::ops::Range<usize>| -> i32 { digits[range].parse().unwrap() };

    // SAFETY: a zeroed tm is a valid starting point for mktime/timegm.
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    tm.tm_year = num(0..4) - 1900;
    tm.tm_mon = num(4..6) - 1;
    tm.tm_mday = num(6..8);
    tm.tm_hour = num(8..10);
    tm.tm_min = num(10..12);
    tm.tm_sec = num(12..14);
    tm.tm_isdst = -1;

    if tm.tm_mon < 0 || tm.tm_mon > 11 || tm.tm_mday < 1 || tm.tm_mday > 31 {
        return Err(bad());
    }

    // SAFETY: tm is fully initialized above; both functions only read
    // and normalize it.
    let sec = unsafe {
        if utc {
            libc::timegm(&mut tm)
        } else {
            libc::mktime(&mut tm)
        }
    };
    if sec == -1 {
        return Err(bad());
    }

    let nsec = match frac {
        None => 0,
        Some(f) => parse_frac(f).ok_or_else(bad)?,
    };
    Ok(Deadline::new(sec as i64, nsec))
}

/// Format a wall-clock instant as `YYYYMMDDhhmmss`, the same shape the
/// calendar parser accepts.
pub fn format_calendar(at: Deadline, utc: bool) -> String {
    // SAFETY: a zeroed tm is valid output storage for the re-entrant
    // converters, which fully overwrite it.
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    let sec = at.sec as libc::time_t;
    // SAFETY: sec and tm are owned by this frame; the _r converters
    // write only into tm.
    unsafe {
        if utc {
            libc::gmtime_r(&sec, &mut tm);
        } else {
            libc::localtime_r(&sec, &mut tm);
        }
    }
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calendar_format_round_trips() {
        let at = Deadline::new(1_716_002_400, 0);
        let text = format_calendar(at, true);
        assert_eq!(text, "20240518032000");
        let back = parse_stamp(&text, StampMode::Calendar, true, Deadline::ZERO).unwrap();
        assert_eq!(back.sec, at.sec);
    }

    #[test]
    fn test_first_field_extraction() {
        assert_eq!(first_field(b"1716000000 payload\n"), b"1716000000");
        assert_eq!(first_field(b"  \t x y\n"), b"x");
        assert_eq!(first_field(b"solo"), b"solo");
        assert_eq!(first_field(b"\n"), b"");
        assert_eq!(first_field(b""), b"");
    }

    #[test]
    fn test_epoch_seconds() {
        let d = parse_stamp("1716000000", StampMode::Epoch, false, Deadline::ZERO).unwrap();
        assert_eq!(d, Deadline::new(1_716_000_000, 0));
    }

    #[test]
    fn test_epoch_fraction_pads_and_truncates() {
        let d = parse_stamp("5.5", StampMode::Epoch, false, Deadline::ZERO).unwrap();
        assert_eq!(d, Deadline::new(5, 500_000_000));
        let d = parse_stamp("5.123456789123", StampMode::Epoch, false, Deadline::ZERO).unwrap();
        assert_eq!(d, Deadline::new(5, 123_456_789));
    }

    #[test]
    fn test_elapsed_offsets_from_start() {
        let start = Deadline::new(100, 500_000_000);
        let d = parse_stamp("2.25", StampMode::Elapsed, false, start).unwrap();
        assert_eq!(d, Deadline::new(102, 750_000_000));
    }

    #[test]
    fn test_calendar_utc() {
        // 2024-05-18 03:20:00 UTC == epoch 1716002400.
        let d = parse_stamp("20240518032000", StampMode::Calendar, true, Deadline::ZERO)
            .unwrap();
        assert_eq!(d.sec, 1_716_002_400);
        assert_eq!(d.nsec, 0);
    }

    #[test]
    fn test_calendar_utc_with_fraction() {
        let d = parse_stamp("20240518032000.25", StampMode::Calendar, true, Deadline::ZERO)
            .unwrap();
        assert_eq!(d.nsec, 250_000_000);
    }

    #[test]
    fn test_calendar_epoch_zero_era() {
        let d = parse_stamp("19700101000000", StampMode::Calendar, true, Deadline::ZERO)
            .unwrap();
        assert_eq!(d.sec, 0);
    }

    #[test]
    fn test_invalid_fields_rejected() {
        for field in [
            "", "x", "12.ab", "-5", "2024", "20241301000000", "20240500000000",
            "1716000000extra",
        ] {
            assert!(
                parse_stamp(field, StampMode::Epoch, false, Deadline::ZERO).is_err()
                    || parse_stamp(field, StampMode::Calendar, true, Deadline::ZERO)
                        .is_err(),
                "field {field:?} should fail in at least one mode"
            );
        }
        assert!(parse_stamp("20241301000000", StampMode::Calendar, true, Deadline::ZERO).is_err());
        assert!(parse_stamp("abc", StampMode::Epoch, false, Deadline::ZERO).is_err());
    }
}
