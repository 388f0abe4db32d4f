//! Byte/line quantity grammar with SI/IEC prefixes.
//!
//! `5` sets the counter to 5, `+5` adds 5, `t` asks the quota pump to
//! terminate. Prefixes scale by powers of 1000 (`k`, `M`, `G`, `T`, `P`,
//! `E`) or 1024 (`ki`, `Mi`, `Gi`, `Ti`, `Pi`, `Ei`); the legacy bare `K`
//! is 1024. Overflow saturates to `usize::MAX` instead of invalidating.

use crate::error::{Error, Result};

/// How a parsed value is applied to the quota counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QtyMode {
    /// Overwrite the counter.
    Set,
    /// Add to the counter, saturating.
    Add,
    /// Stop the pump.
    Terminate,
}

/// A parsed quantity command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantity {
    pub mode: QtyMode,
    pub value: usize,
}

impl Quantity {
    fn set(value: usize) -> Self {
        Quantity { mode: QtyMode::Set, value }
    }

    fn add(value: usize) -> Self {
        Quantity { mode: QtyMode::Add, value }
    }
}

/// Multiplier table. Two-letter IEC forms must be tried before the
/// one-letter SI forms so `ki` does not parse as `k` + junk.
const PREFIXES: &[(&str, u128)] = &[
    ("ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
    ("Ei", 1 << 60),
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("E", 1_000_000_000_000_000_000),
    ("K", 1 << 10),
];

/// Parse a quantity token.
///
/// Grammar: `[+]<number>[<prefix>]`, or the single letter `t`/`T` for
/// termination. Leading whitespace is skipped. A number containing `.` or
/// an exponent parses as a float; otherwise the integer path keeps full
/// precision up to the saturation bound.
pub fn parse_quantity(token: &str) -> Result<Quantity> {
    let bad = || Error::BadQuantity(token.to_string());

    let tok = token.trim_matches(|c: char| c.is_ascii_whitespace());
    if tok == "t" || tok == "T" {
        return Ok(Quantity { mode: QtyMode::Terminate, value: 0 });
    }
    if tok.is_empty() {
        return Err(bad());
    }

    let (additive, rest) = match tok.strip_prefix('+') {
        Some(r) => (true, r),
        None => (false, tok),
    };

    let (num, mult) = split_prefix(rest);
    if num.is_empty() {
        return Err(bad());
    }

    let value = if is_float_form(num) {
        let v: f64 = num.parse().map_err(|_| bad())?;
        if !v.is_finite() || v < 0.0 {
            return Err(bad());
        }
        let scaled = v * mult as f64;
        if scaled >= usize::MAX as f64 {
            usize::MAX
        } else {
            scaled as usize
        }
    } else {
        let v: u128 = num.parse().map_err(|_| bad())?;
        let scaled = v.saturating_mul(mult);
        if scaled > usize::MAX as u128 {
            usize::MAX
        } else {
            scaled as usize
        }
    };

    Ok(if additive { Quantity::add(value) } else { Quantity::set(value) })
}

/// Split the numeric part from a recognized multiplier suffix.
fn split_prefix(tok: &str) -> (&str, u128) {
    for (suffix, mult) in PREFIXES {
        if let Some(num) = tok.strip_suffix(suffix) {
            // A trailing `E` after digits is the exabyte prefix, but an
            // `E` inside an exponent ("1E3") belongs to the number; the
            // suffix only counts when what precedes it still ends in a
            // digit or a dot.
            if num.ends_with(|c: char| c.is_ascii_digit() || c == '.') {
                return (num, *mult);
            }
        }
    }
    (tok, 1)
}

/// A number parses as float when it carries a dot or a real exponent.
fn is_float_form(num: &str) -> bool {
    if num.contains('.') {
        return true;
    }
    let bytes = num.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'e' || *b == b'E' {
            // Exponent only if something follows.
            return i + 1 < bytes.len();
        }
    }
    false
}
