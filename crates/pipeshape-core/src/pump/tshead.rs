//! Timed head: pass lines whose first-field timestamp lies in bound.
//!
//! Three bounds exist: `Within` keeps lines up to a fixed distance past
//! the program's start, `Until` keeps lines up to an absolute instant,
//! and `Trailing` keeps lines more than a fixed distance before the
//! newest timestamp seen so far. The trailing variant has to buffer
//! candidates: a line is only known to qualify once enough later input
//! has advanced the newest-seen time past it, and whatever is still
//! within the window when the input ends is dropped.

use std::collections::VecDeque;
use std::io::Write;

use crate::clock::{Clock, Deadline};
use crate::control::term_signal_seen;
use crate::error::{Error, Result};
use crate::input::ByteReader;
use crate::line::{ElasticLine, LineEnd};
use crate::pump::PumpEnd;
use crate::stamp::{StampMode, first_field, parse_stamp};

/// Which lines pass, relative to their parsed timestamp `ts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// `ts <= start + D` (`-i D`).
    Within(i64),
    /// `ts <= newest_seen - D` (`-i -D`); buffered release.
    Trailing(i64),
    /// `ts <= T` (`-t T`).
    Until(Deadline),
}

/// Full timed-head configuration.
#[derive(Debug, Clone, Copy)]
pub struct TsheadConfig {
    pub mode: StampMode,
    pub utc: bool,
    /// `-x`: the bound endpoint is exclusive.
    pub exclusive: bool,
    /// `-Z`: time zero is the first parsed line's timestamp.
    pub rezero: bool,
    pub bound: Bound,
}

/// The timed head. One instance survives across input files; the
/// `Within` bound is anchored at construction time.
pub struct TsheadPump {
    cfg: TsheadConfig,
    start: Deadline,
    zero: Option<Deadline>,
    held: VecDeque<(Vec<u8>, Deadline)>,
    newest: Option<Deadline>,
    program: String,
    skipped: u64,
}

impl TsheadPump {
    pub fn new(cfg: TsheadConfig, program: &str) -> TsheadPump {
        TsheadPump::with_start(cfg, program, Clock::realtime().now())
    }

    /// Anchor the elapsed-mode origin at an explicit instant so a `-t`
    /// bound parsed before construction shares the same zero.
    pub fn with_start(cfg: TsheadConfig, program: &str, start: Deadline) -> TsheadPump {
        TsheadPump {
            cfg,
            start,
            zero: None,
            held: VecDeque::new(),
            newest: None,
            program: program.to_string(),
            skipped: 0,
        }
    }

    /// Lines skipped because their timestamp field would not parse.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Pump one input stream. Stops early (still `Eof`) once a line
    /// beyond an upper bound shows up: everything after it is out of
    /// range by construction.
    pub fn pump<W: Write>(&mut self, rd: &mut ByteReader, out: &mut W) -> Result<PumpEnd> {
        let mut line = ElasticLine::new();
        loop {
            if term_signal_seen() {
                self.held.clear();
                return Ok(PumpEnd::Terminated);
            }
            let end = line.read_from(rd, None)?;
            if end == LineEnd::EofNoData {
                break;
            }
            let stop = self.feed(line.to_vec(), out)?;
            if stop || end == LineEnd::Eof {
                break;
            }
        }
        // Whatever is still inside a trailing window when the input
        // ends can never qualify.
        self.held.clear();
        out.flush().map_err(|e| Error::io("output", e))?;
        Ok(PumpEnd::Eof)
    }

    /// Handle one line. True means the current file is done.
    fn feed<W: Write>(&mut self, bytes: Vec<u8>, out: &mut W) -> Result<bool> {
        let field = first_field(&bytes);
        let parsed = std::str::from_utf8(field)
            .map_err(|_| Error::BadTimestamp(String::from_utf8_lossy(field).into_owned()))
            .and_then(|f| parse_stamp(f, self.cfg.mode, self.cfg.utc, self.start));
        let ts = match parsed {
            Ok(ts) => ts,
            Err(_) => {
                self.skipped += 1;
                eprintln!(
                    "{}: skipping line with unparsable timestamp field {:?}",
                    self.program,
                    String::from_utf8_lossy(field)
                );
                return Ok(false);
            }
        };
        let ts = self.rezeroed(ts);

        match self.cfg.bound {
            Bound::Within(d) => {
                let limit = self.start.add_ns(d);
                if self.in_bound(ts, limit) {
                    write_line(out, &bytes)?;
                    Ok(false)
                } else {
                    Ok(true)
                }
            }
            Bound::Until(t) => {
                if self.in_bound(ts, t) {
                    write_line(out, &bytes)?;
                    Ok(false)
                } else {
                    Ok(true)
                }
            }
            Bound::Trailing(d) => {
                let newest = match self.newest {
                    Some(n) if n >= ts => n,
                    _ => ts,
                };
                self.newest = Some(newest);
                self.held.push_back((bytes, ts));
                let limit = newest.sub_ns(d);
                while let Some((front, front_ts)) = self.held.front() {
                    if self.in_bound(*front_ts, limit) {
                        write_line(out, front)?;
                        self.held.pop_front();
                    } else {
                        break;
                    }
                }
                Ok(false)
            }
        }
    }

    /// With `-Z`, timestamps are shifted so the first parsed line sits
    /// at the start instant.
    fn rezeroed(&mut self, ts: Deadline) -> Deadline {
        if !self.cfg.rezero {
            return ts;
        }
        let zero = *self.zero.get_or_insert(ts);
        self.start.add_ns(ts.diff_ns(zero))
    }

    fn in_bound(&self, ts: Deadline, limit: Deadline) -> bool {
        if self.cfg.exclusive {
            ts < limit
        } else {
            ts <= limit
        }
    }
}

fn write_line<W: Write>(out: &mut W, bytes: &[u8]) -> Result<()> {
    out.write_all(bytes).map_err(|e| Error::io("output", e))
}
