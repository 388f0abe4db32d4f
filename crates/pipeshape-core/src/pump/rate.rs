//! Constant-period pump: one unit per interval.
//!
//! Each unit (byte or line) is written and flushed, then the pump
//! sleeps to an absolute deadline advanced one period per tick. An
//! `Infinite` period shuts the valve: the pump parks until the live
//! parameter reopens it. `Immediate` removes the sleep entirely.

use std::io::Write;
use std::sync::Arc;

use crate::clock::{Clock, Pacer};
use crate::control::{ParamChannel, term_signal_seen};
use crate::error::{Error, Result};
use crate::input::ByteReader;
use crate::interval::Interval;
use crate::line::{ElasticLine, LineEnd};
use crate::pump::PumpEnd;

/// Pacing granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateUnit {
    /// One byte per interval (default).
    Char,
    /// One line per interval, measured top-char to top-char.
    Line,
}

/// The rate-limited pump. One instance survives across input files so
/// the cadence and recovery statistics carry over.
pub struct RatePump {
    unit: RateUnit,
    period: Interval,
    clock: Clock,
    pacer: Pacer,
    channel: Option<Arc<ParamChannel<Interval>>>,
    line: ElasticLine,
}

impl RatePump {
    pub fn new(
        unit: RateUnit,
        period: Interval,
        strict: bool,
        channel: Option<Arc<ParamChannel<Interval>>>,
    ) -> RatePump {
        let clock = Clock::monotonic();
        let mut pacer = Pacer::new(clock, strict);
        if let Some(ns) = period.nanos() {
            pacer.rearm(ns);
        }
        RatePump {
            unit,
            period,
            clock,
            pacer,
            channel,
            line: ElasticLine::new(),
        }
    }

    /// Pump one input stream dry.
    pub fn pump<W: Write>(&mut self, rd: &mut ByteReader, out: &mut W) -> Result<PumpEnd> {
        loop {
            if self.stopped() {
                return Ok(PumpEnd::Terminated);
            }
            self.poll_channel();
            match self.unit {
                RateUnit::Char => {
                    let Some(b) = rd.read_byte()? else {
                        return Ok(PumpEnd::Eof);
                    };
                    out.write_all(&[b]).map_err(|e| Error::io("stdout", e))?;
                    out.flush().map_err(|e| Error::io("stdout", e))?;
                    if let Some(end) = self.gate()? {
                        return Ok(end);
                    }
                }
                RateUnit::Line => {
                    let end = self.line.read_from(rd, Some(&self.clock))?;
                    if end == LineEnd::EofNoData {
                        return Ok(PumpEnd::Eof);
                    }
                    self.line.write_to(out)?;
                    out.flush().map_err(|e| Error::io("stdout", e))?;
                    if end == LineEnd::Eof {
                        return Ok(PumpEnd::Eof);
                    }
                    // The interval governs top-char to top-char: never
                    // plan a tick before the line that opened it.
                    if let Some(arrival) = self.line.arrival() {
                        self.pacer.not_before(arrival);
                    }
                    if let Some(end) = self.gate()? {
                        return Ok(end);
                    }
                }
            }
        }
    }

    fn stopped(&self) -> bool {
        match &self.channel {
            Some(ch) => ch.stopped(),
            None => term_signal_seen(),
        }
    }

    /// Apply a pending live parameter; re-arm the plan on change.
    fn poll_channel(&mut self) -> bool {
        let Some(ch) = &self.channel else { return false };
        let Some(period) = ch.take() else { return false };
        self.period = period;
        if let Some(ns) = period.nanos() {
            self.pacer.rearm(ns);
        }
        true
    }

    /// The post-unit sleep. Returns `Some(Terminated)` when a
    /// termination request broke the wait.
    fn gate(&mut self) -> Result<Option<PumpEnd>> {
        loop {
            if self.stopped() {
                return Ok(Some(PumpEnd::Terminated));
            }
            match self.period {
                Interval::Immediate | Interval::Finite(0) => return Ok(None),
                Interval::Infinite => {
                    // Shut: park until the parameter channel reopens us.
                    match &self.channel {
                        Some(ch) => {
                            ch.wait_change();
                            self.poll_channel();
                        }
                        None => {
                            // No channel to reopen a literal 100%; only
                            // a termination signal ends the park.
                            let parked = self.clock.now().add_ns(crate::clock::NANOS_PER_SEC);
                            if let crate::clock::Wake::Fatal(e) =
                                self.clock.sleep_until(parked)
                            {
                                return Err(Error::io("clock", e));
                            }
                        }
                    }
                }
                Interval::Finite(ns) => {
                    if self.pacer.sleep_tick(ns)? {
                        return Ok(None);
                    }
                    // Interrupted: re-check the channel, then re-sleep
                    // the remainder of the absolute deadline.
                    self.poll_channel();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;
    use std::time::Instant;

    fn feed(data: &'static [u8]) -> ByteReader {
        let mut fds = [0; 2];
        // SAFETY: fds is a two-element array as pipe requires.
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        // SAFETY: each File takes sole ownership of its pipe end.
        let read_end: File = unsafe { std::os::fd::FromRawFd::from_raw_fd(fds[0]) };
        let mut write_end: File = unsafe { std::os::fd::FromRawFd::from_raw_fd(fds[1]) };
        write_end.write_all(data).unwrap();
        drop(write_end);
        ByteReader::from_file(read_end)
    }

    #[test]
    fn test_char_mode_paces_each_byte() {
        let mut rd = feed(b"abcdef");
        let mut out = Vec::new();
        let mut pump = RatePump::new(
            RateUnit::Char,
            Interval::Finite(20_000_000),
            true,
            None,
        );
        let t0 = Instant::now();
        assert_eq!(pump.pump(&mut rd, &mut out).unwrap(), PumpEnd::Eof);
        let elapsed = t0.elapsed();
        assert_eq!(out, b"abcdef");
        // Six bytes, one period after each before EOF is noticed.
        assert!(elapsed.as_millis() >= 120, "ran in {elapsed:?}");
    }

    #[test]
    fn test_immediate_period_skips_sleeping() {
        let mut rd = feed(b"hello world");
        let mut out = Vec::new();
        let mut pump = RatePump::new(RateUnit::Char, Interval::Immediate, true, None);
        let t0 = Instant::now();
        assert_eq!(pump.pump(&mut rd, &mut out).unwrap(), PumpEnd::Eof);
        assert_eq!(out, b"hello world");
        assert!(t0.elapsed().as_millis() < 500);
    }

    #[test]
    fn test_line_mode_emits_whole_lines() {
        let mut rd = feed(b"one\ntwo\nthree");
        let mut out = Vec::new();
        let mut pump = RatePump::new(
            RateUnit::Line,
            Interval::Finite(10_000_000),
            true,
            None,
        );
        assert_eq!(pump.pump(&mut rd, &mut out).unwrap(), PumpEnd::Eof);
        assert_eq!(out, b"one\ntwo\nthree");
    }

    #[test]
    fn test_strict_mode_minimum_duration() {
        // 4 lines at 30 ms each: at least 3 inter-line sleeps plus the
        // trailing one before EOF.
        let mut rd = feed(b"a\nb\nc\nd\n");
        let mut out = Vec::new();
        let mut pump = RatePump::new(
            RateUnit::Line,
            Interval::Finite(30_000_000),
            true,
            None,
        );
        let t0 = Instant::now();
        pump.pump(&mut rd, &mut out).unwrap();
        assert!(t0.elapsed().as_millis() >= 90);
        assert_eq!(out, b"a\nb\nc\nd\n");
    }

    #[test]
    fn test_live_reopen_from_infinite() {
        use std::sync::atomic::AtomicBool;

        let channel = Arc::new(ParamChannel::new());
        let mut rd = feed(b"xy");
        let mut out = Vec::new();
        let worker_side = Arc::clone(&channel);
        let t = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(80));
            let cancel = AtomicBool::new(false);
            worker_side.propose(Interval::Immediate, &cancel)
        });
        let mut pump = RatePump::new(
            RateUnit::Char,
            Interval::Infinite,
            true,
            Some(channel),
        );
        assert_eq!(pump.pump(&mut rd, &mut out).unwrap(), PumpEnd::Eof);
        assert_eq!(out, b"xy");
        assert!(t.join().unwrap());
    }
}
