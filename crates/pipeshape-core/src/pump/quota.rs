//! Quota pump: release units while an externally fed counter has them.
//!
//! The counter starts at the argument value (or zero when a control
//! file supplies it) and each emitted unit decrements it. When it runs
//! dry the pump blocks on the parameter channel until a `Set` or `Add`
//! arrives, or a termination request ends the run cleanly.

use std::io::Write;
use std::sync::Arc;

use crate::control::{ParamChannel, term_signal_seen};
use crate::error::{Error, Result};
use crate::input::ByteReader;
use crate::line::{ElasticLine, LineEnd};
use crate::pump::PumpEnd;
use crate::quantity::{QtyMode, Quantity};

/// Quota granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaUnit {
    /// One byte per quota unit (default).
    Char,
    /// One line per quota unit.
    Line,
}

/// The quota-gated pump. One instance survives across input files so
/// the remaining quota carries over.
pub struct QuotaPump {
    unit: QuotaUnit,
    available: usize,
    channel: Option<Arc<ParamChannel<Quantity>>>,
    line: ElasticLine,
}

impl QuotaPump {
    pub fn new(
        unit: QuotaUnit,
        initial: usize,
        channel: Option<Arc<ParamChannel<Quantity>>>,
    ) -> QuotaPump {
        QuotaPump {
            unit,
            available: initial,
            channel,
            line: ElasticLine::new(),
        }
    }

    /// Emit one starter newline before any input is read (`-1`), so a
    /// blocked downstream consumer can get going.
    pub fn bootstrap<W: Write>(&mut self, out: &mut W) -> Result<()> {
        out.write_all(b"\n").map_err(|e| Error::io("stdout", e))?;
        out.flush().map_err(|e| Error::io("stdout", e))
    }

    /// Pump one input stream dry.
    pub fn pump<W: Write>(&mut self, rd: &mut ByteReader, out: &mut W) -> Result<PumpEnd> {
        loop {
            if self.stopped() {
                return Ok(PumpEnd::Terminated);
            }
            match self.unit {
                QuotaUnit::Char => {
                    let Some(b) = rd.read_byte()? else {
                        return Ok(PumpEnd::Eof);
                    };
                    if !self.acquire()? {
                        return Ok(PumpEnd::Terminated);
                    }
                    out.write_all(&[b]).map_err(|e| Error::io("stdout", e))?;
                    out.flush().map_err(|e| Error::io("stdout", e))?;
                }
                QuotaUnit::Line => {
                    let end = self.line.read_from(rd, None)?;
                    if end == LineEnd::EofNoData {
                        return Ok(PumpEnd::Eof);
                    }
                    if !self.acquire()? {
                        return Ok(PumpEnd::Terminated);
                    }
                    self.line.write_to(out)?;
                    out.flush().map_err(|e| Error::io("stdout", e))?;
                    if end == LineEnd::Eof {
                        return Ok(PumpEnd::Eof);
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

    /// Fold a delivered quantity into the counter. True means a
    /// termination command.
    fn apply(&mut self, q: Quantity) -> bool {
        match q.mode {
            QtyMode::Set => self.available = q.value,
            QtyMode::Add => self.available = self.available.saturating_add(q.value),
            QtyMode::Terminate => return true,
        }
        false
    }

    /// Take one unit from the counter, blocking while it is empty.
    /// False means termination was requested instead.
    fn acquire(&mut self) -> Result<bool> {
        let channel = self.channel.clone();
        loop {
            if let Some(ch) = &channel {
                while let Some(q) = ch.take() {
                    if self.apply(q) {
                        ch.request_term();
                    }
                }
                if ch.stopped() {
                    return Ok(false);
                }
            } else if term_signal_seen() {
                return Ok(false);
            }

            if self.available > 0 {
                self.available -= 1;
                return Ok(true);
            }

            match &channel {
                Some(ch) => ch.wait_change(),
                // No channel can ever refill a literal quota; park until
                // a termination signal.
                None => std::thread::sleep(crate::control::POLL_TICK),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;
    use std::os::fd::FromRawFd;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn feed(data: &'static [u8]) -> ByteReader {
        let mut fds = [0; 2];
        // SAFETY: fds is a two-element array as pipe requires.
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        // SAFETY: each File takes sole ownership of its pipe end.
        let read_end: File = unsafe { File::from_raw_fd(fds[0]) };
        let mut write_end: File = unsafe { File::from_raw_fd(fds[1]) };
        write_end.write_all(data).unwrap();
        drop(write_end);
        ByteReader::from_file(read_end)
    }

    #[test]
    fn test_emits_exactly_the_quota_then_terminates() {
        let channel = Arc::new(ParamChannel::new());
        let mut rd = feed(b"0123456789");
        let mut out = Vec::new();

        let worker_side = Arc::clone(&channel);
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(60));
            worker_side.request_term();
        });

        let mut pump = QuotaPump::new(QuotaUnit::Char, 5, Some(Arc::clone(&channel)));
        assert_eq!(pump.pump(&mut rd, &mut out).unwrap(), PumpEnd::Terminated);
        assert_eq!(out, b"01234");
        t.join().unwrap();
    }

    #[test]
    fn test_additive_refills_unblock() {
        let channel = Arc::new(ParamChannel::new());
        let mut rd = feed(b"abcdefgh");
        let mut out = Vec::new();

        let worker_side = Arc::clone(&channel);
        let t = std::thread::spawn(move || {
            let cancel = AtomicBool::new(false);
            std::thread::sleep(Duration::from_millis(30));
            assert!(worker_side.propose(
                Quantity { mode: QtyMode::Add, value: 3 },
                &cancel
            ));
            std::thread::sleep(Duration::from_millis(30));
            assert!(worker_side.propose(
                Quantity { mode: QtyMode::Add, value: 3 },
                &cancel
            ));
            std::thread::sleep(Duration::from_millis(30));
            assert!(worker_side.propose(
                Quantity { mode: QtyMode::Terminate, value: 0 },
                &cancel
            ));
        });

        let mut pump = QuotaPump::new(QuotaUnit::Char, 0, Some(Arc::clone(&channel)));
        assert_eq!(pump.pump(&mut rd, &mut out).unwrap(), PumpEnd::Terminated);
        assert_eq!(out, b"abcdef");
        t.join().unwrap();
    }

    #[test]
    fn test_line_units() {
        let mut rd = feed(b"one\ntwo\nthree\nfour\n");
        let mut out = Vec::new();
        let channel = Arc::new(ParamChannel::new());
        let worker_side = Arc::clone(&channel);
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            worker_side.request_term();
        });

        let mut pump = QuotaPump::new(QuotaUnit::Line, 2, Some(Arc::clone(&channel)));
        assert_eq!(pump.pump(&mut rd, &mut out).unwrap(), PumpEnd::Terminated);
        assert_eq!(out, b"one\ntwo\n");
        t.join().unwrap();
    }

    #[test]
    fn test_quota_larger_than_input_passes_everything() {
        let mut rd = feed(b"tiny");
        let mut out = Vec::new();
        let mut pump = QuotaPump::new(QuotaUnit::Char, 100, None);
        assert_eq!(pump.pump(&mut rd, &mut out).unwrap(), PumpEnd::Eof);
        assert_eq!(out, b"tiny");
    }

    #[test]
    fn test_bootstrap_newline() {
        let mut out = Vec::new();
        let mut pump = QuotaPump::new(QuotaUnit::Char, 0, None);
        pump.bootstrap(&mut out).unwrap();
        assert_eq!(out, b"\n");
    }

    #[test]
    fn test_set_overwrites_counter() {
        let channel = Arc::new(ParamChannel::new());
        let mut rd = feed(b"xxxxxxxx");
        let mut out = Vec::new();

        let worker_side = Arc::clone(&channel);
        let t = std::thread::spawn(move || {
            let cancel = AtomicBool::new(false);
            std::thread::sleep(Duration::from_millis(30));
            assert!(worker_side.propose(
                Quantity { mode: QtyMode::Set, value: 2 },
                &cancel
            ));
            std::thread::sleep(Duration::from_millis(50));
            worker_side.request_term();
        });

        let mut pump = QuotaPump::new(QuotaUnit::Char, 0, Some(Arc::clone(&channel)));
        assert_eq!(pump.pump(&mut rd, &mut out).unwrap(), PumpEnd::Terminated);
        assert_eq!(out, b"xx");
        t.join().unwrap();
    }
}
