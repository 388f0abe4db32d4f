//! Hold-and-replace pump: keep the last N lines, release on quiescence.
//!
//! Every incoming line lands in a ring of N slots. While newer input
//! keeps arriving within the holding time, the oldest slot keeps being
//! overwritten (its previous content going to the drain when one is
//! configured). Once the input stays quiet for a full holding time, the
//! ring flushes to stdout oldest-first and empties.

use std::fs::File;
use std::io::Write;
use std::sync::Arc;

use crate::clock::Clock;
use crate::control::{ParamChannel, term_signal_seen};
use crate::error::{Error, Result};
use crate::input::{ByteReader, WaitResult};
use crate::interval::{Interval, parse_interval};
use crate::line::{LineEnd, LineRing, MAX_RING, MIN_RING};
use crate::pump::PumpEnd;

/// The `N@holdtime` parameter: ring capacity plus quiescence window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldSpec {
    pub count: usize,
    pub hold: Interval,
}

/// Parse `N@holdtime`, or a bare `holdtime` with the default capacity
/// of one.
pub fn parse_hold_spec(token: &str) -> Result<HoldSpec> {
    let bad = || Error::BadHoldSpec(token.to_string());
    match token.split_once('@') {
        Some((count, hold)) => {
            let count: usize = count.trim().parse().map_err(|_| bad())?;
            if !(MIN_RING..=MAX_RING).contains(&count) {
                return Err(bad());
            }
            Ok(HoldSpec { count, hold: parse_interval(hold)? })
        }
        None => Ok(HoldSpec { count: 1, hold: parse_interval(token)? }),
    }
}

/// The hold-and-replace pump.
pub struct HoldPump {
    spec: HoldSpec,
    ring: LineRing,
    clock: Clock,
    channel: Option<Arc<ParamChannel<HoldSpec>>>,
    drain: Option<File>,
}

impl HoldPump {
    pub fn new(
        spec: HoldSpec,
        channel: Option<Arc<ParamChannel<HoldSpec>>>,
        drain: Option<File>,
    ) -> HoldPump {
        HoldPump {
            ring: LineRing::new(spec.count),
            spec,
            clock: Clock::monotonic(),
            channel,
            drain,
        }
    }

    pub fn pump<W: Write>(&mut self, rd: &mut ByteReader, out: &mut W) -> Result<PumpEnd> {
        loop {
            if self.stopped() {
                self.ring.flush_to(out)?;
                return Ok(PumpEnd::Terminated);
            }
            self.poll_channel(out)?;

            // Read the next line into the slot after the newest; a slot
            // still occupied from a full ring spills first.
            let idx = self.ring.next_index();
            if !self.ring.slot(idx).is_empty() {
                self.spill(idx)?;
            }
            match self.ring.slot_mut(idx).read_from(rd, None)? {
                LineEnd::EofNoData => {
                    self.ring.flush_to(out)?;
                    return Ok(PumpEnd::Eof);
                }
                LineEnd::Newline => self.ring.promote(idx),
                LineEnd::Eof => {
                    self.ring.promote(idx);
                    self.ring.flush_to(out)?;
                    return Ok(PumpEnd::Eof);
                }
            }

            if let Some(end) = self.quiesce(rd, out)? {
                return Ok(end);
            }
        }
    }

    /// Wait out the holding time. Returns `None` to continue reading
    /// (new input arrived, or the ring was flushed on quiescence). A
    /// hangup with no byte left ends the stream here: letting the main
    /// loop run again would spill the occupied slot it is about to
    /// reuse before the read reports EOF.
    fn quiesce<W: Write>(
        &mut self,
        rd: &mut ByteReader,
        out: &mut W,
    ) -> Result<Option<PumpEnd>> {
        if self.spec.hold.is_immediate() {
            self.ring.flush_to(out)?;
            return Ok(None);
        }
        let mut deadline = self
            .spec
            .hold
            .nanos()
            .map(|ns| self.clock.now().add_ns(ns));
        loop {
            let timeout = deadline.map(|d| d.diff_ns(self.clock.now()).max(0));
            match rd.wait_readable(timeout)? {
                WaitResult::Ready => return Ok(None),
                WaitResult::Eof => {
                    self.ring.flush_to(out)?;
                    return Ok(Some(PumpEnd::Eof));
                }
                WaitResult::TimedOut => {
                    self.ring.flush_to(out)?;
                    return Ok(None);
                }
                WaitResult::Interrupted => {
                    if self.stopped() {
                        self.ring.flush_to(out)?;
                        return Ok(Some(PumpEnd::Terminated));
                    }
                    if self.poll_channel(out)? {
                        // The holding time may have changed; restart the
                        // quiescence window under the new parameter.
                        if self.spec.hold.is_immediate() {
                            self.ring.flush_to(out)?;
                            return Ok(None);
                        }
                        deadline = self
                            .spec
                            .hold
                            .nanos()
                            .map(|ns| self.clock.now().add_ns(ns));
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

    /// Apply a pending parameter change. A capacity change drains the
    /// current ring (to the drain stream when configured, stdout
    /// otherwise) before reallocating.
    fn poll_channel<W: Write>(&mut self, out: &mut W) -> Result<bool> {
        let Some(ch) = &self.channel else {
            return Ok(false);
        };
        let Some(spec) = ch.take() else {
            return Ok(false);
        };
        if spec.count != self.ring.capacity() {
            match &mut self.drain {
                Some(drain) => {
                    self.ring.flush_to(drain)?;
                }
                None => self.ring.flush_to(out)?,
            }
            self.ring = LineRing::new(spec.count);
        }
        self.spec = spec;
        Ok(true)
    }

    /// Push an overwritten slot's old line to the drain, or discard it.
    fn spill(&mut self, idx: usize) -> Result<()> {
        if let Some(drain) = &mut self.drain {
            self.ring.slot(idx).write_to(drain)?;
            drain.flush().map_err(|e| Error::io("drain", e))?;
        }
        self.ring.slot_mut(idx).clear();
        Ok(())
    }
}
