//! Elastic line buffers and the ring of pending lines.
//!
//! A line of arbitrary length lives in a chain of fixed-size chunks that
//! grows while reading and sheds followers when a shorter line reuses
//! it. The hold discipline keeps the last N such lines in a ring and
//! releases them oldest-first once the input goes quiet.

use std::io::Write;

use crate::clock::{Clock, Deadline};
use crate::error::{Error, Result};
use crate::input::ByteReader;

/// Fixed chunk payload size.
pub const CHUNK_SIZE: usize = 1024;

/// Ring capacity bounds.
pub const MIN_RING: usize = 1;
pub const MAX_RING: usize = 256;

/// How a line read ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnd {
    /// The line is terminated by `\n`.
    Newline,
    /// EOF hit after at least one byte; the partial line still counts.
    Eof,
    /// EOF hit before any byte; no line was produced.
    EofNoData,
}

struct Chunk {
    buf: [u8; CHUNK_SIZE],
    filled: usize,
    next: Option<Box<Chunk>>,
}

impl Chunk {
    fn new() -> Chunk {
        Chunk { buf: [0; CHUNK_SIZE], filled: 0, next: None }
    }
}

impl Default for Chunk {
    fn default() -> Chunk {
        Chunk::new()
    }
}

/// One logical input line in a growable chunk chain.
///
/// The chain is terminated by a chunk holding `\n`, or by EOF. The
/// arrival field records the clock reading when the line's first byte
/// was read; the per-line rate pump paces "top-char to top-char" off it.
pub struct ElasticLine {
    head: Chunk,
    arrival: Option<Deadline>,
}

impl ElasticLine {
    pub fn new() -> ElasticLine {
        ElasticLine { head: Chunk::new(), arrival: None }
    }

    /// True when the slot currently holds no line.
    pub fn is_empty(&self) -> bool {
        self.head.filled == 0
    }

    /// When the first byte of the current line arrived, if a clock was
    /// supplied to [`read_from`](ElasticLine::read_from).
    pub fn arrival(&self) -> Option<Deadline> {
        self.arrival
    }

    /// Total bytes currently held.
    pub fn len(&self) -> usize {
        let mut n = 0;
        let mut cur = Some(&self.head);
        while let Some(c) = cur {
            n += c.filled;
            if line_ends_in(c) {
                break;
            }
            cur = c.next.as_deref();
        }
        n
    }

    /// Empty the slot, releasing follower chunks.
    pub fn clear(&mut self) {
        self.head.filled = 0;
        self.head.next = None;
        self.arrival = None;
    }

    /// Read the next input line into this slot, reusing the chain.
    ///
    /// The chain extends chunk-by-chunk when the line outgrows it and
    /// sheds followers the shorter line no longer needs. With a clock,
    /// the arrival of the first byte is captured.
    pub fn read_from(
        &mut self,
        reader: &mut ByteReader,
        clock: Option<&Clock>,
    ) -> Result<LineEnd> {
        self.arrival = None;
        let mut cur = &mut self.head;
        cur.filled = 0;
        let mut any = false;
        loop {
            let Some(b) = reader.read_byte()? else {
                cur.next = None;
                return Ok(if any { LineEnd::Eof } else { LineEnd::EofNoData });
            };
            if !any {
                any = true;
                if let Some(c) = clock {
                    self.arrival = Some(c.now());
                }
            }
            cur.buf[cur.filled] = b;
            cur.filled += 1;
            if b == b'\n' {
                cur.next = None;
                return Ok(LineEnd::Newline);
            }
            if cur.filled == CHUNK_SIZE {
                let next = cur.next.get_or_insert_with(Default::default);
                next.filled = 0;
                cur = next;
            }
        }
    }

    /// Write the line to a destination stream.
    ///
    /// Stops at the end of the chain or at the first chunk that is
    /// non-full or newline-terminated. A partial line not ending in `\n`
    /// is still written in full: EOF without a newline counts as a line.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut cur = Some(&self.head);
        while let Some(c) = cur {
            out.write_all(&c.buf[..c.filled])
                .map_err(|e| Error::io("output", e))?;
            if line_ends_in(c) {
                break;
            }
            cur = c.next.as_deref();
        }
        Ok(())
    }

    /// Copy the line's bytes out (timed-head buffering).
    pub fn to_vec(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(self.len());
        // Writing into a Vec cannot fail.
        self.write_to(&mut v).unwrap();
        v
    }
}

impl Default for ElasticLine {
    fn default() -> ElasticLine {
        ElasticLine::new()
    }
}

/// A chunk is the last of its line when it is non-full or ends with `\n`.
fn line_ends_in(c: &Chunk) -> bool {
    c.filled < CHUNK_SIZE || c.buf[c.filled - 1] == b'\n'
}

/// Fixed-capacity ring of the last N lines pending release.
///
/// `latest` points at the most recently filled slot; the flush order
/// starts at `(latest + 1) % n`, oldest first.
pub struct LineRing {
    slots: Vec<ElasticLine>,
    latest: usize,
}

impl LineRing {
    /// A ring of `n` empty slots, `n` in 1..=256.
    pub fn new(n: usize) -> LineRing {
        debug_assert!((MIN_RING..=MAX_RING).contains(&n));
        let mut slots = Vec::with_capacity(n);
        slots.resize_with(n, ElasticLine::new);
        LineRing { slots, latest: n - 1 }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Index of the slot the next line goes into.
    pub fn next_index(&self) -> usize {
        (self.latest + 1) % self.slots.len()
    }

    pub fn slot(&self, idx: usize) -> &ElasticLine {
        &self.slots[idx]
    }

    pub fn slot_mut(&mut self, idx: usize) -> &mut ElasticLine {
        &mut self.slots[idx]
    }

    /// Mark `idx` as the most recent line.
    pub fn promote(&mut self, idx: usize) {
        self.latest = idx;
    }

    /// True when no slot holds a line.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(ElasticLine::is_empty)
    }

    /// Flush every held line oldest-to-newest and empty the ring.
    pub fn flush_to<W: Write>(&mut self, out: &mut W) -> Result<()> {
        let n = self.slots.len();
        for k in 1..=n {
            let idx = (self.latest + k) % n;
            if !self.slots[idx].is_empty() {
                self.slots[idx].write_to(out)?;
                self.slots[idx].clear();
            }
        }
        out.flush().map_err(|e| Error::io("output", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;

    fn feed(data: &[u8]) -> ByteReader {
        let mut fds = [0; 2];
        // SAFETY: fds is a two-element array as pipe requires.
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        // SAFETY: both ends came from pipe; each File owns its end.
        let read_end: File = unsafe { std::os::fd::FromRawFd::from_raw_fd(fds[0]) };
        let mut write_end: File = unsafe { std::os::fd::FromRawFd::from_raw_fd(fds[1]) };
        write_end.write_all(data).unwrap();
        drop(write_end);
        ByteReader::from_file(read_end)
    }

    #[test]
    fn test_read_single_line() {
        let mut rd = feed(b"hello\nrest");
        let mut line = ElasticLine::new();
        assert_eq!(line.read_from(&mut rd, None).unwrap(), LineEnd::Newline);
        assert_eq!(line.to_vec(), b"hello\n");
    }

    #[test]
    fn test_partial_line_at_eof_counts() {
        let mut rd = feed(b"no-newline");
        let mut line = ElasticLine::new();
        assert_eq!(line.read_from(&mut rd, None).unwrap(), LineEnd::Eof);
        assert_eq!(line.to_vec(), b"no-newline");
        assert_eq!(line.read_from(&mut rd, None).unwrap(), LineEnd::EofNoData);
        assert!(line.is_empty());
    }

    #[test]
    fn test_line_grows_past_chunk() {
        let long: Vec<u8> = [vec![b'x'; CHUNK_SIZE * 2 + 10], vec![b'\n']].concat();
        let mut rd = feed(&long);
        let mut line = ElasticLine::new();
        assert_eq!(line.read_from(&mut rd, None).unwrap(), LineEnd::Newline);
        assert_eq!(line.len(), CHUNK_SIZE * 2 + 11);
        assert_eq!(line.to_vec(), long);
    }

    #[test]
    fn test_reuse_truncates_followers() {
        let data: Vec<u8> =
            [vec![b'x'; CHUNK_SIZE + 5], vec![b'\n'], b"short\n".to_vec()].concat();
        let mut rd = feed(&data);
        let mut line = ElasticLine::new();
        line.read_from(&mut rd, None).unwrap();
        assert!(line.len() > CHUNK_SIZE);
        line.read_from(&mut rd, None).unwrap();
        assert_eq!(line.to_vec(), b"short\n");
        assert!(line.head.next.is_none());
    }

    #[test]
    fn test_exact_chunk_boundary_line() {
        // A line whose newline lands exactly on the chunk edge.
        let data: Vec<u8> = [vec![b'a'; CHUNK_SIZE - 1], vec![b'\n', b'z', b'\n']].concat();
        let mut rd = feed(&data);
        let mut line = ElasticLine::new();
        assert_eq!(line.read_from(&mut rd, None).unwrap(), LineEnd::Newline);
        assert_eq!(line.len(), CHUNK_SIZE);
        assert_eq!(line.read_from(&mut rd, None).unwrap(), LineEnd::Newline);
        assert_eq!(line.to_vec(), b"z\n");
    }

    #[test]
    fn test_arrival_captured_with_clock() {
        let clock = Clock::monotonic();
        let before = clock.now();
        let mut rd = feed(b"x\n");
        let mut line = ElasticLine::new();
        line.read_from(&mut rd, Some(&clock)).unwrap();
        let arrival = line.arrival().expect("arrival recorded");
        assert!(arrival >= before);
        assert!(clock.now() >= arrival);
    }

    #[test]
    fn test_ring_flush_order_oldest_first() {
        let mut ring = LineRing::new(3);
        for text in [&b"A\n"[..], b"B\n", b"C\n", b"D\n"] {
            let idx = ring.next_index();
            let mut rd = feed(text);
            if !ring.slot_mut(idx).is_empty() {
                ring.slot_mut(idx).clear();
            }
            ring.slot_mut(idx).read_from(&mut rd, None).unwrap();
            ring.promote(idx);
        }
        let mut out = Vec::new();
        ring.flush_to(&mut out).unwrap();
        assert_eq!(out, b"B\nC\nD\n");
        assert!(ring.is_empty());
    }

    #[test]
    fn test_ring_flush_skips_empty_slots() {
        let mut ring = LineRing::new(4);
        for text in [&b"1\n"[..], b"2\n"] {
            let idx = ring.next_index();
            let mut rd = feed(text);
            ring.slot_mut(idx).read_from(&mut rd, None).unwrap();
            ring.promote(idx);
        }
        let mut out = Vec::new();
        ring.flush_to(&mut out).unwrap();
        assert_eq!(out, b"1\n2\n");
    }

    #[test]
    fn test_ring_capacity_one_overwrites() {
        let mut ring = LineRing::new(1);
        for text in [&b"X\n"[..], b"Y\n"] {
            let idx = ring.next_index();
            assert_eq!(idx, 0);
            let mut rd = feed(text);
            ring.slot_mut(idx).clear();
            ring.slot_mut(idx).read_from(&mut rd, None).unwrap();
            ring.promote(idx);
        }
        let mut out = Vec::new();
        ring.flush_to(&mut out).unwrap();
        assert_eq!(out, b"Y\n");
    }
}
