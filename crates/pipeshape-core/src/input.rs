//! Descriptor-level input: buffered single-byte reads plus a bounded
//! wait for the next byte.
//!
//! The pumps read their input a byte at a time and, in the hold
//! discipline, wait on the descriptor with a timeout. Both go through
//! [`ByteReader`] so the wait consults the internal buffer before
//! touching `poll(2)`: a byte that has already been read from the kernel
//! has, by definition, arrived.

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use crate::error::{Error, Result};

const BUF_SIZE: usize = 1024;

/// Outcome of a bounded wait for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// At least one new byte is readable.
    Ready,
    /// The stream hung up with no byte left: the next read can only
    /// report EOF.
    Eof,
    /// The timeout elapsed with no new input.
    TimedOut,
    /// A signal broke the wait.
    Interrupted,
}

/// A buffered byte reader over a raw descriptor.
///
/// Reads restart on EINTR. EOF is surfaced as `Ok(None)` from
/// [`read_byte`](ByteReader::read_byte); on FIFOs and terminals a later
/// read may succeed again, which is exactly what the pumps want when a
/// writer reopens the stream.
pub struct ByteReader {
    fd: RawFd,
    // Keeps an opened file's descriptor alive; stdin is borrowed.
    _file: Option<File>,
    buf: [u8; BUF_SIZE],
    pos: usize,
    len: usize,
}

impl ByteReader {
    /// Reader over standard input.
    pub fn stdin() -> ByteReader {
        ByteReader::from_fd(libc::STDIN_FILENO, None)
    }

    /// Reader over a file opened for reading.
    pub fn open(path: &Path) -> io::Result<ByteReader> {
        let file = File::open(path)?;
        let fd = file.as_raw_fd();
        Ok(ByteReader::from_fd(fd, Some(file)))
    }

    /// Reader over a descriptor the caller guarantees stays open.
    pub fn from_raw_fd(fd: RawFd) -> ByteReader {
        ByteReader::from_fd(fd, None)
    }

    /// Reader that takes ownership of an already-open file (pipes in
    /// tests, inherited descriptors).
    pub fn from_file(file: File) -> ByteReader {
        let fd = file.as_raw_fd();
        ByteReader::from_fd(fd, Some(file))
    }

    fn from_fd(fd: RawFd, file: Option<File>) -> ByteReader {
        ByteReader {
            fd,
            _file: file,
            buf: [0; BUF_SIZE],
            pos: 0,
            len: 0,
        }
    }

    /// Next byte, or `None` at EOF. Interrupted reads are restarted.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        if self.pos == self.len {
            loop {
                // SAFETY: buf is owned by self and at least BUF_SIZE long;
                // read never writes past the length we pass.
                let n = unsafe {
                    libc::read(self.fd, self.buf.as_mut_ptr() as *mut libc::c_void, BUF_SIZE)
                };
                if n > 0 {
                    self.len = n as usize;
                    self.pos = 0;
                    break;
                }
                if n == 0 {
                    return Ok(None);
                }
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(Error::io("input", err));
            }
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(Some(b))
    }

    /// True when a byte is already buffered in user space.
    pub fn has_buffered(&self) -> bool {
        self.pos < self.len
    }

    /// Wait until the next byte (or EOF) is available, for at most
    /// `timeout` nanoseconds; `None` blocks indefinitely.
    ///
    /// A genuine new byte reports `Ready`; a hangup with nothing left
    /// to read reports `Eof`. Callers that replace buffered state on
    /// new input (the hold pump's ring) rely on the distinction.
    pub fn wait_readable(&self, timeout: Option<i64>) -> Result<WaitResult> {
        if self.has_buffered() {
            return Ok(WaitResult::Ready);
        }
        let timeout_ms: libc::c_int = match timeout {
            None => -1,
            // Round up so the quiescence window is never cut short.
            Some(ns) => ns_to_ms_ceil(ns).clamp(0, libc::c_int::MAX as i64) as libc::c_int,
        };
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: pfd is a properly initialized pollfd owned by this
        // frame; nfds of 1 matches the single entry passed.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc > 0 {
            // POLLIN means a byte really is readable (data still in the
            // pipe keeps POLLIN set even after the writer closed). A
            // hangup or error without POLLIN means the next read can
            // only return EOF.
            if pfd.revents & libc::POLLIN != 0 {
                return Ok(WaitResult::Ready);
            }
            return Ok(WaitResult::Eof);
        }
        if rc == 0 {
            return Ok(WaitResult::TimedOut);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            return Ok(WaitResult::Interrupted);
        }
        Err(Error::io("input", err))
    }
}

/// Where the hold pump's discarded lines go.
///
/// A numeric `-d` argument names an inherited descriptor; anything else
/// is a filename (prefix a numeric name with `./` to disambiguate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainSpec {
    Fd(RawFd),
    Path(String),
}

impl DrainSpec {
    /// Classify a `-d` argument.
    pub fn parse(arg: &str) -> DrainSpec {
        if !arg.is_empty() && arg.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(fd) = arg.parse::<RawFd>() {
                return DrainSpec::Fd(fd);
            }
        }
        DrainSpec::Path(arg.to_string())
    }

    /// Open the drain for writing; a named file is created or truncated.
    ///
    /// An inherited descriptor is duplicated so closing the drain never
    /// closes a stream the caller still owns.
    pub fn open(&self) -> Result<File> {
        match self {
            DrainSpec::Fd(fd) => {
                // SAFETY: dup on a caller-supplied descriptor; a bad fd
                // fails with EBADF and is surfaced as an error.
                let dup = unsafe { libc::dup(*fd) };
                if dup < 0 {
                    return Err(Error::io("drain", io::Error::last_os_error()));
                }
                // SAFETY: dup just returned this descriptor and nothing
                // else owns it.
                Ok(unsafe { std::os::fd::FromRawFd::from_raw_fd(dup) })
            }
            DrainSpec::Path(path) => std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)
                .map_err(|e| Error::io("drain", e)),
        }
    }
}

/// Nanoseconds to whole milliseconds, rounding up.
fn ns_to_ms_ceil(ns: i64) -> i64 {
    (ns + 999_999) / 1_000_000
}
