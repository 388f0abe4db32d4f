//! Live parameter channel: re-read a control file while the pump runs.
//!
//! A human or script mutates the pump's shaping parameter without a
//! restart by writing one line to a side-channel file. A regular file is
//! polled every 100 ms; a FIFO or character device is edge-triggered
//! through `poll(2)`. The worker hands each parsed value to the pump
//! through a one-slot mutex+condvar handshake: it never proposes a
//! second value until the pump has acknowledged the first.
//!
//! Delivery also pokes the pump with an in-process `SIGHUP` (installed
//! without `SA_RESTART`) so kernel sleeps return EINTR and the pump
//! re-evaluates its predicates at its next suspension point.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::fd::RawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Once};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{Error, Result};

/// Regular-file polling cadence and the FIFO reopen backoff.
pub const POLL_TICK: Duration = Duration::from_millis(100);

/// Longest accepted control command, matching the parser token bound.
const CMD_MAX: usize = 63;

/// Size of one rotating FIFO read buffer.
const EDGE_BUF: usize = 64;

// ---------------------------------------------------------------------------
// Signal plumbing
// ---------------------------------------------------------------------------

static HUP_SEEN: AtomicBool = AtomicBool::new(false);
static TERM_SEEN: AtomicBool = AtomicBool::new(false);
static INSTALL: Once = Once::new();

extern "C" fn on_hup(_: libc::c_int) {
    HUP_SEEN.store(true, Ordering::Relaxed);
}

extern "C" fn on_term(_: libc::c_int) {
    TERM_SEEN.store(true, Ordering::Relaxed);
}

fn set_handler(signum: libc::c_int, handler: extern "C" fn(libc::c_int)) {
    // SAFETY: zeroed sigaction is a valid starting point; the handler
    // only stores an atomic flag, which is async-signal-safe. No
    // SA_RESTART: blocking calls must see EINTR.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handler as libc::sighandler_t;
        libc::sigemptyset(&mut sa.sa_mask);
        sa.sa_flags = 0;
        libc::sigaction(signum, &sa, std::ptr::null_mut());
    }
}

/// Install the SIGHUP/SIGTERM dispositions. Idempotent; called by every
/// binary before the pump starts and by [`ParamChannel::new`] so library
/// users cannot be killed by the wakeup signal.
pub fn install_signal_handlers() {
    INSTALL.call_once(|| {
        set_handler(libc::SIGHUP, on_hup);
        set_handler(libc::SIGTERM, on_term);
    });
}

/// True once a SIGTERM arrived. Pumps poll this at every loop head.
pub fn term_signal_seen() -> bool {
    TERM_SEEN.load(Ordering::Relaxed)
}

/// Consume a pending external SIGHUP (immediate re-poll request).
pub fn take_hup_signal() -> bool {
    HUP_SEEN.swap(false, Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// The one-slot handshake channel
// ---------------------------------------------------------------------------

struct ChannelState<T> {
    proposed: Option<T>,
    received: bool,
    term: bool,
}

/// One parameter in flight between the control worker and the pump.
///
/// Create it on the pump thread: deliveries send SIGHUP to the creating
/// thread to break it out of kernel sleeps.
pub struct ParamChannel<T> {
    state: Mutex<ChannelState<T>>,
    cond: Condvar,
    pump_thread: libc::pthread_t,
}

impl<T> ParamChannel<T> {
    pub fn new() -> ParamChannel<T> {
        install_signal_handlers();
        ParamChannel {
            state: Mutex::new(ChannelState {
                proposed: None,
                received: true,
                term: false,
            }),
            cond: Condvar::new(),
            // SAFETY: pthread_self has no preconditions.
            pump_thread: unsafe { libc::pthread_self() },
        }
    }

    fn wake_pump(&self) {
        // SAFETY: the target thread handle was captured at construction
        // and the pump thread outlives the channel users; SIGHUP has a
        // no-op handler installed above.
        unsafe {
            libc::pthread_kill(self.pump_thread, libc::SIGHUP);
        }
    }

    /// Worker side: deliver a value and block until the pump has
    /// acknowledged it. Returns false when the channel shut down (or
    /// `cancel` was raised) before the acknowledgement.
    pub fn propose(&self, value: T, cancel: &AtomicBool) -> bool {
        let mut st = self.state.lock().unwrap();
        if st.term {
            return false;
        }
        st.proposed = Some(value);
        st.received = false;
        self.cond.notify_all();
        self.wake_pump();
        while !st.received && !st.term {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            let (guard, _) = self.cond.wait_timeout(st, POLL_TICK).unwrap();
            st = guard;
            if !st.received && !st.term {
                // The signal may have raced the pump entering its sleep.
                self.wake_pump();
            }
        }
        st.received
    }

    /// Pump side: claim the pending proposal, acknowledging it.
    pub fn take(&self) -> Option<T> {
        let mut st = self.state.lock().unwrap();
        match st.proposed.take() {
            Some(v) => {
                st.received = true;
                self.cond.notify_all();
                Some(v)
            }
            None => None,
        }
    }

    /// Raise the cooperative termination flag and wake both sides.
    pub fn request_term(&self) {
        let mut st = self.state.lock().unwrap();
        st.term = true;
        self.cond.notify_all();
        self.wake_pump();
    }

    /// True once termination was requested on the channel or a SIGTERM
    /// arrived from outside.
    pub fn stopped(&self) -> bool {
        term_signal_seen() || self.state.lock().unwrap().term
    }

    /// Pump side: block until a proposal or termination shows up. Wakes
    /// every poll tick to honor an external SIGTERM.
    pub fn wait_change(&self) {
        let mut st = self.state.lock().unwrap();
        while st.proposed.is_none() && !st.term && !term_signal_seen() {
            let (guard, _) = self.cond.wait_timeout(st, POLL_TICK).unwrap();
            st = guard;
        }
    }
}

impl<T> Default for ParamChannel<T> {
    fn default() -> Self {
        ParamChannel::new()
    }
}

// ---------------------------------------------------------------------------
// Control file classification
// ---------------------------------------------------------------------------

/// The two control-file regimes. Chosen once at startup by `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Regular file, re-read on a 100 ms cadence.
    Polled,
    /// FIFO or character device, read when `poll(2)` says so.
    Edge,
}

/// Classify a control file, failing for unsupported node types.
pub fn classify(path: &Path) -> Result<ControlKind> {
    let meta = std::fs::metadata(path)
        .map_err(|e| Error::io("control file", e))?;
    let ft = meta.file_type();
    use std::os::unix::fs::FileTypeExt;
    if ft.is_file() {
        Ok(ControlKind::Polled)
    } else if ft.is_fifo() || ft.is_char_device() {
        Ok(ControlKind::Edge)
    } else {
        Err(Error::ControlFileType(path.display().to_string()))
    }
}

/// Read and return the first line of a regular control file (startup
/// parameter for pumps that need one before the worker runs).
pub fn read_first_line(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io("control file", e))?;
    Ok(first_line_of(&mut file))
}

fn first_line_of(file: &mut File) -> String {
    let mut buf = [0u8; 1024];
    let mut n = 0;
    if file.seek(SeekFrom::Start(0)).is_ok() {
        loop {
            match file.read(&mut buf) {
                Ok(len) => {
                    n = len;
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
    let head = &buf[..n];
    let line = match head.iter().position(|&b| b == b'\n') {
        Some(pos) => &head[..pos],
        None => head,
    };
    String::from_utf8_lossy(line).into_owned()
}

// ---------------------------------------------------------------------------
// The worker
// ---------------------------------------------------------------------------

/// Owns the worker thread re-reading the control file. Dropping it
/// shuts the thread down and joins it.
pub struct ControlWorker {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    wake_w: RawFd,
}

impl ControlWorker {
    /// Spawn the worker for `path`, delivering parsed values into
    /// `channel`. `initial` seeds the change detector of the polled
    /// regime so the startup value is not re-proposed. `eof_terminates`
    /// makes a FIFO EOF (after a writer was seen) raise termination.
    pub fn spawn<T, F>(
        path: &Path,
        channel: Arc<ParamChannel<T>>,
        parse: F,
        eof_terminates: bool,
        initial: Option<T>,
    ) -> Result<ControlWorker>
    where
        T: PartialEq + Send + 'static,
        F: Fn(&str) -> Result<T> + Send + 'static,
    {
        install_signal_handlers();
        let kind = classify(path)?;
        let shutdown = Arc::new(AtomicBool::new(false));

        // Open the control resource before the wake pipe so an open
        // failure leaks nothing.
        enum Source {
            Polled(File),
            Edge(RawFd),
        }
        let source = match kind {
            ControlKind::Polled => {
                Source::Polled(File::open(path).map_err(|e| Error::io("control file", e))?)
            }
            ControlKind::Edge => Source::Edge(open_nonblock(path)?),
        };

        let mut fds = [0; 2];
        // SAFETY: fds is a two-element array as pipe requires.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            let err = std::io::Error::last_os_error();
            if let Source::Edge(fd) = source {
                // SAFETY: fd was opened above and handed to no one else.
                unsafe { libc::close(fd) };
            }
            return Err(Error::io("control file", err));
        }
        let (wake_r, wake_w) = (fds[0], fds[1]);

        let flag = Arc::clone(&shutdown);
        let handle = std::thread::Builder::new()
            .name("control".into())
            .spawn(move || {
                match source {
                    Source::Polled(file) => {
                        polled_loop(file, channel, parse, initial, flag);
                    }
                    Source::Edge(fd) => {
                        edge_loop(fd, wake_r, channel, parse, eof_terminates, flag);
                        // SAFETY: fd belongs to this worker alone.
                        unsafe { libc::close(fd) };
                    }
                }
                // SAFETY: wake_r belongs to this worker alone.
                unsafe { libc::close(wake_r) };
            })
            .map_err(|e| {
                // SAFETY: the thread never started; both ends are ours.
                unsafe {
                    libc::close(wake_r);
                    libc::close(wake_w);
                }
                Error::io("control worker", e)
            })?;

        Ok(ControlWorker {
            handle: Some(handle),
            shutdown,
            wake_w,
        })
    }
}

impl Drop for ControlWorker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // SAFETY: wake_w stays open until after the join below; a write
        // to our own pipe cannot fault.
        unsafe {
            libc::write(self.wake_w, b"x".as_ptr() as *const libc::c_void, 1);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        // SAFETY: the worker is joined; nothing else holds wake_w.
        unsafe {
            libc::close(self.wake_w);
        }
    }
}

fn open_nonblock(path: &Path) -> Result<RawFd> {
    use std::os::unix::ffi::OsStrExt;
    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::ControlFileType(path.display().to_string()))?;
    // SAFETY: cpath is a valid NUL-terminated string for the duration of
    // the call.
    let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDONLY | libc::O_NONBLOCK) };
    if fd < 0 {
        return Err(Error::io("control file", std::io::Error::last_os_error()));
    }
    Ok(fd)
}

/// Regular-file regime: seek to 0 every tick, parse the first line, and
/// deliver it when it differs from the last accepted value. An external
/// SIGHUP skips the tick sleep for an immediate re-poll.
fn polled_loop<T, F>(
    mut file: File,
    channel: Arc<ParamChannel<T>>,
    parse: F,
    mut last: Option<T>,
    shutdown: Arc<AtomicBool>,
) where
    T: PartialEq,
    F: Fn(&str) -> Result<T>,
{
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let line = first_line_of(&mut file);
        match parse(&line) {
            Ok(value) => {
                if last.as_ref() != Some(&value) {
                    if !channel.propose(value, &shutdown) {
                        return;
                    }
                    // Re-read what we just accepted for the change check.
                    last = parse(&line).ok();
                }
            }
            Err(_) => {
                log::warn!("control file: discarding unparsable parameter {line:?}");
            }
        }
        if !take_hup_signal() {
            std::thread::sleep(POLL_TICK);
        }
    }
}

/// FIFO/character-device regime: poll-driven reads across three rotating
/// buffers; only newline-terminated input forms a command, the last
/// complete line of a batch wins, an overlong partial is discarded at
/// the next newline, and NUL bytes become spaces.
fn edge_loop<T, F>(
    fd: RawFd,
    wake_r: RawFd,
    channel: Arc<ParamChannel<T>>,
    parse: F,
    eof_terminates: bool,
    shutdown: Arc<AtomicBool>,
) where
    T: PartialEq,
    F: Fn(&str) -> Result<T>,
{
    let mut bufs = [[0u8; EDGE_BUF]; 3];
    let mut which = 0;
    let mut pending: Vec<u8> = Vec::with_capacity(CMD_MAX);
    let mut overlong = false;
    // EOF only counts once a writer has been seen; before that the FIFO
    // simply has no producer yet.
    let mut had_writer = false;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let mut pfds = [
            libc::pollfd { fd, events: libc::POLLIN, revents: 0 },
            libc::pollfd { fd: wake_r, events: libc::POLLIN, revents: 0 },
        ];
        // SAFETY: pfds is a properly initialized array and nfds matches
        // its length.
        let rc = unsafe { libc::poll(pfds.as_mut_ptr(), 2, -1) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            log::warn!("control file: poll failed: {err}");
            return;
        }
        if pfds[1].revents != 0 {
            return;
        }
        if pfds[0].revents == 0 {
            continue;
        }

        let buf = &mut bufs[which];
        // SAFETY: buf is EDGE_BUF bytes owned by this frame's array.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, EDGE_BUF) };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) | Some(libc::EAGAIN) => continue,
                _ => {
                    log::warn!("control file: read failed: {err}");
                    return;
                }
            }
        }
        if n == 0 {
            if eof_terminates && had_writer {
                channel.request_term();
                return;
            }
            // Writers may reopen; back off instead of spinning on HUP.
            std::thread::sleep(POLL_TICK);
            continue;
        }

        had_writer = true;
        let batch = &bufs[which][..n as usize];
        which = (which + 1) % bufs.len();

        let mut latest: Option<String> = None;
        for &raw in batch {
            let b = if raw == 0 { b' ' } else { raw };
            if b == b'\n' {
                if overlong {
                    overlong = false;
                } else {
                    latest = Some(String::from_utf8_lossy(&pending).into_owned());
                }
                pending.clear();
            } else if pending.len() < CMD_MAX {
                pending.push(b);
            } else {
                overlong = true;
            }
        }

        if let Some(cmd) = latest {
            match parse(&cmd) {
                Ok(value) => {
                    if !channel.propose(value, &shutdown) {
                        return;
                    }
                }
                Err(_) => {
                    log::warn!("control file: discarding unparsable command {cmd:?}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::{Interval, parse_interval};
    use crate::quantity::{QtyMode, parse_quantity};
    use std::io::Write;
    use std::time::Instant;

    /// Spin on take() until a value shows up or the deadline passes.
    fn take_within<T>(channel: &ParamChannel<T>, ms: u64) -> Option<T> {
        let deadline = Instant::now() + Duration::from_millis(ms);
        while Instant::now() < deadline {
            if let Some(v) = channel.take() {
                return Some(v);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn test_handshake_serializes_deliveries() {
        let channel = Arc::new(ParamChannel::<u32>::new());
        let worker_side = Arc::clone(&channel);
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel2 = Arc::clone(&cancel);
        let t = std::thread::spawn(move || {
            assert!(worker_side.propose(1, &cancel2));
            assert!(worker_side.propose(2, &cancel2));
        });
        assert_eq!(take_within(&channel, 1000), Some(1));
        assert_eq!(take_within(&channel, 1000), Some(2));
        t.join().unwrap();
    }

    #[test]
    fn test_propose_cancelled_without_consumer() {
        let channel = Arc::new(ParamChannel::<u32>::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_side = Arc::clone(&channel);
        let cancel2 = Arc::clone(&cancel);
        let t = std::thread::spawn(move || worker_side.propose(9, &cancel2));
        std::thread::sleep(Duration::from_millis(50));
        cancel.store(true, Ordering::SeqCst);
        assert!(!t.join().unwrap());
    }

    #[test]
    fn test_term_wakes_wait_change() {
        let channel = Arc::new(ParamChannel::<u32>::new());
        let other = Arc::clone(&channel);
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            other.request_term();
        });
        channel.wait_change();
        assert!(channel.stopped());
        t.join().unwrap();
    }

    #[test]
    fn test_classify_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let reg = dir.path().join("ctl");
        std::fs::write(&reg, "1\n").unwrap();
        assert_eq!(classify(&reg).unwrap(), ControlKind::Polled);
        assert_eq!(classify(Path::new("/dev/null")).unwrap(), ControlKind::Edge);
        assert!(matches!(
            classify(dir.path()),
            Err(Error::ControlFileType(_))
        ));
        assert!(classify(Path::new("/no/such/control")).is_err());
    }

    #[test]
    fn test_polled_worker_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("period");
        std::fs::write(&path, "5ms\n").unwrap();

        let channel = Arc::new(ParamChannel::<Interval>::new());
        let worker = ControlWorker::spawn(
            &path,
            Arc::clone(&channel),
            |s| parse_interval(s),
            false,
            None,
        )
        .unwrap();

        assert_eq!(take_within(&channel, 2000), Some(Interval::Finite(5_000_000)));

        std::fs::write(&path, "7ms\nanything after the first line is ignored\n").unwrap();
        assert_eq!(take_within(&channel, 2000), Some(Interval::Finite(7_000_000)));

        drop(worker);
    }

    #[test]
    fn test_polled_worker_skips_unchanged_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("period");
        std::fs::write(&path, "3ms\n").unwrap();

        let channel = Arc::new(ParamChannel::<Interval>::new());
        let worker = ControlWorker::spawn(
            &path,
            Arc::clone(&channel),
            |s| parse_interval(s),
            false,
            Some(Interval::Finite(3_000_000)),
        )
        .unwrap();

        // Seeded with the same value: nothing should arrive.
        assert_eq!(take_within(&channel, 400), None);
        drop(worker);
    }

    fn make_fifo(path: &Path) {
        use std::os::unix::ffi::OsStrExt;
        let c = std::ffi::CString::new(path.as_os_str().as_bytes()).unwrap();
        // SAFETY: c is a valid NUL-terminated path.
        assert_eq!(unsafe { libc::mkfifo(c.as_ptr(), 0o600) }, 0);
    }

    #[test]
    fn test_edge_worker_delivers_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quota.fifo");
        make_fifo(&path);

        let channel = Arc::new(ParamChannel::new());
        let worker = ControlWorker::spawn(
            &path,
            Arc::clone(&channel),
            |s| parse_quantity(s),
            false,
            None,
        )
        .unwrap();

        let mut writer = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        writer.write_all(b"+3\n").unwrap();
        let got = take_within(&channel, 2000).expect("command delivered");
        assert_eq!(got.mode, QtyMode::Add);
        assert_eq!(got.value, 3);

        // NUL bytes inside the window are normalized to spaces.
        writer.write_all(b"\x004\x00\n").unwrap();
        let got = take_within(&channel, 2000).expect("command delivered");
        assert_eq!(got.mode, QtyMode::Set);
        assert_eq!(got.value, 4);

        drop(writer);
        drop(worker);
    }

    #[test]
    fn test_edge_worker_discards_overlong_then_resyncs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.fifo");
        make_fifo(&path);

        let channel = Arc::new(ParamChannel::new());
        let worker = ControlWorker::spawn(
            &path,
            Arc::clone(&channel),
            |s| parse_quantity(s),
            false,
            None,
        )
        .unwrap();

        let mut writer = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        let long = vec![b'9'; 200];
        writer.write_all(&long).unwrap();
        writer.write_all(b"\n5\n").unwrap();
        let got = take_within(&channel, 2000).expect("resynced command");
        assert_eq!(got.value, 5);

        drop(writer);
        drop(worker);
    }

    #[test]
    fn test_edge_worker_eof_terminates_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("term.fifo");
        make_fifo(&path);

        let channel = Arc::new(ParamChannel::new());
        let worker = ControlWorker::spawn(
            &path,
            Arc::clone(&channel),
            |s| parse_quantity(s),
            true,
            None,
        )
        .unwrap();

        {
            let mut writer =
                std::fs::OpenOptions::new().write(true).open(&path).unwrap();
            writer.write_all(b"2\n").unwrap();
        }
        assert!(take_within(&channel, 2000).is_some());

        // Writer is gone: EOF with -t semantics raises termination.
        let deadline = Instant::now() + Duration::from_secs(2);
        while !channel.stopped() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(channel.stopped());
        drop(worker);
    }

    #[test]
    fn test_read_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl");
        std::fs::write(&path, "250ms\nsecond line ignored\n").unwrap();
        assert_eq!(read_first_line(&path).unwrap(), "250ms");
    }
}
