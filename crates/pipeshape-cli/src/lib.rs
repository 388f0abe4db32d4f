//! Shared framing for the pipeshape binaries.
//!
//! Each filter is a thin shell around one pump from `pipeshape-core`:
//! parse arguments, resolve the shaping parameter (literal value or
//! control file), walk the input files, and map pump outcomes to exit
//! codes. Everything here is that plumbing.

use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;

use pipeshape_core::control::{ControlKind, ControlWorker, ParamChannel, classify, read_first_line};
use pipeshape_core::error::{Error, Result};
use pipeshape_core::input::ByteReader;

/// Full success.
pub const EXIT_OK: i32 = 0;
/// One or more input files failed, or the run could not complete.
pub const EXIT_TROUBLE: i32 = 1;
/// Internal invariant violation.
pub const EXIT_INVARIANT: i32 = 255;

/// Common per-binary startup: option-parsing environment, logging,
/// signal dispositions, and the invariant trap.
pub fn init(program: &'static str) {
    // SAFETY: called at the very top of main, before any thread exists.
    unsafe {
        std::env::set_var("POSIXLY_CORRECT", "1");
    }
    env_logger::init();
    pipeshape_core::control::install_signal_handlers();
    std::panic::set_hook(Box::new(move |info| {
        eprintln!("{program}: internal invariant violated: {info}");
        exit(EXIT_INVARIANT);
    }));
}

/// Report a fatal error the way every filter does: a stderr diagnostic
/// prefixed with the program name, exiting with the platform errno
/// where one exists.
pub fn fail(program: &str, err: &Error) -> ! {
    eprintln!("{program}: {err}");
    exit(err.os_errno().unwrap_or(EXIT_TROUBLE));
}

/// The shaping parameter argument: a literal value, or the path of a
/// control file to watch.
pub enum ParamArg<T> {
    Literal(T),
    Control(PathBuf),
}

/// Classify the parameter argument. Anything that parses is a literal;
/// everything else names a control file.
pub fn resolve_param<T>(arg: &str, parse: impl Fn(&str) -> Result<T>) -> ParamArg<T> {
    match parse(arg) {
        Ok(v) => ParamArg::Literal(v),
        Err(_) => ParamArg::Control(PathBuf::from(arg)),
    }
}

/// A spawned live-parameter setup: the channel the pump polls, the
/// worker guard whose drop joins the thread, and the initial value.
pub struct LiveParam<T> {
    pub initial: T,
    pub channel: Arc<ParamChannel<T>>,
    pub worker: ControlWorker,
}

/// Stand up the control-file worker for a pump.
///
/// With `seed_from_file`, a regular control file supplies the initial
/// parameter synchronously (unparsable startup content is fatal) and
/// the worker only reports changes from it. Without it - the quota
/// discipline, whose counter starts at zero - the pump starts from
/// `fallback_initial` and the file's current content arrives as the
/// first live update. Edge-triggered control files always start from
/// `fallback_initial`.
pub fn live_param<T, F>(
    path: &Path,
    parse: F,
    eof_terminates: bool,
    fallback_initial: T,
    seed_from_file: bool,
) -> Result<LiveParam<T>>
where
    T: PartialEq + Clone + Send + 'static,
    F: Fn(&str) -> Result<T> + Send + 'static,
{
    let kind = classify(path)?;
    let initial = match kind {
        ControlKind::Polled if seed_from_file => parse(&read_first_line(path)?)?,
        _ => fallback_initial,
    };
    let seed = match kind {
        ControlKind::Polled if seed_from_file => Some(initial.clone()),
        _ => None,
    };
    let channel = Arc::new(ParamChannel::new());
    let worker = ControlWorker::spawn(path, Arc::clone(&channel), parse, eof_terminates, seed)?;
    Ok(LiveParam { initial, channel, worker })
}

/// Open one input operand; `-` is stdin.
pub fn open_input(name: &str) -> std::io::Result<ByteReader> {
    if name == "-" {
        Ok(ByteReader::stdin())
    } else {
        ByteReader::open(Path::new(name))
    }
}

/// The effective input list: the operands, or stdin when none given.
pub fn input_names(files: &[String]) -> Vec<String> {
    if files.is_empty() {
        vec!["-".to_string()]
    } else {
        files.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeshape_core::interval::{Interval, parse_interval};

    #[test]
    fn test_resolve_param_literal_vs_control() {
        match resolve_param("250ms", parse_interval) {
            ParamArg::Literal(Interval::Finite(ns)) => assert_eq!(ns, 250_000_000),
            _ => panic!("expected literal"),
        }
        match resolve_param("/tmp/period.ctl", parse_interval) {
            ParamArg::Control(p) => assert_eq!(p, PathBuf::from("/tmp/period.ctl")),
            _ => panic!("expected control path"),
        }
    }

    #[test]
    fn test_input_names_default_to_stdin() {
        assert_eq!(input_names(&[]), vec!["-".to_string()]);
        let named = vec!["a".to_string(), "-".to_string()];
        assert_eq!(input_names(&named), named);
    }

    #[test]
    fn test_live_param_polled_initial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl");
        std::fs::write(&path, "40ms\n").unwrap();
        let live = live_param(&path, parse_interval, false, Interval::Immediate, true).unwrap();
        assert_eq!(live.initial, Interval::Finite(40_000_000));
        drop(live);
    }

    #[test]
    fn test_live_param_bad_initial_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl");
        std::fs::write(&path, "not a duration\n").unwrap();
        assert!(live_param(&path, parse_interval, false, Interval::Immediate, true).is_err());
    }
}
