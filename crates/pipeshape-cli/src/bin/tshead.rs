//! `tshead` - pass the lines whose first-field timestamp lies within a
//! bound; drop the rest.

use clap::Parser;

use pipeshape_cli::{EXIT_OK, EXIT_TROUBLE, fail, init, input_names, open_input};
use pipeshape_core::clock::{Clock, Deadline};
use pipeshape_core::error::{Error, Result};
use pipeshape_core::interval::{Interval, parse_interval};
use pipeshape_core::pump::PumpEnd;
use pipeshape_core::pump::tshead::{Bound, TsheadConfig, TsheadPump};
use pipeshape_core::stamp::{StampMode, parse_stamp};

const PROGRAM: &str = "tshead";

#[derive(Parser)]
#[command(name = PROGRAM)]
#[command(about = "Head a stream by the timestamp in each line's first field")]
#[command(version = pipeshape_core::VERSION)]
struct Cli {
    /// First field is calendar time YYYYMMDDhhmmss[.frac] (default)
    #[arg(short = 'c', conflicts_with_all = ["epoch", "elapsed"])]
    calendar: bool,

    /// First field is UNIX epoch seconds
    #[arg(short = 'e', conflicts_with = "elapsed")]
    epoch: bool,

    /// First field is seconds since program start
    #[arg(short = 'z')]
    elapsed: bool,

    /// Interpret calendar time as UTC
    #[arg(short = 'u')]
    utc: bool,

    /// Make the bound endpoint exclusive
    #[arg(short = 'x')]
    exclusive: bool,

    /// Re-zero at the first line's timestamp
    #[arg(short = 'Z')]
    rezero: bool,

    /// Keep lines within this interval of the start (prefix with `-`
    /// to keep lines this far behind the newest timestamp instead)
    #[arg(short = 'i', value_name = "INTERVAL", allow_hyphen_values = true,
          conflicts_with = "until", required_unless_present = "until")]
    interval: Option<String>,

    /// Keep lines up to this absolute timestamp
    #[arg(short = 't', value_name = "DATETIME", required_unless_present = "interval")]
    until: Option<String>,

    /// Input files; `-` means stdin
    files: Vec<String>,
}

fn bound_interval(token: &str) -> Result<i64> {
    match parse_interval(token)? {
        Interval::Finite(ns) => Ok(ns),
        Interval::Immediate => Ok(0),
        // An unbounded head passes everything; model it as the largest
        // representable distance.
        Interval::Infinite => Ok(i64::MAX),
    }
}

fn resolve_bound(cli: &Cli, mode: StampMode, start: Deadline) -> Result<Bound> {
    if let Some(arg) = &cli.interval {
        let trimmed = arg.trim();
        return match trimmed.strip_prefix('-') {
            Some(behind) => {
                let ns = bound_interval(behind)?;
                if ns == i64::MAX {
                    return Err(Error::BadBound(arg.clone()));
                }
                Ok(Bound::Trailing(ns))
            }
            None => Ok(Bound::Within(bound_interval(trimmed)?)),
        };
    }
    let arg = cli.until.as_ref().expect("clap enforces -i or -t");
    let at = parse_stamp(arg.trim(), mode, cli.utc, start)
        .map_err(|_| Error::BadBound(arg.clone()))?;
    Ok(Bound::Until(at))
}

fn main() {
    let cli = Cli::parse();
    init(PROGRAM);

    if cli.utc {
        // SAFETY: set before any worker thread exists; mktime in the
        // calendar parser follows TZ.
        unsafe {
            std::env::set_var("TZ", "UTC0");
        }
    }

    let mode = if cli.elapsed {
        StampMode::Elapsed
    } else if cli.epoch {
        StampMode::Epoch
    } else {
        StampMode::Calendar
    };

    let start = Clock::realtime().now();
    let bound = match resolve_bound(&cli, mode, start) {
        Ok(b) => b,
        Err(e) => fail(PROGRAM, &e),
    };

    let cfg = TsheadConfig {
        mode,
        utc: cli.utc,
        exclusive: cli.exclusive,
        rezero: cli.rezero,
        bound,
    };
    let mut pump = TsheadPump::with_start(cfg, PROGRAM, start);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut code = EXIT_OK;
    for name in input_names(&cli.files) {
        let mut reader = match open_input(&name) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("{PROGRAM}: {name}: {e}");
                code = EXIT_TROUBLE;
                continue;
            }
        };
        match pump.pump(&mut reader, &mut out) {
            Ok(PumpEnd::Eof) => {}
            Ok(PumpEnd::Terminated) => {
                code = EXIT_TROUBLE;
                break;
            }
            Err(e) => fail(PROGRAM, &e),
        }
    }
    std::process::exit(code);
}
