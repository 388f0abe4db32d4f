//! `rate` - pace a stream at one byte or line per interval.

use clap::Parser;

use pipeshape_cli::{EXIT_OK, EXIT_TROUBLE, ParamArg, fail, init, input_names, live_param,
    open_input, resolve_param};
use pipeshape_core::interval::{Interval, parse_interval};
use pipeshape_core::priority::try_raise_priority;
use pipeshape_core::pump::PumpEnd;
use pipeshape_core::pump::rate::{RatePump, RateUnit};

const PROGRAM: &str = "rate";

#[derive(Parser)]
#[command(name = PROGRAM)]
#[command(about = "Pace a text stream at a constant byte or line rate")]
#[command(version = pipeshape_core::VERSION)]
struct Cli {
    /// One byte per interval (default)
    #[arg(short = 'c', conflicts_with = "line_mode")]
    char_mode: bool,

    /// One line per interval, measured first-byte to first-byte
    #[arg(short = 'l')]
    line_mode: bool,

    /// Recover time lost to oversleeps (default)
    #[arg(short = 'r', conflicts_with = "strict")]
    recover: bool,

    /// Strict pacing: never exceed the instantaneous rate
    #[arg(short = 's')]
    strict: bool,

    /// Real-time priority class (0 normal .. 3 strongest), best effort
    #[arg(short = 'p', default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=3))]
    priority: u8,

    /// Interval (100ms, 2400bps, 0%, 100%) or control file path
    param: String,

    /// Input files; `-` means stdin
    files: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    init(PROGRAM);

    match try_raise_priority(cli.priority) {
        Ok(achieved) => log::debug!("running at priority class {achieved}"),
        Err(e) => fail(PROGRAM, &e),
    }

    let unit = if cli.line_mode { RateUnit::Line } else { RateUnit::Char };

    // A parameter that parses is fixed for the run; anything else names
    // a control file whose first line supplies (and later updates) it.
    let (period, channel, _worker) = match resolve_param(&cli.param, parse_interval) {
        ParamArg::Literal(period) => (period, None, None),
        ParamArg::Control(path) => {
            match live_param(&path, parse_interval, false, Interval::Immediate, true) {
                Ok(live) => (live.initial, Some(live.channel), Some(live.worker)),
                Err(e) => fail(PROGRAM, &e),
            }
        }
    };

    let mut pump = RatePump::new(unit, period, cli.strict, channel);
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
                // Stopped before the stream ran dry.
                code = EXIT_TROUBLE;
                break;
            }
            Err(e) => fail(PROGRAM, &e),
        }
    }
    std::process::exit(code);
}
