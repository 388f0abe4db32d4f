//! `hold` - keep the last N lines, release them once the input goes
//! quiet for the holding time. Replaced lines can go to a drain.

use clap::Parser;

use pipeshape_cli::{EXIT_OK, EXIT_TROUBLE, ParamArg, fail, init, live_param, open_input,
    resolve_param};
use pipeshape_core::input::DrainSpec;
use pipeshape_core::interval::Interval;
use pipeshape_core::priority::try_raise_priority;
use pipeshape_core::pump::PumpEnd;
use pipeshape_core::pump::hold::{HoldPump, HoldSpec, parse_hold_spec};

const PROGRAM: &str = "hold";

#[derive(Parser)]
#[command(name = PROGRAM)]
#[command(about = "Hold the last N lines until the input stays quiet, newest wins")]
#[command(version = pipeshape_core::VERSION)]
struct Cli {
    /// Drain for replaced lines: a descriptor number, or a filename
    /// (prefix a numeric name with ./)
    #[arg(short = 'd', value_name = "FD-OR-PATH")]
    drain: Option<String>,

    /// Real-time priority class (0 normal .. 3 strongest), best effort
    #[arg(short = 'p', default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=3))]
    priority: u8,

    /// N@holdtime (N defaults to 1), or a control file path
    param: String,

    /// Input file; `-` or absent means stdin
    file: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    init(PROGRAM);

    match try_raise_priority(cli.priority) {
        Ok(achieved) => log::debug!("running at priority class {achieved}"),
        Err(e) => fail(PROGRAM, &e),
    }

    let drain = match &cli.drain {
        None => None,
        Some(arg) => match DrainSpec::parse(arg).open() {
            Ok(file) => Some(file),
            Err(e) => fail(PROGRAM, &e),
        },
    };

    let edge_default = HoldSpec { count: 1, hold: Interval::Immediate };
    let (spec, channel, _worker) = match resolve_param(&cli.param, parse_hold_spec) {
        ParamArg::Literal(spec) => (spec, None, None),
        ParamArg::Control(path) => {
            match live_param(&path, parse_hold_spec, false, edge_default, true) {
                Ok(live) => (live.initial, Some(live.channel), Some(live.worker)),
                Err(e) => fail(PROGRAM, &e),
            }
        }
    };

    let name = cli.file.as_deref().unwrap_or("-");
    let mut reader = match open_input(name) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{PROGRAM}: {name}: {e}");
            std::process::exit(EXIT_TROUBLE);
        }
    };

    let mut pump = HoldPump::new(spec, channel, drain);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match pump.pump(&mut reader, &mut out) {
        Ok(PumpEnd::Eof) => std::process::exit(EXIT_OK),
        Ok(PumpEnd::Terminated) => std::process::exit(EXIT_TROUBLE),
        Err(e) => fail(PROGRAM, &e),
    }
}
