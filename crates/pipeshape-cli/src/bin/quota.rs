//! `quota` - release bytes or lines while an externally fed counter
//! has units; block when it runs dry.

use clap::Parser;

use pipeshape_cli::{EXIT_OK, EXIT_TROUBLE, ParamArg, fail, init, input_names, live_param,
    open_input, resolve_param};
use pipeshape_core::error::{Error, Result};
use pipeshape_core::priority::try_raise_priority;
use pipeshape_core::pump::PumpEnd;
use pipeshape_core::pump::quota::{QuotaPump, QuotaUnit};
use pipeshape_core::quantity::{QtyMode, Quantity, parse_quantity};

const PROGRAM: &str = "quota";

#[derive(Parser)]
#[command(name = PROGRAM)]
#[command(about = "Pass a quota of bytes or lines, refillable through a control file")]
#[command(version = pipeshape_core::VERSION)]
struct Cli {
    /// One byte per quota unit (default)
    #[arg(short = 'c', conflicts_with = "line_mode")]
    char_mode: bool,

    /// One line per quota unit
    #[arg(short = 'l')]
    line_mode: bool,

    /// Terminate when the control FIFO is closed by its writer
    #[arg(short = 't')]
    eof_terminates: bool,

    /// Emit one starter newline before reading any input
    #[arg(short = '1')]
    bootstrap: bool,

    /// Real-time priority class (0 normal .. 3 strongest), best effort
    #[arg(short = 'p', default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=3))]
    priority: u8,

    /// Initial quantity (5, 2ki, ...) or control file path
    param: String,

    /// Input files; `-` means stdin
    files: Vec<String>,
}

/// The literal argument form only admits a plain starting count.
fn parse_initial(token: &str) -> Result<Quantity> {
    let q = parse_quantity(token)?;
    if q.mode != QtyMode::Set {
        return Err(Error::BadQuantity(token.to_string()));
    }
    Ok(q)
}

fn main() {
    let cli = Cli::parse();
    init(PROGRAM);

    match try_raise_priority(cli.priority) {
        Ok(achieved) => log::debug!("running at priority class {achieved}"),
        Err(e) => fail(PROGRAM, &e),
    }

    let unit = if cli.line_mode { QuotaUnit::Line } else { QuotaUnit::Char };

    // A control file starts the counter at zero; a literal starts it at
    // the given value with no live updates.
    let (initial, channel, _worker) = match resolve_param(&cli.param, parse_initial) {
        ParamArg::Literal(q) => (q.value, None, None),
        ParamArg::Control(path) => {
            let zero = Quantity { mode: QtyMode::Set, value: 0 };
            match live_param(&path, parse_quantity, cli.eof_terminates, zero, false) {
                Ok(live) => (0, Some(live.channel), Some(live.worker)),
                Err(e) => fail(PROGRAM, &e),
            }
        }
    };

    let mut pump = QuotaPump::new(unit, initial, channel);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if cli.bootstrap {
        if let Err(e) = pump.bootstrap(&mut out) {
            fail(PROGRAM, &e);
        }
    }

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
            // Termination (the `t` command, FIFO close with -t, or
            // SIGTERM) is the clean way out of a quota run.
            Ok(PumpEnd::Terminated) => break,
            Err(e) => fail(PROGRAM, &e),
        }
    }
    std::process::exit(code);
}
