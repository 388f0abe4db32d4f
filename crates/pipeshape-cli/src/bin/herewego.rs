//! `herewego` - sleep to the next "nice round" multiple of an interval,
//! then print the instant that was waited for.
//!
//! Start several pipeline stages from the same shell `&&` chain and
//! they all begin on the same aligned instant.

use clap::Parser;

use pipeshape_cli::{EXIT_OK, EXIT_TROUBLE, fail, init};
use pipeshape_core::error::Error;
use pipeshape_core::interval::{Interval, parse_interval};
use pipeshape_core::pump::align::{AlignSpec, run_align};
use pipeshape_core::stamp::format_calendar;

const PROGRAM: &str = "herewego";

#[derive(Parser)]
#[command(name = PROGRAM)]
#[command(about = "Wait for the next round multiple of an interval, then print it")]
#[command(version = pipeshape_core::VERSION)]
struct Cli {
    /// Wake this long before the round instant
    #[arg(short = 'p', value_name = "DURATION", default_value = "0")]
    premature: String,

    /// Sleep this long before computing the target
    #[arg(short = 's', value_name = "DURATION", default_value = "0")]
    standby: String,

    /// Print the instant as whole epoch seconds
    #[arg(short = 'e', conflicts_with = "calendar")]
    epoch: bool,

    /// Print the instant as calendar time YYYYMMDDhhmmss
    #[arg(short = 'c')]
    calendar: bool,

    /// Print calendar time in UTC
    #[arg(short = 'u')]
    utc: bool,

    /// The alignment interval (1s, 5s, 250ms, ...)
    interval: String,
}

fn finite_ns(program: &str, token: &str) -> i64 {
    match parse_interval(token) {
        Ok(Interval::Finite(ns)) => ns,
        Ok(Interval::Immediate) => 0,
        Ok(Interval::Infinite) | Err(_) => {
            fail(program, &Error::BadInterval(token.to_string()))
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init(PROGRAM);

    let interval = finite_ns(PROGRAM, &cli.interval);
    if interval == 0 {
        fail(PROGRAM, &Error::BadInterval(cli.interval.clone()));
    }
    let spec = AlignSpec {
        interval,
        premature: finite_ns(PROGRAM, &cli.premature),
        standby: finite_ns(PROGRAM, &cli.standby),
    };

    match run_align(&spec) {
        Ok(Some(at)) => {
            if cli.calendar {
                println!("{}", format_calendar(at, cli.utc));
            } else if cli.epoch {
                println!("{}", at.sec);
            } else {
                println!("{}.{:09}", at.sec, at.nsec);
            }
            std::process::exit(EXIT_OK);
        }
        // The wait was cut short; downstream must not assume alignment.
        Ok(None) => std::process::exit(EXIT_TROUBLE),
        Err(e) => fail(PROGRAM, &e),
    }
}
