//! # pipeshape-core
//!
//! **Shape, rate-limit, align or release text streams on a UNIX pipeline.**
//!
//! `pipeshape-core` is the timing engine shared by the pipeshape filters
//! (`rate`, `hold`, `quota`, `tshead`, `herewego`). It provides:
//!
//! - nanosecond-grammar parsing of human durations and rates ([`interval`])
//!   and of byte/line quantities with SI/IEC prefixes ([`quantity`])
//! - an absolute-deadline clock with oversleep-recovery pacing ([`clock`])
//! - a growable per-line chunk chain and a fixed-capacity ring of the
//!   last N lines ([`line`])
//! - a live parameter channel that re-reads a side-channel control file
//!   while the data pump runs ([`control`])
//! - the stream-shaping disciplines themselves ([`pump`])
//!
//! ## Quick Start
//!
//! ```no_run
//! use pipeshape_core::interval::parse_interval;
//! use pipeshape_core::input::ByteReader;
//! use pipeshape_core::pump::rate::{RatePump, RateUnit};
//!
//! // One byte every 100 ms, strict pacing, stdin to stdout.
//! let period = parse_interval("100ms").unwrap();
//! let mut pump = RatePump::new(RateUnit::Char, period, true, None);
//! let mut input = ByteReader::stdin();
//! let stdout = std::io::stdout();
//! pump.pump(&mut input, &mut stdout.lock()).unwrap();
//! ```
//!
//! ## Architecture
//!
//! parsers -> clock -> buffers -> parameter channel -> shaping pumps
//!
//! A single data-pump thread performs all I/O. One optional worker thread
//! re-reads the control file and hands the latest parsed parameter to the
//! pump through a mutex+condvar slot with an acknowledgement handshake.
//! The pump owns the line ring and every line chain in it; the worker owns
//! only its descriptor and its partial-command buffer.

pub mod clock;
pub mod control;
pub mod error;
pub mod input;
pub mod interval;
pub mod line;
pub mod priority;
pub mod pump;
pub mod quantity;
pub mod stamp;

pub use error::{Error, Result};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
