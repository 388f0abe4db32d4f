//! The stream-shaping disciplines.
//!
//! Each pump plugs the parsers, clock, buffers and parameter channel
//! together in a different way:
//!
//! - [`rate`]: one byte or line per interval, with oversleep recovery
//! - [`hold`]: keep the last N lines, release them on quiescence
//! - [`quota`]: release units while an externally fed counter has them
//! - [`tshead`]: pass lines whose first-field timestamp is in bound
//! - [`align`]: sleep to the next "nice round" multiple of an interval

pub mod align;
pub mod hold;
pub mod quota;
pub mod rate;
pub mod tshead;

/// Why a pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEnd {
    /// Input ran dry and everything buffered was released.
    Eof,
    /// A termination request (signal, `t` command, or FIFO close with
    /// `-t`) stopped the pump before the input was exhausted.
    Terminated,
}
