//! Common utilities and types shared across the simplydash crates.

pub mod error;
pub mod logging;
pub mod signal;

pub use error::{Error, Result};
pub use signal::{Signal, SignalReceiver};
