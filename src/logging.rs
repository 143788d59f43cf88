//! # Logging module
//!
//! This module provides logging facilities and helpers. Logs are written on
//! the standard error, the standard output is kept for command results.

use tracing::Level;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to set global default subscriber, {0}")]
    GlobalDefaultSubscriber(tracing::subscriber::SetGlobalDefaultError),
}

// -----------------------------------------------------------------------------
// helpers

pub const fn level(verbosity: usize) -> Level {
    match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

pub fn initialize(verbosity: usize) -> Result<(), Error> {
    let detailed = verbosity >= 3;

    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(level(verbosity))
            .with_line_number(detailed)
            .with_thread_ids(detailed)
            .with_target(detailed)
            .finish(),
    )
    .map_err(Error::GlobalDefaultSubscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_verbosity_to_level() {
        assert_eq!(level(0), Level::ERROR);
        assert_eq!(level(2), Level::INFO);
        assert_eq!(level(4), Level::TRACE);
        assert_eq!(level(12), Level::TRACE);
    }
}
