//! Error taxonomy for the availability checker

use thiserror::Error;

/// Errors surfaced by the library.
///
/// Only `HarnessStartup` aborts a whole batch; transport and compile
/// failures are contained at their point of origin and converted into a
/// failed or dropped classification by the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level HTTP failure (connect error, timeout, bad URL).
    /// A non-2xx response is not a transport error.
    #[error("http transport: {0}")]
    Transport(String),

    /// The test harness did not return a usable session.
    #[error("harness failed to start: {0}")]
    HarnessStartup(String),

    /// A proxy descriptor could not be compiled to the harness format.
    #[error("incompatible proxy: {0}")]
    Compile(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}
