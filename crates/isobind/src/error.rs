//! Error types returned by isobind operations.
//!
//! Script and resolution failures are values. Lifetime violations (using a
//! disposed isolate, a closed context or a released value) are programming
//! errors and panic instead.

use isobind_diagnostics::ScriptError;
use thiserror::Error;

use crate::handle_table::Token;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Syntax or runtime exception raised by script.
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// A module import could not be resolved.
    #[error(
        "cannot resolve module '{specifier}'{}: {message}",
        imported_from(.referrer)
    )]
    Resolution {
        specifier: String,
        referrer: String,
        message: String,
    },

    /// Execution was terminated before the operation finished.
    #[error("execution terminated")]
    Terminated,

    /// Execution was terminated because the heap limit was reached.
    #[error("execution terminated: heap limit reached ({limit} bytes)")]
    HeapLimit { limit: usize },

    /// A value did not have the expected JavaScript type.
    #[error("value is not {expected}")]
    Type { expected: &'static str },

    /// The engine refused an operation without raising an exception.
    #[error("engine error: {0}")]
    Engine(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("handle {0} is not registered")]
    HandleNotFound(Token),
}

fn imported_from(referrer: &str) -> String {
    if referrer.is_empty() {
        String::new()
    } else {
        format!(" imported from '{}'", referrer)
    }
}

impl Error {
    pub(crate) fn engine(message: impl Into<String>) -> Self {
        Error::Engine(message.into())
    }

    /// The script error, if this error came from script.
    pub fn as_script_error(&self) -> Option<&ScriptError> {
        match self {
            Error::Script(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the failure ended execution rather than raising a catchable
    /// exception.
    pub fn is_termination(&self) -> bool {
        matches!(self, Error::Terminated | Error::HeapLimit { .. })
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}
