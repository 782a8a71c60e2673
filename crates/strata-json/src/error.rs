//! Error types for the strata-json crate.

use std::fmt;

/// Result type for tileset document parsing.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing a tileset manifest.
#[derive(Debug)]
pub enum Error {
    /// The document is not valid JSON or does not match the manifest schema.
    Json(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Json(e) => write!(f, "failed to parse tileset manifest: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Json(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}
