//! Error types for the strata crate.

use std::fmt;

/// Result type for strata operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading a tileset.
#[derive(Debug)]
pub enum Error {
    /// The tileset manifest request failed outright.
    ManifestRequest {
        /// The URL that failed.
        url: String,
        /// The error message.
        message: String,
    },
    /// The tileset manifest request returned a non-success status code.
    ManifestStatus {
        /// The URL that returned the error.
        url: String,
        /// The HTTP status code.
        status: u16,
    },
    /// The tileset manifest could not be parsed.
    ManifestParse {
        /// The URL of the manifest.
        url: String,
        /// The underlying parse error.
        source: strata_json::Error,
    },
    /// The tileset manifest parsed but cannot be used to build a tile tree.
    InvalidManifest {
        /// The URL of the manifest.
        url: String,
        /// Description of what was missing or invalid.
        detail: String,
    },
    /// Tile content could not be created from a response payload.
    Content(ContentError),
}

/// Errors that can occur while creating tile content.
#[derive(Debug)]
pub enum ContentError {
    /// No registered content type recognized the payload.
    UnknownFormat {
        /// The URL the payload was fetched from.
        url: String,
    },
    /// The payload matched a content type but could not be decoded.
    Malformed {
        /// The content type that attempted the decode.
        kind: &'static str,
        /// Description of what was wrong.
        detail: String,
    },
    /// An external tileset manifest failed to parse.
    ExternalTileset {
        /// The URL of the manifest.
        url: String,
        /// The underlying parse error.
        source: strata_json::Error,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ManifestRequest { url, message } => {
                write!(f, "manifest request to {url} failed: {message}")
            }
            Error::ManifestStatus { url, status } => {
                write!(f, "manifest request to {url} returned status {status}")
            }
            Error::ManifestParse { url, source } => {
                write!(f, "failed to parse manifest from {url}: {source}")
            }
            Error::InvalidManifest { url, detail } => {
                write!(f, "invalid manifest from {url}: {detail}")
            }
            Error::Content(e) => write!(f, "content error: {e}"),
        }
    }
}

impl fmt::Display for ContentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentError::UnknownFormat { url } => {
                write!(f, "no registered content type recognizes payload from {url}")
            }
            ContentError::Malformed { kind, detail } => {
                write!(f, "malformed {kind} content: {detail}")
            }
            ContentError::ExternalTileset { url, source } => {
                write!(f, "failed to parse external tileset from {url}: {source}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ManifestParse { source, .. } => Some(source),
            Error::Content(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ContentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ContentError::ExternalTileset { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ContentError> for Error {
    fn from(e: ContentError) -> Self {
        Error::Content(e)
    }
}
