//! Crate error types
//!
//! Errors surfaced by the directory client. All failures are local to the
//! affected server or mount; nothing here is fatal to the host process.

/// Result alias using the crate error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for directory client operations
#[derive(Debug, Clone)]
pub enum Error {
    /// A configured directory URL could not be parsed
    InvalidUrl(String),
    /// Transport session could not be created for a server
    Session(String),
    /// A network call to a directory server could not complete
    Transport(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidUrl(url) => write!(f, "Invalid directory URL: {}", url),
            Error::Session(msg) => write!(f, "Transport session error: {}", msg),
            Error::Transport(msg) => write!(f, "Transport failure: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::InvalidUrl(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            Error::Session(e.to_string())
        } else {
            Error::Transport(e.to_string())
        }
    }
}
