use thiserror::Error;

/// Error taxonomy shared across the manager.
///
/// Per-request work returns these to the HTTP boundary where they map onto
/// status codes. Per-session loops translate `Protocol` and `Invariant` into
/// a session drop; the process keeps running.
#[derive(Error, Debug)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("system error: {0}")]
    System(String),
}

impl Error {
    /// True for conditions that must terminate the offending node session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::Invariant(_))
    }
}
