//! Error taxonomy for endpoint resolution and dispatch.

use thiserror::Error;

/// Boxed error used for resolver and transport failures from arbitrary sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while building, resolving or dispatching a fanout.
#[derive(Debug, Error)]
pub enum Error {
    /// A configured endpoint is not a valid absolute URL.
    #[error("invalid endpoint URL {url:?}: {source}")]
    InvalidEndpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The endpoint resolver failed for this request.
    #[error("endpoint resolution failed: {0}")]
    Resolution(#[source] BoxError),

    /// The endpoint resolver returned an empty set.
    #[error("no endpoints resolved for request")]
    NoEndpoints,

    /// The outbound request could not be sent or its response read.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// The outbound request could not be expressed on the wire.
    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),

    /// The shared fanout scope was cancelled.
    #[error("fanout canceled")]
    Canceled,

    /// The shared fanout scope ran past its deadline.
    #[error("fanout deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    /// Wrap any resolver error.
    pub fn resolution(e: impl Into<BoxError>) -> Self {
        Error::Resolution(e.into())
    }

    /// Wrap any transport error.
    pub fn transport(e: impl Into<BoxError>) -> Self {
        Error::Transport(e.into())
    }

    /// True for the cancellation kinds (explicit cancel or deadline).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Canceled | Error::DeadlineExceeded)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(Box::new(e))
    }
}
