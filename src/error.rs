//! Genie error types

use std::time::Duration;

/// Genie error types.
///
/// Errors are `Clone` because a single provider outcome may be handed to
/// several waiters of the same in-flight request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenieError {
    // Admission
    #[error("rate limited, retry after {retry_after:?}")]
    Denied { retry_after: Duration },

    // Provider/network errors
    #[error("provider request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("upstream rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("authentication failed")]
    Auth,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("all {attempts} providers failed, last error: {last}")]
    AllProvidersFailed {
        attempts: usize,
        last: Box<GenieError>,
    },

    // Routing
    #[error("no provider configured")]
    NoProvider,

    /// The invoking context went away or the router is shutting down.
    #[error("request cancelled")]
    Cancelled,

    // Configuration errors (startup only)
    #[error("configuration error: {0}")]
    Config(String),
}

impl GenieError {
    /// Whether this error is worth retrying against the same provider, and
    /// falling back to the next one once retries are exhausted.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GenieError::Timeout
                | GenieError::Connection(_)
                | GenieError::Upstream { .. }
                | GenieError::RateLimited { .. }
        )
    }

    /// Wait hint carried by the error, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GenieError::Denied { retry_after } => Some(*retry_after),
            GenieError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Coarse classification for callers that only need to pick a reply.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenieError::Denied { .. } => ErrorKind::Denied,
            GenieError::Timeout => ErrorKind::Timeout,
            GenieError::Connection(_)
            | GenieError::Upstream { .. }
            | GenieError::RateLimited { .. }
            | GenieError::NoProvider => ErrorKind::Unavailable,
            GenieError::Invalid(_) => ErrorKind::Invalid,
            GenieError::Auth => ErrorKind::Auth,
            GenieError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            GenieError::AllProvidersFailed { .. } => ErrorKind::AllProvidersFailed,
            GenieError::Cancelled => ErrorKind::Cancelled,
            GenieError::Config(_) => ErrorKind::Config,
        }
    }

    /// Map an HTTP status from a provider endpoint to an error.
    ///
    /// `body` is kept for logs only; it never reaches end users because the
    /// glue layer renders [`ErrorKind::user_message`] instead.
    pub(crate) fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => GenieError::Auth,
            429 => GenieError::RateLimited { retry_after },
            400..=499 => GenieError::Invalid(format!("HTTP {status}: {body}")),
            _ => GenieError::Upstream {
                status,
                message: body,
            },
        }
    }
}

impl From<reqwest::Error> for GenieError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenieError::Timeout
        } else if err.is_connect() || err.is_request() {
            // Strip the URL so endpoints never leak through error text.
            GenieError::Connection(err.without_url().to_string())
        } else if err.is_decode() {
            GenieError::MalformedResponse(err.without_url().to_string())
        } else {
            GenieError::Connection(err.without_url().to_string())
        }
    }
}

/// Outcome classification handed to the chat glue layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Denied,
    Timeout,
    Invalid,
    Auth,
    MalformedResponse,
    AllProvidersFailed,
    /// Transient failure that was not retried away (connection, 5xx, 429).
    Unavailable,
    Cancelled,
    Config,
}

impl ErrorKind {
    /// Short, safe text for end users.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::Denied => "You're sending requests a little fast. Please wait a moment and try again!",
            ErrorKind::Timeout => "Sorry, the recipe kitchen is taking too long to respond. Please try again!",
            ErrorKind::Invalid => "Sorry, I couldn't understand that request. Try rephrasing it!",
            ErrorKind::Auth => "Sorry, I'm not able to reach my recipe service right now. An admin has been notified.",
            ErrorKind::MalformedResponse => "Sorry, I got a garbled answer. Please try again!",
            ErrorKind::AllProvidersFailed | ErrorKind::Unavailable => {
                "Sorry, I'm having trouble connecting to my recipe service. Please try again later!"
            }
            ErrorKind::Cancelled => "That request was cancelled.",
            ErrorKind::Config => "Sorry, I'm misconfigured. Please contact an admin.",
        }
    }
}

/// Result type alias for Genie operations
pub type Result<T> = std::result::Result<T, GenieError>;
