use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RestError>;

#[derive(Error, Debug)]
pub enum RestError {
    #[error("{route} returned {status}: {message}")]
    Http {
        route: String,
        status: StatusCode,
        code: Option<u64>,
        message: String,
    },

    #[error("{route} returned {status} after {attempts} attempts")]
    Server {
        route: String,
        status: StatusCode,
        attempts: u32,
    },

    #[error("error while performing request to {route} after {attempts} attempts: {source}")]
    Transport {
        route: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("{route} was ratelimited {retries} times in a row")]
    RateLimitRetriesExhausted { route: String, retries: u32 },

    #[error("deadline exceeded while waiting to send {route}")]
    DeadlineExceeded { route: String },

    #[error("dispatcher has been closed")]
    Closed,

    #[error("error while operating on JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

impl RestError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RestError::Http { status, .. } | RestError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN)
        )
    }
}

impl<T> From<RestError> for Result<T> {
    fn from(e: RestError) -> Self {
        Err(e)
    }
}

/// Failure below the HTTP layer. Always considered transient.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("error while performing HTTP operation: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}
