use thiserror::Error;

use crate::types::RetryBudget;

/// Errors produced by network transfers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NetError {
    /// Transport failure before a status was received (connection reset, DNS, TLS...).
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("HTTP {status} for URL: {url}")]
    HttpStatus { status: u16, url: String },
    #[error("Timeout")]
    Timeout,
    #[error("Invalid range: {0}")]
    InvalidRange(String),
    #[error("Request failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        source: Box<NetError>,
    },
    #[error("Request cancelled")]
    Cancelled,
}

impl NetError {
    pub fn http<S: Into<String>>(msg: S) -> Self {
        Self::Http(msg.into())
    }

    pub fn http_status(status: u16, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Transient failures: timeouts, transport loss, 5xx, 408 and 429.
    pub fn is_retryable(&self) -> bool {
        self.retry_budget().is_some()
    }

    /// Budget a retry of this failure is charged to; `None` when it must not be retried.
    pub fn retry_budget(&self) -> Option<RetryBudget> {
        match self {
            NetError::Http(_) => Some(RetryBudget::Offline),
            NetError::Timeout => Some(RetryBudget::Request),
            NetError::HttpStatus { status, .. } => {
                (*status >= 500 || *status == 429 || *status == 408).then_some(RetryBudget::Request)
            }
            NetError::InvalidRange(_) | NetError::RetryExhausted { .. } | NetError::Cancelled => {
                None
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, NetError::Timeout)
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            NetError::HttpStatus { status, .. } => Some(*status),
            NetError::RetryExhausted { source, .. } => source.status_code(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NetError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout;
        }
        match (error.status(), error.url()) {
            (Some(status), Some(url)) => Self::http_status(status.as_u16(), url.as_str()),
            _ => Self::Http(error.to_string()),
        }
    }
}

pub type NetResult<T> = Result<T, NetError>;
