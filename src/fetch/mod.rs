//! The fetch capability consumed by the scheduler
//!
//! The scheduler never knows how a target is retrieved. It hands a
//! [`FetchRequest`] to a [`Fetcher`] and classifies whatever comes back.
//! [`HttpFetcher`] is the production implementation over `reqwest`.

mod http;

pub use http::{build_http_client, HttpFetcher};

use crate::identity::{Cookie, Identity};
use crate::TaskError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Everything the collaborator needs for one attempt
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub target: String,
    pub identity: Identity,
    /// Headers derived from the identity's fingerprint
    pub headers: BTreeMap<String, String>,
    /// Deadline the scheduler will enforce on this attempt
    pub timeout: Duration,
}

/// A successful fetch
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchResponse {
    pub status_code: Option<u16>,
    pub payload: String,
    /// Cookies the target set, stored on the identity after success
    pub cookies: Vec<Cookie>,
}

impl FetchResponse {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            status_code: None,
            payload: payload.into(),
            cookies: Vec::new(),
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_cookies(mut self, cookies: Vec<Cookie>) -> Self {
        self.cookies = cookies;
        self
    }
}

/// Failure reported by a [`Fetcher`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The target cannot be fetched at all
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// The collaborator gave up on its own deadline
    #[error("Timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("{message}")]
    Transport {
        retryable: bool,
        status_code: Option<u16>,
        message: String,
    },
}

impl FetchError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            retryable: true,
            status_code: None,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            retryable: false,
            status_code: None,
            message: message.into(),
        }
    }

    pub fn status(status_code: u16, retryable: bool, message: impl Into<String>) -> Self {
        Self::Transport {
            retryable,
            status_code: Some(status_code),
            message: message.into(),
        }
    }
}

impl From<FetchError> for TaskError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidTarget(message) => TaskError::Validation(message),
            FetchError::Timeout { after } => TaskError::Timeout { after },
            FetchError::Transport {
                retryable,
                status_code,
                message,
            } => TaskError::Fetch {
                retryable,
                status_code,
                message,
            },
        }
    }
}

/// External capability that performs one attempt against a target
///
/// Implementations must be cancel-safe: the scheduler drops the returned
/// future when the attempt times out or the scheduler shuts down.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}
