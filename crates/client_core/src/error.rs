use async_trait::async_trait;
use reqwest::Response;
use shared::{
    domain::{InvalidVersion, PackId},
    error::ApiError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("invalid API base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error(transparent)]
    Status(#[from] ApiError),
    #[error("unable to decode {context} response: {message}")]
    Decode {
        context: &'static str,
        message: String,
    },
}

impl ApiClientError {
    /// HTTP status of the failed call, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status(err) => Some(err.status),
            _ => None,
        }
    }

    pub(crate) fn decode(context: &'static str, err: impl ToString) -> Self {
        Self::Decode {
            context,
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiClientError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

/// Turns a non-2xx response into [`ApiClientError::Status`], keeping the body
/// text as the message.
#[async_trait]
pub trait ResponseExt {
    async fn map_api_error(self) -> Result<Response, ApiClientError>;
}

#[async_trait]
impl ResponseExt for Response {
    async fn map_api_error(self) -> Result<Response, ApiClientError> {
        let status = self.status();
        if status.is_success() {
            return Ok(self);
        }
        let body = self.text().await.unwrap_or_default();
        Err(ApiError::new(status.as_u16(), body.trim()).into())
    }
}

#[async_trait]
impl ResponseExt for Result<Response, reqwest::Error> {
    async fn map_api_error(self) -> Result<Response, ApiClientError> {
        match self {
            Ok(response) => response.map_api_error().await,
            Err(err) => Err(err.into()),
        }
    }
}

/// Errors returned directly by conversion-session operations.
///
/// A job that the server reports as failed is not an error here; it is an
/// outcome visible in the session snapshot.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error(transparent)]
    InvalidVersion(#[from] InvalidVersion),
    #[error("a conversion is already running for pack {0}")]
    Busy(PackId),
    #[error("conversion request failed: {0}")]
    Submission(#[source] ApiClientError),
    #[error("conversion status request failed: {0}")]
    Poll(#[source] ApiClientError),
    #[error("listing conversions failed: {0}")]
    Listing(#[source] ApiClientError),
    #[error("conversion session was cancelled")]
    Cancelled,
}
