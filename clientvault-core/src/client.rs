use std::error::Error as _;
use std::io;
use std::time::Duration;

use reqwest::header::CONTENT_RANGE;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::query::Query;

const REST_PREFIX: &str = "/rest/v1/";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("remote service is not configured")]
    NotConfigured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse<T> {
    pub data: Vec<T>,
    pub count: Option<u64>,
}

#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl RestClient {
    pub fn with_base_url(base_url: &str, api_key: impl Into<String>) -> Result<Self, RemoteError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            api_key: api_key.into(),
        })
    }

    pub async fn execute<T: DeserializeOwned>(
        &self,
        query: &Query,
    ) -> Result<QueryResponse<T>, RemoteError> {
        self.execute_with_timeout(query, None).await
    }

    pub async fn execute_with_timeout<T: DeserializeOwned>(
        &self,
        query: &Query,
        timeout: Option<Duration>,
    ) -> Result<QueryResponse<T>, RemoteError> {
        let mut url = self.endpoint(query.table_name())?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query.query_pairs() {
                pairs.append_pair(&key, &value);
            }
        }
        let mut request = self
            .http
            .get(url)
            .header("apikey", &self.api_key)
            .header("Authorization", self.auth_header_value());
        if query.wants_count() {
            request = request.header("Prefer", "count=exact");
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        Self::handle_response(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    fn endpoint(&self, table: &str) -> Result<Url, RemoteError> {
        Ok(self.base_url.join(&format!("{REST_PREFIX}{table}"))?)
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<QueryResponse<T>, RemoteError> {
        if response.status().is_success() {
            let count = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_content_range_total);
            let data = response.json::<Vec<T>>().await?;
            Ok(QueryResponse { data, count })
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(RemoteError::Api { status, body })
        }
    }
}

impl RemoteError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            RemoteError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    /// Connection-level failures and 5xx/408 responses.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Request(err) => {
                err.is_timeout() || err.is_connect() || has_transient_io_source(err)
            }
            RemoteError::Api { .. } => {
                matches!(self.classification(), Some(ApiErrorClass::Transient))
            }
            RemoteError::Url(_) | RemoteError::NotConfigured => false,
        }
    }
}

fn has_transient_io_source(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>()
            && matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            )
        {
            return true;
        }
        source = cause.source();
    }
    false
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

// "0-24/3573", "*/0"; an unknown total ("0-24/*") yields None.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}
