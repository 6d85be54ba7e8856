use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Client, Method, Url};
use std::time::Duration;
use tracing::{debug, info};

use crate::resource::RequestSpec;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Error produced while performing a desired request.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid HTTP method: '{0}'")]
    InvalidMethod(String),

    #[error("malformed header '{entry}': {reason}")]
    MalformedHeader { entry: String, reason: String },

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("failed to read response body: {0}")]
    ReadBody(String),
}

impl ExecutorError {
    /// True when the desired request itself is unusable. Sending it again
    /// fails the same way until someone fixes the resource.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl { .. } | Self::InvalidMethod(_) | Self::MalformedHeader { .. }
        )
    }
}

/// Recorded result of one HTTP call: the decimal status code and the
/// response body read to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub code: String,
    pub body: String,
}

/// Performs the side-effecting call for a request resource.
///
/// One invocation is one outbound call. Implementations never retry;
/// retry decisions belong to whoever drives reconciliation.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, spec: &RequestSpec) -> Result<ActionResult, ExecutorError>;
}

/// A desired request after validation, ready to send.
#[derive(Debug)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Option<String>,
}

impl PreparedRequest {
    /// Validate and normalize a spec without touching the network.
    pub fn from_spec(spec: &RequestSpec) -> Result<Self, ExecutorError> {
        let method = parse_method(&spec.method)?;
        let url = parse_url(&spec.path)?;
        let headers = spec
            .headers
            .iter()
            .map(String::as_str)
            .map(parse_header)
            .collect::<Result<Vec<_>, _>>()?;
        let body = (!spec.body.is_empty()).then(|| spec.body.clone());

        Ok(Self {
            method,
            url,
            headers,
            body,
        })
    }
}

pub fn parse_method(s: &str) -> Result<Method, ExecutorError> {
    Method::from_bytes(s.trim().to_uppercase().as_bytes())
        .map_err(|_| ExecutorError::InvalidMethod(s.to_string()))
}

fn parse_url(s: &str) -> Result<Url, ExecutorError> {
    let url = Url::parse(s).map_err(|e| ExecutorError::InvalidUrl {
        url: s.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ExecutorError::InvalidUrl {
            url: s.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

/// Split a `"name:value"` entry on its first colon.
pub fn parse_header(entry: &str) -> Result<(HeaderName, HeaderValue), ExecutorError> {
    let malformed = |reason: String| ExecutorError::MalformedHeader {
        entry: entry.to_string(),
        reason,
    };

    let (name, value) = entry
        .split_once(':')
        .ok_or_else(|| malformed("missing ':' separator".to_string()))?;

    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|e| malformed(format!("invalid name: {e}")))?;
    let value = HeaderValue::from_str(value.trim())
        .map_err(|e| malformed(format!("invalid value: {e}")))?;
    Ok((name, value))
}

/// Executes desired requests with reqwest.
pub struct HttpExecutor {
    client: Client,
    timeout: Duration,
}

impl HttpExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

#[async_trait]
impl ActionExecutor for HttpExecutor {
    async fn execute(&self, spec: &RequestSpec) -> Result<ActionResult, ExecutorError> {
        let prepared = PreparedRequest::from_spec(spec)?;

        debug!(url = %prepared.url, method = %prepared.method, "executing HTTP request");

        let mut req = self
            .client
            .request(prepared.method.clone(), prepared.url.clone())
            .timeout(self.timeout);

        for (name, value) in prepared.headers {
            req = req.header(name, value);
        }

        if let Some(body) = prepared.body {
            req = req.body(body);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ExecutorError::Transport(e.to_string()))?;

        let status = response.status().as_u16();

        // text() consumes the response, so the connection is released on
        // both the success and the error path.
        let body = response
            .text()
            .await
            .map_err(|e| ExecutorError::ReadBody(e.to_string()))?;

        info!(url = %prepared.url, method = %prepared.method, status, "HTTP request completed");

        Ok(ActionResult {
            code: status.to_string(),
            body,
        })
    }
}
