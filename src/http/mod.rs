//! Outbound HTTP.
//!
//! Every networked component talks to the provider through [`Fetch`].
//! [`HttpClient`] implements it on top of `reqwest`, repeating failed
//! requests according to a [`RetryPolicy`]. Tests substitute in-memory
//! implementations.

mod retry;

pub use retry::{Exhausted, RetryPolicy, retry};

use bytes::Bytes;
use reqwest::{
    StatusCode,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use tracing::{debug, error};
use url::Url;

use crate::config::HttpConfig;

/// Prefix of callback-wrapped responses served by the street view endpoints.
const JSONP_MARKER: &str = "/**/jsonp.";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to build http client: {0}")]
    Build(reqwest::Error),
    #[error("invalid header {name}: {detail}")]
    InvalidHeader { name: String, detail: String },
    #[error("request to {url} failed after {attempts} attempts: {last}")]
    Exhausted {
        url: Url,
        attempts: u32,
        last: String,
    },
    #[error("failed to decode json from {url}: {error}")]
    Decode { url: Url, error: serde_json::Error },
}

#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
}

/// GET access to the provider.
pub trait Fetch: Sync {
    /// Fetch the full response body of a successful (200) response.
    fn get(
        &self,
        url: &Url,
        params: &[(&str, String)],
    ) -> impl Future<Output = Result<Bytes, Error>> + Send;

    /// Fetch and decode a JSON (or JSONP-wrapped JSON) response.
    fn get_json(
        &self,
        url: &Url,
        params: &[(&str, String)],
    ) -> impl Future<Output = Result<serde_json::Value, Error>> + Send {
        async move {
            let body = self.get(url, params).await?;
            decode_json(url, &body)
        }
    }
}

/// Strip a JSONP callback wrapper, leaving plain JSON untouched.
pub fn unwrap_jsonp(text: &str) -> &str {
    if !text.starts_with(JSONP_MARKER) {
        return text;
    }
    match (text.find('('), text.rfind(')')) {
        (Some(open), Some(close)) if open < close => &text[open + 1..close],
        _ => text,
    }
}

pub fn decode_json(url: &Url, body: &[u8]) -> Result<serde_json::Value, Error> {
    let text = String::from_utf8_lossy(body);
    serde_json::from_str(unwrap_jsonp(&text)).map_err(|error| Error::Decode {
        url: url.clone(),
        error,
    })
}

/// Retrying client shared by every stage of a crawl.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::InvalidHeader {
                    name: name.clone(),
                    detail: e.to_string(),
                })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| Error::InvalidHeader {
                name: name.clone(),
                detail: e.to_string(),
            })?;
            headers.insert(header_name, header_value);
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(Error::Build)?;
        Ok(Self::with_client(client, config.retry_policy()))
    }

    pub fn with_client(client: reqwest::Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    async fn attempt(&self, url: &Url, params: &[(&str, String)]) -> Result<Bytes, AttemptError> {
        let response = self.client.get(url.clone()).query(params).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(AttemptError::Status(status));
        }
        Ok(response.bytes().await?)
    }
}

impl Fetch for HttpClient {
    async fn get(&self, url: &Url, params: &[(&str, String)]) -> Result<Bytes, Error> {
        retry(&self.policy, |attempt| {
            debug!(%url, ?params, attempt, "GET");
            self.attempt(url, params)
        })
        .await
        .map_err(|exhausted| {
            error!(
                %url,
                attempts = exhausted.attempts,
                error = %exhausted.last,
                "request exhausted all retries"
            );
            Error::Exhausted {
                url: url.clone(),
                attempts: exhausted.attempts,
                last: exhausted.last.to_string(),
            }
        })
    }
}
