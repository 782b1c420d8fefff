//! reqwest-backed HTTP transport

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{RequestDescriptor, Response, Transport};
use crate::{Error, Result};

/// Client settings for [`HttpTransport`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Connect timeout in milliseconds (humantime strings accepted)
    #[serde(default, with = "crate::config::opt_duration_ms")]
    pub connect_timeout_ms: Option<u64>,
    /// Headers added to every request unless the request sets them itself
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
}

fn default_user_agent() -> String {
    format!("reqchain/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_ms: None,
            default_headers: BTreeMap::new(),
        }
    }
}

/// HTTP transport over a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Self::with_config(&HttpConfig::default())
    }

    pub fn with_config(config: &HttpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Config(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("invalid header value for '{}': {}", name.as_str(), e)))?;
            headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers);
        if let Some(ms) = config.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Wrap an already configured client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build_url(request: &RequestDescriptor) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&request.url)
            .map_err(|e| Error::Transport(format!("invalid url '{}': {}", request.url, e)))?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &request.query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<Response> {
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::Transport(format!("invalid method '{}'", request.method)))?;
        let url = Self::build_url(request)?;

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            if !request.headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                builder = builder.header(CONTENT_TYPE, "application/json");
            }
            builder = builder.body(serde_json::to_vec(body)?);
        }
        if let Some(ms) = request.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }

        let started = Instant::now();
        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("{} timed out", request.label()))
            } else {
                Error::Transport(format!("{}: {}", request.label(), e))
            }
        })?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let bytes = resp.bytes().await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        Ok(Response {
            status,
            headers,
            body: parse_body(&bytes),
            duration_ms,
            size_bytes: bytes.len() as u64,
        })
    }
}

fn parse_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
