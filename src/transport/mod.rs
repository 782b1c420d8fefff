//! Transport Module
//!
//! The transport is the collaborator that actually performs a request. The
//! scheduler only needs a [`Response`] back with status, headers, body and
//! duration; everything else about the wire is the transport's business.
//!
//! Two implementations ship with the crate:
//! - [`HttpTransport`]: reqwest-backed HTTP client
//! - [`MockTransport`]: scripted responses with artificial latency, for
//!   tests and dry runs

pub mod http;
pub mod mock;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::validate::ValidationConfig;
use crate::Result;

pub use http::{HttpConfig, HttpTransport};
pub use mock::{MockReply, MockTransport, RecordedCall};

/// Description of one request to perform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// Optional display name (used in logs)
    #[serde(default)]
    pub name: Option<String>,
    /// HTTP method, `GET` when omitted
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    /// Per-item timeout in milliseconds; overrides the run's timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Rules applied when response validation is enabled
    #[serde(default)]
    pub validations: Vec<ValidationConfig>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestDescriptor {
    /// A GET request to `url`
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// A POST request to `url` with a JSON body
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new("POST", url).with_body(body)
    }

    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn with_validation(mut self, rule: ValidationConfig) -> Self {
        self.validations.push(rule);
        self
    }

    /// Name for logs: explicit name, else `METHOD url`
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{} {}", self.method, self.url))
    }
}

/// Response produced by a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON body, or a JSON string holding the raw text
    pub body: Value,
    /// Round-trip time in milliseconds
    pub duration_ms: u64,
    /// Body size in bytes as received
    #[serde(default)]
    pub size_bytes: u64,
}

impl Response {
    pub fn new(status: u16, body: Value) -> Self {
        let size_bytes = body.to_string().len() as u64;
        Self {
            status,
            headers: BTreeMap::new(),
            body,
            duration_ms: 0,
            size_bytes,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        let wanted = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_ascii_lowercase() == wanted)
            .map(|(_, v)| v.as_str())
    }
}

/// Performs requests on behalf of the scheduler.
///
/// A non-2xx status is still a successful `send`; only failures to obtain a
/// response at all are errors. Implementations own hard cancellation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<Response>;
}
