//! Scripted transport for tests and dry runs
//!
//! Replies are registered per URL. A route holds a queue of replies; the last
//! reply in the queue repeats once the others have been used. Every call is
//! recorded with its start and end instants so tests can assert ordering.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use super::{RequestDescriptor, Response, Transport};
use crate::{Error, Result};

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Respond with this response after `delay`
    Respond { response: Response, delay: Duration },
    /// Fail at the transport level after `delay`
    Fail { message: String, delay: Duration },
}

impl MockReply {
    pub fn json(status: u16, body: Value) -> Self {
        MockReply::Respond {
            response: Response::new(status, body),
            delay: Duration::ZERO,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        MockReply::Fail {
            message: message.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(self, delay: Duration) -> Self {
        match self {
            MockReply::Respond { response, .. } => MockReply::Respond { response, delay },
            MockReply::Fail { message, .. } => MockReply::Fail { message, delay },
        }
    }
}

/// A call observed by the mock
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: RequestDescriptor,
    pub started: Instant,
    pub finished: Instant,
}

/// Transport answering from scripted per-URL replies
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<MockReply>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reply for `url` (builder style)
    pub fn route(self, url: impl Into<String>, reply: MockReply) -> Self {
        self.push(url, reply);
        self
    }

    /// Append a reply to the queue for `url`
    pub fn push(&self, url: impl Into<String>, reply: MockReply) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.entry(url.into()).or_default().push_back(reply);
        }
    }

    /// All calls so far, in the order they finished
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Calls made to `url`
    pub fn calls_to(&self, url: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.request.url == url)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn next_reply(&self, url: &str) -> Option<MockReply> {
        let mut routes = self.routes.lock().ok()?;
        let queue = routes.get_mut(url)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<Response> {
        let started = Instant::now();
        let reply = self.next_reply(&request.url);

        let outcome = match reply {
            Some(MockReply::Respond { response, delay }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let elapsed = started.elapsed().as_millis() as u64;
                let duration_ms = if response.duration_ms > 0 {
                    response.duration_ms
                } else {
                    elapsed
                };
                Ok(Response {
                    duration_ms,
                    ..response
                })
            }
            Some(MockReply::Fail { message, delay }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Err(Error::Transport(message))
            }
            None => Err(Error::Transport(format!("no mock route for {}", request.url))),
        };

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                request: request.clone(),
                started,
                finished: Instant::now(),
            });
        }

        outcome
    }
}
