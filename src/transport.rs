//! HTTP seam shared by both remote clients.
//!
//! Production code goes through [`ReqwestTransport`]; tests swap in a mock
//! that records every request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client as HttpClient, Method};
use serde_json::Value;

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Sends one request and returns the decoded JSON body.
///
/// Non-2xx statuses come back as [`SyncError::Http`]; an empty body decodes
/// to `Value::Null`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<Value, SyncError>;
}

pub struct ReqwestTransport {
    http_client: HttpClient,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, SyncError> {
        // Script endpoints answer through a redirect to the content host
        let http_client = HttpClient::builder()
            .redirect(redirect::Policy::limited(10))
            .build()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<Value, SyncError> {
        let mut builder = self.http_client.request(request.method, &request.url);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::Http {
                status: status.as_u16(),
            });
        }

        let text = resp
            .text()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| SyncError::Transport(format!("invalid JSON response: {e}")))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::Mutex;

    use tokio::time::Instant;

    use super::*;

    type Handler = Box<dyn Fn(&HttpRequest) -> Result<Value, SyncError> + Send + Sync>;

    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub request: HttpRequest,
        pub started: Instant,
    }

    /// Records requests and answers them from a closure.
    pub struct MockTransport {
        handler: Handler,
        delay: Duration,
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl MockTransport {
        pub fn new(
            handler: impl Fn(&HttpRequest) -> Result<Value, SyncError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                handler: Box::new(handler),
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Every request takes `delay` before answering.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.calls().into_iter().map(|c| c.request).collect()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn send(&self, request: HttpRequest) -> Result<Value, SyncError> {
            self.calls.lock().unwrap().push(RecordedCall {
                request: request.clone(),
                started: Instant::now(),
            });
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.handler)(&request)
        }
    }
}
