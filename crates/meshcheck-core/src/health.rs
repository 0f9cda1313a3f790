//! Control-plane health probe.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::{HarnessError, Result};

/// Answers "is the endpoint at `url` healthy right now?".
///
/// `Err` carries a short reason and means "not ready yet"; it is never
/// fatal on its own.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, url: &str) -> std::result::Result<(), String>;
}

/// `GET url`, healthy on 200 only.
#[derive(Debug, Clone)]
pub struct HttpHealthCheck {
    client: reqwest::Client,
}

impl HttpHealthCheck {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| HarnessError::Config(format!("http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self, url: &str) -> std::result::Result<(), String> {
        let resp = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        match resp.status() {
            StatusCode::OK => Ok(()),
            other => Err(format!("status {}", other)),
        }
    }
}

type CheckFuture = Pin<Box<dyn Future<Output = std::result::Result<(), String>> + Send>>;

/// Health check backed by a closure, for tests and embedding.
#[derive(Clone)]
pub struct FnHealthCheck {
    f: Arc<dyn Fn(String) -> CheckFuture + Send + Sync>,
}

impl FnHealthCheck {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), String>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |url| Box::pin(f(url))),
        }
    }

    /// Always healthy.
    pub fn healthy() -> Self {
        Self::new(|_| async { Ok(()) })
    }

    /// Never healthy, always answering `status`.
    pub fn failing(status: u16) -> Self {
        Self::new(move |_| async move { Err(format!("status {}", status)) })
    }
}

#[async_trait]
impl HealthCheck for FnHealthCheck {
    async fn check(&self, url: &str) -> std::result::Result<(), String> {
        (self.f)(url.to_string()).await
    }
}
