//! Usage side channel
//!
//! Successful requests are reported as `UsageEvent`s on a bounded queue and
//! forwarded to a `UsageSink` by a background task. Reporting never waits:
//! when the queue is full or the forwarder is gone the event is dropped.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::state::AppState;

/// One successful route dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageEvent {
    pub method: String,
    pub route: String,
    pub timestamp: DateTime<Utc>,
}

impl UsageEvent {
    pub fn new(method: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            route: route.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Destination for usage events
#[async_trait]
pub trait UsageSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, event: &UsageEvent) -> anyhow::Result<()>;
}

/// Writes events to the log only
pub struct LogSink;

#[async_trait]
impl UsageSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, event: &UsageEvent) -> anyhow::Result<()> {
        tracing::debug!(method = %event.method, route = %event.route, "Usage event");
        Ok(())
    }
}

/// Posts each event as JSON to a collector URL
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl UsageSink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, event: &UsageEvent) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Handle used by the request path to queue usage events
#[derive(Clone, Default)]
pub struct UsageReporter {
    sender: Option<mpsc::Sender<UsageEvent>>,
}

impl UsageReporter {
    /// Start forwarding events to `sink` from a background task.
    ///
    /// The task ends once every reporter clone has been dropped.
    pub fn spawn(sink: Arc<dyn UsageSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<UsageEvent>(capacity.max(1));

        let handle = tokio::spawn(async move {
            tracing::info!(sink = sink.name(), "Usage forwarding started");
            while let Some(event) = receiver.recv().await {
                if let Err(e) = sink.send(&event).await {
                    tracing::warn!(
                        sink = sink.name(),
                        route = %event.route,
                        "Failed to forward usage event: {:#}",
                        e
                    );
                }
            }
            tracing::debug!(sink = sink.name(), "Usage forwarding stopped");
        });

        (
            Self {
                sender: Some(sender),
            },
            handle,
        )
    }

    /// A reporter that discards every event
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// A reporter whose queue is read directly by the caller
    #[cfg(test)]
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<UsageEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Queue an event without waiting. Returns whether it was accepted.
    pub fn report(&self, event: UsageEvent) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };

        match sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::debug!(route = %event.route, "Usage queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(event)) => {
                tracing::debug!(route = %event.route, "Usage queue closed, dropping event");
                false
            }
        }
    }
}

/// Middleware reporting every 2xx response against its matched route
pub async fn track_usage(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    if response.status().is_success() {
        state.usage().report(UsageEvent::new(method, route));
    }

    response
}
