//! Push notification delivery.
//!
//! Delivery is best-effort: callers log a failed send and move on.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

const FCM_BASE_URL: &str = "https://fcm.googleapis.com";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),

    #[error("notification rejected with {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, device_token: &str, title: &str, body: &str) -> Result<(), NotifyError>;
}

#[async_trait]
impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    async fn send(&self, device_token: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        (**self).send(device_token, title, body).await
    }
}

/// Firebase Cloud Messaging HTTP v1 sender.
#[derive(Clone)]
pub struct FcmNotifier {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    access_token: String,
}

impl FcmNotifier {
    pub fn new(project_id: impl Into<String>, access_token: impl Into<String>) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: FCM_BASE_URL.to_string(),
            project_id: project_id.into(),
            access_token: access_token.into(),
        })
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl std::fmt::Debug for FcmNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FcmNotifier")
            .field("project_id", &self.project_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Notifier for FcmNotifier {
    async fn send(&self, device_token: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        if device_token.is_empty() {
            debug!("empty device token, skipping push");
            return Ok(());
        }

        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.base_url, self.project_id
        );
        let payload = json!({
            "message": {
                "token": device_token,
                "notification": { "title": title, "body": body }
            }
        });

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Logs instead of delivering; used when push is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, device_token: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        info!(device_token, title, body, "notification (push not configured)");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub device_token: String,
    pub title: String,
    pub body: String,
}

/// Records sends in memory (tests/dev). Can be switched to fail every send.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failing: bool,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn send(&self, device_token: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        if self.failing {
            return Err(NotifyError::Transport("notifier configured to fail".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentNotification {
                device_token: device_token.to_string(),
                title: title.to_string(),
                body: body.to_string(),
            });
        Ok(())
    }
}
