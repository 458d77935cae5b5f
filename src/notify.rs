use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Push notification delivery. Callers go through [`notify_best_effort`].
#[allow(async_fn_in_trait)]
pub trait Notifier {
    async fn send(&self, topic: &str, title: &str, body: &str) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Base URL of the push service; notifications are disabled when unset.
    pub endpoint: Option<String>,
    pub debug_topic: String,
    pub alert_topic: String,
    pub timeout_secs: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            debug_topic: "debug".into(),
            alert_topic: "alerts".into(),
            timeout_secs: 10,
        }
    }
}

/// Posts `body` to `<endpoint>/<topic>` with the title in a `Title` header.
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl HttpNotifier {
    pub fn new(settings: &NotificationSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("failed to build notification HTTP client")?;

        Ok(Self {
            client,
            endpoint: settings
                .endpoint
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
        })
    }
}

impl Notifier for HttpNotifier {
    async fn send(&self, topic: &str, title: &str, body: &str) -> Result<()> {
        let Some(endpoint) = &self.endpoint else {
            log_info!("notifications disabled, dropping '{title}' for topic {topic}");
            return Ok(());
        };

        self.client
            .post(format!("{endpoint}/{topic}"))
            .header("Title", title)
            .body(body.to_string())
            .send()
            .await
            .with_context(|| format!("failed to deliver notification to topic {topic}"))?
            .error_for_status()
            .context("push service rejected notification")?;
        Ok(())
    }
}

/// Sends a notification, logging and discarding any failure.
pub async fn notify_best_effort<N: Notifier>(notifier: &N, topic: &str, title: &str, body: &str) {
    if let Err(err) = notifier.send(topic, title, body).await {
        log_warn!("failed to send notification '{title}': {err:#}");
    }
}
