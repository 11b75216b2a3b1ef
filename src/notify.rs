//! Delivery abstraction for verification codes.
//!
//! Sending email/SMS is an external capability: the pipeline hands each code
//! to a [`Notifier`] and only the success or failure of the hand-off surfaces
//! to callers. Code values never appear in API responses.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;
use url::Url;

use crate::enroll::Channel;

/// One code delivery for one channel.
#[derive(Clone, Debug, Serialize)]
pub struct CodeDelivery {
    pub channel: Channel,
    /// Email address or phone number, depending on the channel.
    pub recipient: String,
    pub code: String,
    pub expires_at_unix: i64,
}

/// Hands verification codes to whatever actually delivers them.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a code or return an error so the caller can surface the
    /// failure (the user remedy is a resend).
    async fn deliver(&self, delivery: &CodeDelivery) -> Result<()>;
}

/// Local dev notifier that logs the delivery instead of sending anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, delivery: &CodeDelivery) -> Result<()> {
        info!(
            channel = delivery.channel.as_str(),
            recipient = %delivery.recipient,
            code = %delivery.code,
            "verification code delivery stub"
        );
        Ok(())
    }
}

/// Notifier that POSTs deliveries to an external webhook as JSON.
#[derive(Clone, Debug)]
pub struct HttpNotifier {
    client: Client,
    endpoint: Url,
}

impl HttpNotifier {
    /// Build a webhook notifier for the given endpoint.
    ///
    /// # Errors
    /// Returns an error if the endpoint is not an http(s) URL or the HTTP
    /// client cannot be constructed.
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("invalid notifier URL")?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            anyhow::bail!("notifier URL must use http or https: {endpoint}");
        }
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()
            .context("failed to build notifier HTTP client")?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn deliver(&self, delivery: &CodeDelivery) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(delivery)
            .send()
            .await
            .context("notifier request failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("notifier rejected delivery: {status}");
        }
        Ok(())
    }
}
