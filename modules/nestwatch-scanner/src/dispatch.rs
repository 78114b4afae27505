//! Notification dispatcher: formats a match per channel, delivers it,
//! and returns explicit delivery reports for the orchestrator to write
//! to the audit log. Channels are attempted independently — one failing
//! channel never blocks the others — and transient failures get a small
//! bounded number of retries with backoff inside the cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use nestwatch_common::{
    Channel, DeliveryStatus, Listing, MatchConfidence, MatchResult, SearchProfile,
};
use nestwatch_store::NotificationLog;
use sendgrid_client::{SendgridClient, SendgridError};
use telegram_client::{TelegramClient, TelegramError};
use twilio_client::{TwilioClient, TwilioError};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl DeliveryError {
    /// Transient failures are worth retrying within the cycle; client
    /// errors (bad recipient, malformed message) are not.
    pub fn is_transient(&self) -> bool {
        match self {
            DeliveryError::Network(_) => true,
            DeliveryError::Api { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

impl From<TelegramError> for DeliveryError {
    fn from(err: TelegramError) -> Self {
        match err {
            TelegramError::Network(m) => DeliveryError::Network(m),
            TelegramError::Api {
                status,
                description,
            } => DeliveryError::Api {
                status,
                message: description,
            },
            TelegramError::Parse(m) => DeliveryError::Network(m),
        }
    }
}

impl From<TwilioError> for DeliveryError {
    fn from(err: TwilioError) -> Self {
        match err {
            TwilioError::Network(m) => DeliveryError::Network(m),
            TwilioError::Api { status, message } => DeliveryError::Api { status, message },
            TwilioError::Parse(m) => DeliveryError::Network(m),
        }
    }
}

impl From<SendgridError> for DeliveryError {
    fn from(err: SendgridError) -> Self {
        match err {
            SendgridError::Network(m) => DeliveryError::Network(m),
            SendgridError::Api { status, message } => DeliveryError::Api { status, message },
        }
    }
}

/// A formatted message ready for one channel family.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub subject: String,
    pub text: String,
    pub html: String,
    pub image_url: Option<String>,
}

/// Uniform delivery contract over the vendor clients.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Deliver to one recipient. Returns a provider message id.
    async fn send(&self, recipient: &str, message: &ChannelMessage)
        -> Result<String, DeliveryError>;
}

pub struct TelegramSender {
    client: TelegramClient,
}

impl TelegramSender {
    pub fn new(client: TelegramClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChannelSender for TelegramSender {
    async fn send(
        &self,
        recipient: &str,
        message: &ChannelMessage,
    ) -> Result<String, DeliveryError> {
        let message_id = match &message.image_url {
            Some(image) => self.client.send_photo(recipient, image, &message.html).await?,
            None => self.client.send_message(recipient, &message.html).await?,
        };
        Ok(message_id.to_string())
    }
}

pub struct WhatsappSender {
    client: TwilioClient,
    from: String,
}

impl WhatsappSender {
    pub fn new(client: TwilioClient, from: String) -> Self {
        Self { client, from }
    }
}

#[async_trait]
impl ChannelSender for WhatsappSender {
    async fn send(
        &self,
        recipient: &str,
        message: &ChannelMessage,
    ) -> Result<String, DeliveryError> {
        let sid = self
            .client
            .send_whatsapp(&self.from, recipient, &message.text)
            .await?;
        Ok(sid)
    }
}

pub struct EmailSender {
    client: SendgridClient,
    from: String,
}

impl EmailSender {
    pub fn new(client: SendgridClient, from: String) -> Self {
        Self { client, from }
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    async fn send(
        &self,
        recipient: &str,
        message: &ChannelMessage,
    ) -> Result<String, DeliveryError> {
        let message_id = self
            .client
            .send_email(&self.from, recipient, &message.subject, &message.html)
            .await?;
        Ok(message_id.unwrap_or_default())
    }
}

/// Outcome of one delivery attempt chain, returned to the orchestrator.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub channel: Channel,
    pub recipient: String,
    pub message: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub provider_id: Option<String>,
}

pub struct Dispatcher {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
    log: Arc<dyn NotificationLog>,
    max_attempts: u32,
    backoff: Duration,
}

impl Dispatcher {
    pub fn new(
        senders: HashMap<Channel, Arc<dyn ChannelSender>>,
        log: Arc<dyn NotificationLog>,
    ) -> Self {
        Self {
            senders,
            log,
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Deliver one match through every enabled channel of the profile.
    /// Channels that already have a logged notification for this
    /// (profile, content hash) are skipped silently.
    pub async fn dispatch(
        &self,
        profile: &SearchProfile,
        listing: &Listing,
        result: &MatchResult,
    ) -> Vec<DeliveryReport> {
        let content_hash = listing.fingerprint();
        let mut attempts = Vec::new();

        for (channel, recipient) in profile.channels.enabled() {
            match self
                .log
                .already_sent(profile.id, &content_hash, channel)
                .await
            {
                Ok(true) => {
                    info!(
                        profile = %profile.id,
                        channel = %channel,
                        listing = listing.native_id.as_str(),
                        "Notification already logged, skipping"
                    );
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    // Err on the side of not double-notifying is wrong here:
                    // a read failure must not silently drop a match. Attempt
                    // delivery; the log's unique key absorbs any replay.
                    warn!(error = %e, channel = %channel, "Notification log check failed");
                }
            }

            let message = format_match(listing, result);
            attempts.push(self.deliver(channel, recipient.to_string(), message));
        }

        futures::future::join_all(attempts).await
    }

    /// High-priority operator alert (auth expiry and the like), pushed
    /// through the same channel machinery as user notifications.
    pub async fn send_operator_alert(&self, recipient: &str, text: String) -> DeliveryReport {
        let message = ChannelMessage {
            subject: "Scanner needs attention".to_string(),
            text: text.clone(),
            html: text,
            image_url: None,
        };
        self.deliver(Channel::Telegram, recipient.to_string(), message)
            .await
    }

    async fn deliver(
        &self,
        channel: Channel,
        recipient: String,
        message: ChannelMessage,
    ) -> DeliveryReport {
        let Some(sender) = self.senders.get(&channel) else {
            return DeliveryReport {
                channel,
                recipient,
                message: message.text,
                status: DeliveryStatus::Failed {
                    error: format!("channel {channel} not configured"),
                },
                attempts: 0,
                provider_id: None,
            };
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match sender.send(&recipient, &message).await {
                Ok(provider_id) => {
                    info!(channel = %channel, attempt, "Notification delivered");
                    return DeliveryReport {
                        channel,
                        recipient,
                        message: message.text,
                        status: DeliveryStatus::Delivered,
                        attempts: attempt,
                        provider_id: Some(provider_id),
                    };
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(channel = %channel, attempt, error = %e, "Transient delivery failure, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => {
                    warn!(channel = %channel, attempt, error = %e, "Delivery failed");
                    return DeliveryReport {
                        channel,
                        recipient,
                        message: message.text,
                        status: DeliveryStatus::Failed {
                            error: e.to_string(),
                        },
                        attempts: attempt,
                        provider_id: None,
                    };
                }
            }
        }
    }
}

/// Build the channel-family message bodies for a match.
pub fn format_match(listing: &Listing, result: &MatchResult) -> ChannelMessage {
    let marker = match result.confidence {
        MatchConfidence::High => "🔥",
        MatchConfidence::Medium => "⭐",
        MatchConfidence::Low => "👍",
    };

    let subject = format!("New listing match: {}", listing.title);

    let text = format!(
        "{} {}\n{} ILS · {} rooms\n{}\n{}",
        marker, listing.title, result.price, result.rooms, listing.location_text, listing.url
    );

    let mut html = format!(
        "{} <b>{}</b>\n\n💰 {} ILS · 🚪 {} rooms",
        marker,
        escape_html(&listing.title),
        result.price,
        result.rooms
    );
    if !listing.location_text.is_empty() {
        html.push_str(&format!("\n📍 {}", escape_html(&listing.location_text)));
    }
    html.push_str(&format!(
        "\n\n🔗 <a href=\"{}\">View listing</a>",
        listing.url
    ));

    ChannelMessage {
        subject,
        text,
        html,
        image_url: listing.image_url.clone(),
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
