pub mod error;

pub use error::{Result, SendgridError};

use serde::Serialize;

const BASE_URL: &str = "https://api.sendgrid.com/v3";

#[derive(Debug, Serialize)]
struct MailSend<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<Address<'a>>,
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'a str,
    value: &'a str,
}

/// Minimal SendGrid v3 mail-send client.
pub struct SendgridClient {
    client: reqwest::Client,
    api_key: String,
}

impl SendgridClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    /// Send an HTML email. Returns the `X-Message-Id` header when present.
    pub async fn send_email(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        html: &str,
    ) -> Result<Option<String>> {
        let payload = MailSend {
            personalizations: vec![Personalization {
                to: vec![Address { email: to }],
            }],
            from: Address { email: from },
            subject,
            content: vec![Content {
                content_type: "text/html",
                value: html,
            }],
        };

        let url = format!("{BASE_URL}/mail/send");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SendgridError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let message_id = resp
            .headers()
            .get("X-Message-Id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        tracing::debug!(to, message_id = message_id.as_deref(), "Email accepted");
        Ok(message_id)
    }
}
