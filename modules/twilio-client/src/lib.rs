pub mod error;

pub use error::{Result, TwilioError};

use std::collections::HashMap;

use serde::Deserialize;

const BASE_URL: &str = "https://api.twilio.com/2010-04-01";

#[derive(Debug, Deserialize)]
pub struct MessageResponse {
    pub sid: String,
}

/// Minimal Twilio Messages API client for WhatsApp delivery.
pub struct TwilioClient {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
}

impl TwilioClient {
    pub fn new(account_sid: String, auth_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_sid,
            auth_token,
        }
    }

    /// Send a WhatsApp message. `from` is the Twilio sender in
    /// `whatsapp:+E164` form; `to` is a bare E.164 number. Returns the
    /// message SID.
    pub async fn send_whatsapp(&self, from: &str, to: &str, body: &str) -> Result<String> {
        let url = format!("{}/Accounts/{}/Messages.json", BASE_URL, self.account_sid);

        let mut form: HashMap<&str, String> = HashMap::new();
        form.insert("From", from.to_string());
        form.insert("To", format!("whatsapp:{to}"));
        form.insert("Body", body.to_string());

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TwilioError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let message: MessageResponse = resp.json().await?;
        tracing::debug!(sid = %message.sid, "WhatsApp message accepted");
        Ok(message.sid)
    }
}
