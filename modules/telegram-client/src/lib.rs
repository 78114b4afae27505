pub mod error;
pub mod types;

pub use error::{Result, TelegramError};
pub use types::{ApiResponse, Message, SendMessageRequest, SendPhotoRequest};

const BASE_URL: &str = "https://api.telegram.org";

/// Minimal Telegram Bot API client: message and photo delivery only.
pub struct TelegramClient {
    client: reqwest::Client,
    token: String,
}

impl TelegramClient {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
        }
    }

    /// Send an HTML-formatted message. Returns the Telegram message id.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<i64> {
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: Some("HTML"),
            disable_web_page_preview: false,
        };
        self.call("sendMessage", &request).await
    }

    /// Send a photo by URL with an optional HTML caption.
    pub async fn send_photo(&self, chat_id: &str, photo_url: &str, caption: &str) -> Result<i64> {
        let request = SendPhotoRequest {
            chat_id,
            photo: photo_url,
            caption: Some(caption),
            parse_mode: Some("HTML"),
        };
        self.call("sendPhoto", &request).await
    }

    async fn call<B: serde::Serialize>(&self, method: &str, body: &B) -> Result<i64> {
        let url = format!("{}/bot{}/{}", BASE_URL, self.token, method);
        let resp = self.client.post(&url).json(body).send().await?;

        let status = resp.status();
        let api_resp: ApiResponse<Message> = resp.json().await?;
        if !api_resp.ok {
            return Err(TelegramError::Api {
                status: status.as_u16(),
                description: api_resp
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        let message = api_resp.result.ok_or_else(|| {
            TelegramError::Parse("ok response without result payload".to_string())
        })?;
        tracing::debug!(method, message_id = message.message_id, "Telegram API call succeeded");
        Ok(message.message_id)
    }
}
