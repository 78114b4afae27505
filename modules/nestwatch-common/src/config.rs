use std::env;

use tracing::info;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Scheduling
    pub scan_interval_secs: u64,
    pub cycle_timeout_secs: u64,
    pub max_concurrent_profiles: usize,
    pub dedup_retention_days: i64,

    // Telegram
    pub telegram_bot_token: String,
    /// Operator chat for high-priority alerts (auth expiry etc.).
    pub operator_chat_id: Option<String>,

    // Twilio (WhatsApp delivery)
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_whatsapp_from: String,

    // SendGrid (email delivery)
    pub sendgrid_api_key: Option<String>,
    pub sendgrid_from: String,

    // Group feed session (opaque cookie string, refreshed out of band)
    pub facebook_session_cookie: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            scan_interval_secs: parsed_env("SCAN_INTERVAL_SECS", 300),
            cycle_timeout_secs: parsed_env("CYCLE_TIMEOUT_SECS", 240),
            max_concurrent_profiles: parsed_env("MAX_CONCURRENT_PROFILES", 3),
            dedup_retention_days: parsed_env("DEDUP_RETENTION_DAYS", 90),
            telegram_bot_token: required_env("TELEGRAM_BOT_TOKEN"),
            operator_chat_id: optional_env("OPERATOR_CHAT_ID"),
            twilio_account_sid: optional_env("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: optional_env("TWILIO_AUTH_TOKEN"),
            twilio_whatsapp_from: env::var("TWILIO_WHATSAPP_FROM")
                .unwrap_or_else(|_| "whatsapp:+14155238886".to_string()),
            sendgrid_api_key: optional_env("SENDGRID_API_KEY"),
            sendgrid_from: env::var("SENDGRID_FROM")
                .unwrap_or_else(|_| "alerts@nestwatch.app".to_string()),
            facebook_session_cookie: optional_env("FACEBOOK_SESSION_COOKIE"),
        }
    }

    /// Log the effective configuration with secrets masked.
    pub fn log_redacted(&self) {
        info!(
            scan_interval_secs = self.scan_interval_secs,
            cycle_timeout_secs = self.cycle_timeout_secs,
            max_concurrent_profiles = self.max_concurrent_profiles,
            dedup_retention_days = self.dedup_retention_days,
            telegram = %redact(&self.telegram_bot_token),
            operator_chat = self.operator_chat_id.is_some(),
            whatsapp = self.twilio_account_sid.is_some(),
            email = self.sendgrid_api_key.is_some(),
            group_session = self.facebook_session_cookie.is_some(),
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number, got {raw:?}")),
        Err(_) => default,
    }
}

fn redact(secret: &str) -> String {
    if secret.len() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", &secret[..4])
    }
}
