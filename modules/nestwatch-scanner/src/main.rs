use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nestwatch_common::{Channel, Config, Source};
use nestwatch_scanner::dispatch::{
    ChannelSender, Dispatcher, EmailSender, TelegramSender, WhatsappSender,
};
use nestwatch_scanner::orchestrator::{Orchestrator, PipelineSettings};
use nestwatch_scanner::sources::{FacebookGroupAdapter, SourceAdapter, Yad2Adapter};
use nestwatch_store::PgStore;
use sendgrid_client::SendgridClient;
use telegram_client::TelegramClient;
use twilio_client::TwilioClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("nestwatch=info".parse()?))
        .init();

    info!("Nestwatch scanner starting...");

    let config = Config::from_env();
    config.log_redacted();

    let store = Arc::new(PgStore::connect(&config.database_url).await?);
    store.migrate().await?;

    let mut adapters: HashMap<Source, Arc<dyn SourceAdapter>> = HashMap::new();
    adapters.insert(Source::Yad2, Arc::new(Yad2Adapter::new()?));
    adapters.insert(
        Source::Facebook,
        Arc::new(FacebookGroupAdapter::new(
            config.facebook_session_cookie.clone(),
        )?),
    );
    if config.facebook_session_cookie.is_none() {
        warn!("FACEBOOK_SESSION_COOKIE not set; group scans will report expired auth");
    }

    let mut senders: HashMap<Channel, Arc<dyn ChannelSender>> = HashMap::new();
    senders.insert(
        Channel::Telegram,
        Arc::new(TelegramSender::new(TelegramClient::new(
            config.telegram_bot_token.clone(),
        ))),
    );
    match (&config.twilio_account_sid, &config.twilio_auth_token) {
        (Some(sid), Some(token)) => {
            senders.insert(
                Channel::Whatsapp,
                Arc::new(WhatsappSender::new(
                    TwilioClient::new(sid.clone(), token.clone()),
                    config.twilio_whatsapp_from.clone(),
                )),
            );
        }
        _ => warn!("Twilio credentials not set, WhatsApp channel disabled"),
    }
    match &config.sendgrid_api_key {
        Some(key) => {
            senders.insert(
                Channel::Email,
                Arc::new(EmailSender::new(
                    SendgridClient::new(key.clone()),
                    config.sendgrid_from.clone(),
                )),
            );
        }
        None => warn!("SENDGRID_API_KEY not set, email channel disabled"),
    }

    let dispatcher = Arc::new(Dispatcher::new(senders, store.clone()));

    let orchestrator = Orchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        adapters,
        dispatcher,
        PipelineSettings::from_config(&config),
    )
    .with_run_pool(store.pool().clone());

    orchestrator.run().await
}
