use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::TelegramSettings;
use crate::notify::Notifier;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Posts Markdown alerts to a Telegram channel through the Bot API.
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: Option<String>,
    channel_id: String,
    api_url: String,
    warned_missing_token: AtomicBool,
}

impl TelegramNotifier {
    pub fn new(settings: &TelegramSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?;
        let bot_token = settings
            .bot_token
            .as_ref()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Self {
            client,
            bot_token,
            channel_id: settings.channel_id.clone(),
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            warned_missing_token: AtomicBool::new(false),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.bot_token.is_some()
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) {
        let Some(token) = &self.bot_token else {
            if !self.warned_missing_token.swap(true, Ordering::Relaxed) {
                warn!("Telegram bot token not set, skipping notifications");
            }
            return;
        };

        let url = format!("{}/bot{}/sendMessage", self.api_url, token);
        let body = SendMessage {
            chat_id: &self.channel_id,
            text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to send Telegram message: {}", e.without_url());
                return;
            },
        };

        match response.json::<ApiResponse>().await {
            Ok(api) if api.ok => info!("Notification sent to Telegram"),
            Ok(api) => error!(
                "Telegram API error: {}",
                api.description.unwrap_or_else(|| "unknown".to_string())
            ),
            Err(e) => error!("Unreadable Telegram response: {}", e.without_url()),
        }
    }
}
