//! Telegram Bot API notifier.

use std::fmt;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, DeliveryError, Result};
use crate::models::{FetchConfig, NotifierConfig};
use crate::services::Notifier;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sends messages through `sendMessage` with HTML parse mode.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    endpoint: Url,
}

impl TelegramNotifier {
    pub fn new(config: &NotifierConfig, fetch: &FetchConfig) -> Result<Self> {
        if config.bot_token.trim().is_empty() {
            return Err(AppError::config("notifier.bot_token is not set"));
        }
        let client = Client::builder()
            .user_agent(&fetch.user_agent)
            .timeout(fetch.timeout())
            .build()?;
        let mut endpoint = Url::parse(&config.api_base)?;
        endpoint
            .path_segments_mut()
            .map_err(|_| AppError::config(format!("notifier.api_base {} cannot be a base", config.api_base)))?
            .pop_if_empty()
            .push(&format!("bot{}", config.bot_token.trim()))
            .push("sendMessage");

        Ok(Self { client, endpoint })
    }
}

// The endpoint path carries the bot token.
impl fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("api_host", &self.endpoint.host_str().unwrap_or_default())
            .field("endpoint", &"/bot<redacted>/sendMessage")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, destination: &str, message: &str) -> std::result::Result<(), DeliveryError> {
        log::debug!("Sending message to {}", destination);

        let body = SendMessage {
            chat_id: destination,
            text: message,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::new(destination, e.without_url()))?;

        let status = response.status();
        let api: Option<ApiResponse> = response.json().await.ok();
        match api {
            Some(ApiResponse { ok: true, .. }) if status.is_success() => Ok(()),
            Some(ApiResponse { description, .. }) => Err(DeliveryError::new(
                destination,
                format!(
                    "HTTP {}: {}",
                    status,
                    description.unwrap_or_else(|| "no description".into())
                ),
            )),
            None => Err(DeliveryError::new(destination, format!("HTTP {status}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_token() {
        let config = NotifierConfig::default();
        assert!(matches!(
            TelegramNotifier::new(&config, &FetchConfig::default()),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_endpoint() {
        let config = NotifierConfig {
            bot_token: "123:abc".into(),
            ..NotifierConfig::default()
        };
        let notifier = TelegramNotifier::new(&config, &FetchConfig::default()).unwrap();
        assert_eq!(
            notifier.endpoint.as_str(),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = NotifierConfig {
            bot_token: "123456:SECRETtoken".into(),
            ..NotifierConfig::default()
        };
        let notifier = TelegramNotifier::new(&config, &FetchConfig::default()).unwrap();
        let debug = format!("{:?}", notifier);
        assert!(!debug.contains("SECRETtoken"));
        assert!(!debug.contains("123456"));
        assert!(debug.contains("api.telegram.org"));
    }
}
