use std::fmt;
use std::time::Duration;

use boardwatch_core::error::AppError;
use boardwatch_core::traits::Notifier;
use reqwest::Client;
use url::Url;

const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(15);

/// Messenger send-API settings.
#[derive(Clone)]
pub struct MessengerConfig {
    pub url: String,
    pub access_token: String,
    pub recipient_id: String,
}

impl fmt::Debug for MessengerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessengerConfig")
            .field("url", &self.url)
            .field("access_token", &"<redacted>")
            .field("recipient_id", &self.recipient_id)
            .finish()
    }
}

impl MessengerConfig {
    /// Read configuration from environment variables.
    ///
    /// - `MESSENGER_URL`
    /// - `MESSENGER_ACCESS_TOKEN`
    /// - `MESSENGER_USER_ID`
    ///
    /// Returns `None` (notifications disabled) if any of them is missing or empty.
    pub fn from_env() -> Option<Self> {
        let read = |name: &str| match std::env::var(name) {
            Ok(value) if !value.trim().is_empty() => Some(value),
            _ => {
                tracing::warn!("Environment variable {name} is not set, notifications disabled");
                None
            }
        };

        Some(Self {
            url: read("MESSENGER_URL")?,
            access_token: read("MESSENGER_ACCESS_TOKEN")?,
            recipient_id: read("MESSENGER_USER_ID")?,
        })
    }
}

/// Delivers notifications as text messages through a Messenger-style send API.
///
/// The message, recipient and token travel as query parameters of an
/// otherwise empty POST.
#[derive(Clone)]
pub struct MessengerNotifier {
    client: Client,
    endpoint: Url,
    access_token: String,
    recipient_id: String,
    timeout_secs: u64,
}

impl MessengerNotifier {
    pub fn new(config: &MessengerConfig) -> Result<Self, AppError> {
        Self::with_timeout(config, DEFAULT_NOTIFY_TIMEOUT)
    }

    pub fn with_timeout(config: &MessengerConfig, timeout: Duration) -> Result<Self, AppError> {
        let endpoint = Url::parse(&config.url)
            .map_err(|e| AppError::ConfigError(format!("Invalid MESSENGER_URL: {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            access_token: config.access_token.clone(),
            recipient_id: config.recipient_id.clone(),
            timeout_secs: timeout.as_secs(),
        })
    }

    /// The full send URL for one message.
    fn request_url(&self, message: &str) -> Url {
        let text = serde_json::json!({ "text": message }).to_string();
        let recipient = serde_json::json!({ "id": self.recipient_id }).to_string();

        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("message", &text)
            .append_pair("messaging_type", "RESPONSE")
            .append_pair("recipient", &recipient)
            .append_pair("access_token", &self.access_token);
        url
    }
}

impl Notifier for MessengerNotifier {
    async fn notify(&self, message: &str) -> Result<(), AppError> {
        let response = self
            .client
            .post(self.request_url(message))
            .header(reqwest::header::CONTENT_TYPE, "application/json; charset=UTF-8")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else {
                    AppError::NotificationError(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AppError::NotificationError(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        tracing::debug!(%body, "Notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MessengerConfig {
        MessengerConfig {
            url: "https://graph.example.com/v18.0/me/messages".into(),
            access_token: "secret-token".into(),
            recipient_id: "1234567890".into(),
        }
    }

    #[test]
    fn test_request_url_carries_message_and_recipient() {
        let notifier = MessengerNotifier::new(&config()).unwrap();
        let url = notifier.request_url("New board: Fish 5'8 (300.00 €)\nhttps://x/1");

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };

        let message: serde_json::Value = serde_json::from_str(&get("message")).unwrap();
        assert_eq!(message["text"], "New board: Fish 5'8 (300.00 €)\nhttps://x/1");
        let recipient: serde_json::Value = serde_json::from_str(&get("recipient")).unwrap();
        assert_eq!(recipient["id"], "1234567890");
        assert_eq!(get("messaging_type"), "RESPONSE");
        assert_eq!(get("access_token"), "secret-token");
        assert_eq!(url.path(), "/v18.0/me/messages");
    }

    #[test]
    fn test_invalid_endpoint_is_config_error() {
        let mut cfg = config();
        cfg.url = "graph example".into();
        assert!(matches!(
            MessengerNotifier::new(&cfg),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("1234567890"));
    }
}
