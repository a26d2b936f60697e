use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use farmhand_core::config::{NotifierConfig, NotifierKind};
use farmhand_core::domain::message::SenderKey;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChoiceOption {
    pub id: String,
    pub label: String,
}

impl ChoiceOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self { id: id.into(), label: label.into() }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("notifier misconfigured: {0}")]
    Configuration(String),
}

/// Outbound channel to the chat user. Both calls are fire-and-report: a returned error
/// means the message was not delivered.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, recipient: &SenderKey, body: &str) -> Result<(), NotifyError>;

    async fn send_choice(
        &self,
        recipient: &SenderKey,
        body: &str,
        options: &[ChoiceOption; 2],
    ) -> Result<(), NotifyError>;
}

pub fn notifier_from_config(config: &NotifierConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    match config.kind {
        NotifierKind::Log => Ok(Arc::new(LogNotifier)),
        NotifierKind::Webhook => Ok(Arc::new(WebhookNotifier::from_config(config)?)),
    }
}

/// Writes every outbound message to the log. Default for local runs.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_text(&self, recipient: &SenderKey, body: &str) -> Result<(), NotifyError> {
        info!(
            event_name = "notify.text",
            sender_key = %recipient,
            body,
            "outbound text"
        );
        Ok(())
    }

    async fn send_choice(
        &self,
        recipient: &SenderKey,
        body: &str,
        options: &[ChoiceOption; 2],
    ) -> Result<(), NotifyError> {
        info!(
            event_name = "notify.choice",
            sender_key = %recipient,
            body,
            first_option = %options[0].id,
            second_option = %options[1].id,
            "outbound choice"
        );
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WebhookPayload<'a> {
    Text { recipient: &'a str, body: &'a str },
    Choice { recipient: &'a str, body: &'a str, options: &'a [ChoiceOption; 2] },
}

/// Posts messages as JSON to the messaging gateway with a bearer token.
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: String,
    api_token: SecretString,
}

impl WebhookNotifier {
    pub fn new(
        endpoint: impl Into<String>,
        api_token: SecretString,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| NotifyError::Configuration(format!("http client: {error}")))?;
        Ok(Self { client, endpoint: endpoint.into(), api_token })
    }

    pub fn from_config(config: &NotifierConfig) -> Result<Self, NotifyError> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| NotifyError::Configuration("notifier.endpoint is required".into()))?;
        let api_token = config
            .api_token
            .clone()
            .ok_or_else(|| NotifyError::Configuration("notifier.api_token is required".into()))?;
        Self::new(endpoint, api_token, Duration::from_secs(config.timeout_secs))
    }

    async fn post(&self, payload: &WebhookPayload<'_>) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_token.expose_secret())
            .json(payload)
            .send()
            .await
            .map_err(|error| NotifyError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                event_name = "notify.webhook_rejected",
                status = %status,
                "messaging gateway rejected notification"
            );
            return Err(NotifyError::Rejected { status: status.as_u16(), body });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_text(&self, recipient: &SenderKey, body: &str) -> Result<(), NotifyError> {
        self.post(&WebhookPayload::Text { recipient: recipient.as_str(), body }).await
    }

    async fn send_choice(
        &self,
        recipient: &SenderKey,
        body: &str,
        options: &[ChoiceOption; 2],
    ) -> Result<(), NotifyError> {
        self.post(&WebhookPayload::Choice { recipient: recipient.as_str(), body, options }).await
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentNotification {
    Text { recipient: SenderKey, body: String },
    Choice { recipient: SenderKey, body: String, options: [ChoiceOption; 2] },
}

impl SentNotification {
    pub fn recipient(&self) -> &SenderKey {
        match self {
            Self::Text { recipient, .. } | Self::Choice { recipient, .. } => recipient,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            Self::Text { body, .. } | Self::Choice { body, .. } => body,
        }
    }
}

#[derive(Default)]
struct RecordingState {
    sent: Vec<SentNotification>,
    failures_left: usize,
}

/// Keeps every notification in memory. Can be told to fail the next `n` sends.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<SentNotification> {
        self.with_state(|state| state.sent.clone())
    }

    pub fn sent_to(&self, recipient: &SenderKey) -> Vec<SentNotification> {
        self.with_state(|state| {
            state.sent.iter().filter(|sent| sent.recipient() == recipient).cloned().collect()
        })
    }

    pub fn last_body(&self, recipient: &SenderKey) -> Option<String> {
        self.sent_to(recipient).last().map(|sent| sent.body().to_string())
    }

    pub fn fail_next(&self, count: usize) {
        self.with_state(|state| state.failures_left = count);
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut RecordingState) -> T) -> T {
        match self.state.lock() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn record(&self, notification: SentNotification) -> Result<(), NotifyError> {
        self.with_state(|state| {
            if state.failures_left > 0 {
                state.failures_left -= 1;
                return Err(NotifyError::Transport("recording notifier told to fail".into()));
            }
            state.sent.push(notification);
            Ok(())
        })
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_text(&self, recipient: &SenderKey, body: &str) -> Result<(), NotifyError> {
        self.record(SentNotification::Text { recipient: recipient.clone(), body: body.to_string() })
    }

    async fn send_choice(
        &self,
        recipient: &SenderKey,
        body: &str,
        options: &[ChoiceOption; 2],
    ) -> Result<(), NotifyError> {
        self.record(SentNotification::Choice {
            recipient: recipient.clone(),
            body: body.to_string(),
            options: options.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use farmhand_core::config::{NotifierConfig, NotifierKind};
    use farmhand_core::domain::message::SenderKey;

    use super::{notifier_from_config, Notifier, NotifyError, RecordingNotifier, WebhookNotifier};

    fn config(kind: NotifierKind) -> NotifierConfig {
        NotifierConfig {
            kind,
            endpoint: None,
            api_token: None,
            timeout_secs: 5,
            broadcast_batch_size: 20,
            broadcast_delay_ms: 0,
        }
    }

    #[tokio::test]
    async fn recording_notifier_fails_on_request_then_recovers() {
        let notifier = RecordingNotifier::default();
        let sender = SenderKey::new("+5491100000001");
        notifier.fail_next(1);

        assert!(matches!(
            notifier.send_text(&sender, "first").await,
            Err(NotifyError::Transport(_))
        ));
        notifier.send_text(&sender, "second").await.expect("send");

        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(notifier.last_body(&sender).as_deref(), Some("second"));
    }

    #[test]
    fn webhook_notifier_requires_endpoint_and_token() {
        let mut webhook = config(NotifierKind::Webhook);
        assert!(matches!(
            WebhookNotifier::from_config(&webhook),
            Err(NotifyError::Configuration(_))
        ));

        webhook.endpoint = Some("https://gateway.example.com/messages".to_string());
        webhook.api_token = Some(SecretString::from("token-123".to_string()));
        assert!(WebhookNotifier::from_config(&webhook).is_ok());
    }

    #[test]
    fn log_notifier_is_the_default_kind() {
        assert!(notifier_from_config(&config(NotifierKind::Log)).is_ok());
    }
}
