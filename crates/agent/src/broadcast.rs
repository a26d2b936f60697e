use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use farmhand_core::config::NotifierConfig;
use farmhand_core::domain::session::FarmId;
use farmhand_db::repositories::{RepositoryError, SessionRepository};

use crate::notify::Notifier;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub recipients: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Sends one text to every ready session, in fixed-size batches with a pause between
/// batches so the messaging gateway is not flooded.
pub struct ReminderBroadcaster {
    sessions: Arc<dyn SessionRepository>,
    notifier: Arc<dyn Notifier>,
    batch_size: usize,
    delay: Duration,
}

impl ReminderBroadcaster {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        notifier: Arc<dyn Notifier>,
        batch_size: usize,
        delay: Duration,
    ) -> Self {
        Self { sessions, notifier, batch_size: batch_size.max(1), delay }
    }

    pub fn from_config(
        sessions: Arc<dyn SessionRepository>,
        notifier: Arc<dyn Notifier>,
        config: &NotifierConfig,
    ) -> Self {
        Self::new(
            sessions,
            notifier,
            config.broadcast_batch_size,
            Duration::from_millis(config.broadcast_delay_ms),
        )
    }

    pub async fn broadcast(
        &self,
        farm_id: Option<&FarmId>,
        body: &str,
    ) -> Result<BroadcastReport, RepositoryError> {
        let recipients = self.sessions.list_ready(farm_id).await?;
        let mut report = BroadcastReport { recipients: recipients.len(), ..Default::default() };

        for (index, chunk) in recipients.chunks(self.batch_size).enumerate() {
            if index > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            for session in chunk {
                match self.notifier.send_text(&session.sender_key, body).await {
                    Ok(()) => report.sent += 1,
                    Err(error) => {
                        warn!(
                            event_name = "broadcast.send_failed",
                            sender_key = %session.sender_key,
                            error = %error,
                            "reminder not delivered"
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            event_name = "broadcast.completed",
            farm_id = farm_id.map(|farm| farm.0.as_str()).unwrap_or("*"),
            recipients = report.recipients,
            sent = report.sent,
            failed = report.failed,
            "reminder broadcast completed"
        );
        Ok(report)
    }
}
