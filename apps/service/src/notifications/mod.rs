//! Notification gateway.
//!
//! Looks up a user's Slack preferences and delivers a message when the rule
//! that fired is enabled. Automatic notifications never fail the caller;
//! user-triggered test notifications report every problem.

pub mod messages;
pub mod slack;

pub use slack::{DeliveryError, SlackMessage, SlackWebhookTransport, Transport};

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::database::Repository;
use crate::database::models::NotificationSettings;

/// Which event a notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationRule {
    MonitorDown,
    MonitorUp,
    IncidentCreated,
    IncidentResolved,
}

impl NotificationRule {
    pub fn is_enabled(self, settings: &NotificationSettings) -> bool {
        match self {
            NotificationRule::MonitorDown => settings.on_monitor_down,
            NotificationRule::MonitorUp => settings.on_monitor_up,
            NotificationRule::IncidentCreated => settings.on_incident_created,
            NotificationRule::IncidentResolved => settings.on_incident_resolved,
        }
    }
}

/// What happened to an automatic notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    /// No settings, Slack disabled, or the rule is off
    Suppressed,
    /// Lookup or delivery failed; logged and swallowed
    Failed(String),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Slack notifications are disabled")]
    Disabled,
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub struct Notifier {
    repository: Arc<dyn Repository>,
    transport: Arc<dyn Transport>,
}

impl Notifier {
    pub fn new(repository: Arc<dyn Repository>, transport: Arc<dyn Transport>) -> Self {
        Self { repository, transport }
    }

    /// Deliver an automatic notification if the user's settings allow it.
    ///
    /// The message is only built when it will be sent.
    pub async fn notify(
        &self,
        user_id: &str,
        rule: NotificationRule,
        build_message: impl FnOnce() -> String + Send,
    ) -> NotifyOutcome {
        let settings = match self.repository.notification_settings(user_id).await {
            Ok(Some(settings)) => settings,
            Ok(None) => return NotifyOutcome::Suppressed,
            Err(e) => {
                warn!("Could not load notification settings for user {}: {:#}", user_id, e);
                return NotifyOutcome::Failed(e.to_string());
            }
        };

        if !settings.slack_enabled || !rule.is_enabled(&settings) {
            debug!("Notification {:?} suppressed for user {}", rule, user_id);
            return NotifyOutcome::Suppressed;
        }

        let message = SlackMessage { text: build_message(), channel: settings.slack_channel.clone() };
        let webhook = settings.slack_webhook_url.as_deref().unwrap_or_default();

        match self.transport.deliver(webhook, &message).await {
            Ok(()) => {
                info!("Sent {:?} notification to user {}", rule, user_id);
                NotifyOutcome::Sent
            }
            Err(e) => {
                warn!("Failed to deliver {:?} notification to user {}: {}", rule, user_id, e);
                NotifyOutcome::Failed(e.to_string())
            }
        }
    }

    /// Send a user-triggered test message, surfacing every failure
    pub async fn send_test(&self, user_id: &str, message: Option<&str>) -> Result<(), NotifyError> {
        let settings = self.repository.notification_settings(user_id).await?;
        let Some(settings) = settings.filter(|s| s.slack_enabled) else {
            return Err(NotifyError::Disabled);
        };

        let webhook = settings.slack_webhook_url.as_deref().unwrap_or_default();
        let message = SlackMessage {
            text: message.unwrap_or(messages::TEST_MESSAGE).to_string(),
            channel: settings.slack_channel.clone(),
        };

        self.transport.deliver(webhook, &message).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Records deliveries; optionally fails them all
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<(String, SlackMessage)>>,
        pub fail: bool,
    }

    impl RecordingTransport {
        pub fn failing() -> Self {
            Self { sent: Mutex::default(), fail: true }
        }

        pub async fn texts(&self) -> Vec<String> {
            self.sent.lock().await.iter().map(|(_, m)| m.text.clone()).collect()
        }
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        async fn deliver(&self, webhook_url: &str, message: &SlackMessage) -> Result<(), DeliveryError> {
            if webhook_url.is_empty() {
                return Err(DeliveryError::MissingWebhook);
            }
            if self.fail {
                return Err(DeliveryError::Rejected { status: 500, body: "boom".into() });
            }
            self.sent.lock().await.push((webhook_url.to_string(), message.clone()));
            Ok(())
        }
    }

    pub fn enabled_settings(user_id: &str) -> NotificationSettings {
        NotificationSettings {
            slack_enabled: true,
            slack_webhook_url: Some("https://hooks.slack.test/T000/B000".into()),
            slack_channel: Some("#alerts".into()),
            on_monitor_up: true,
            ..NotificationSettings::defaults_for(user_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{RecordingTransport, enabled_settings};
    use super::*;
    use crate::database::InMemoryRepository;

    async fn notifier_with(
        settings: Option<NotificationSettings>,
        transport: Arc<RecordingTransport>,
    ) -> Notifier {
        let repo = Arc::new(InMemoryRepository::new());
        if let Some(settings) = settings {
            repo.save_notification_settings(&settings).await.unwrap();
        }
        Notifier::new(repo, transport)
    }

    #[tokio::test]
    async fn test_notify_sends_when_rule_enabled() {
        let transport = Arc::new(RecordingTransport::default());
        let notifier = notifier_with(Some(enabled_settings("u1")), transport.clone()).await;

        let outcome = notifier
            .notify("u1", NotificationRule::MonitorDown, || messages::monitor_down("API", "https://x.test"))
            .await;

        assert_eq!(outcome, NotifyOutcome::Sent);
        let sent = transport.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "https://hooks.slack.test/T000/B000");
        assert_eq!(sent[0].1.channel.as_deref(), Some("#alerts"));
        assert_eq!(sent[0].1.text, ":rotating_light: API is DOWN\nURL: https://x.test");
    }

    #[tokio::test]
    async fn test_notify_suppressed_without_settings_or_rule() {
        let transport = Arc::new(RecordingTransport::default());
        let notifier = notifier_with(None, transport.clone()).await;
        assert_eq!(
            notifier.notify("u1", NotificationRule::MonitorDown, || unreachable!()).await,
            NotifyOutcome::Suppressed
        );

        let settings = NotificationSettings { on_monitor_up: false, ..enabled_settings("u2") };
        let notifier = notifier_with(Some(settings), transport.clone()).await;
        assert_eq!(
            notifier.notify("u2", NotificationRule::MonitorUp, || unreachable!()).await,
            NotifyOutcome::Suppressed
        );

        let settings = NotificationSettings { slack_enabled: false, ..enabled_settings("u3") };
        let notifier = notifier_with(Some(settings), transport.clone()).await;
        assert_eq!(
            notifier.notify("u3", NotificationRule::MonitorDown, || unreachable!()).await,
            NotifyOutcome::Suppressed
        );

        assert!(transport.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_notify_swallows_delivery_failure() {
        let transport = Arc::new(RecordingTransport::failing());
        let notifier = notifier_with(Some(enabled_settings("u1")), transport).await;

        let outcome = notifier.notify("u1", NotificationRule::MonitorDown, || "down".into()).await;
        assert!(matches!(outcome, NotifyOutcome::Failed(msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_send_test_surfaces_failures() {
        let transport = Arc::new(RecordingTransport::failing());
        let notifier = notifier_with(Some(enabled_settings("u1")), transport).await;
        assert!(matches!(
            notifier.send_test("u1", None).await,
            Err(NotifyError::Delivery(DeliveryError::Rejected { status: 500, .. }))
        ));

        let notifier = notifier_with(None, Arc::new(RecordingTransport::default())).await;
        assert!(matches!(notifier.send_test("u1", None).await, Err(NotifyError::Disabled)));

        let settings = NotificationSettings { slack_webhook_url: None, ..enabled_settings("u1") };
        let notifier = notifier_with(Some(settings), Arc::new(RecordingTransport::default())).await;
        assert!(matches!(
            notifier.send_test("u1", None).await,
            Err(NotifyError::Delivery(DeliveryError::MissingWebhook))
        ));
    }

    #[tokio::test]
    async fn test_send_test_uses_default_text() {
        let transport = Arc::new(RecordingTransport::default());
        let notifier = notifier_with(Some(enabled_settings("u1")), transport.clone()).await;

        notifier.send_test("u1", None).await.unwrap();
        notifier.send_test("u1", Some("hello")).await.unwrap();

        assert_eq!(transport.texts().await, vec![messages::TEST_MESSAGE.to_string(), "hello".to_string()]);
    }
}
