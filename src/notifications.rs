use std::fmt;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SlackConfig;
use crate::error::BoardError;
use crate::models::Review;

/// Outcome class of a user-facing notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Failure,
}

/// A single human-readable message for the person using the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Failure,
            message: message.into(),
        }
    }

    pub fn thanks() -> Self {
        Self::success("Thank you for your review!")
    }

    pub fn from_error(err: &BoardError) -> Self {
        Self::failure(err.user_message())
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Delivers notices to the console and, when configured, to Slack
pub struct NotificationService {
    client: Client,
    slack: Option<SlackNotifier>,
    on_new_review: bool,
    on_failure: bool,
}

impl NotificationService {
    pub fn new(slack_config: &SlackConfig) -> Self {
        let slack = if slack_config.enabled {
            slack_config
                .webhook_url
                .as_ref()
                .map(|url| SlackNotifier::new(url.clone(), slack_config.channel.clone()))
        } else {
            None
        };

        Self {
            client: Client::new(),
            slack,
            on_new_review: slack_config.on_new_review,
            on_failure: slack_config.on_failure,
        }
    }

    /// Show a notice. Failures are also forwarded to Slack when enabled.
    ///
    /// Delivery problems on the webhook are logged, never surfaced: the
    /// notice has already been shown locally.
    pub async fn notify(&self, notice: &Notice) {
        match notice.kind {
            NoticeKind::Success => println!("{}", notice),
            NoticeKind::Failure => eprintln!("{}", notice),
        }

        if notice.kind != NoticeKind::Failure || !self.on_failure {
            return;
        }

        if let Some(ref slack) = self.slack {
            let text = format!(":warning: Review board: {}", notice.message);
            if let Err(e) = slack.send(&self.client, SlackMessage::plain(slack, text)).await {
                warn!(error = %e, "Could not forward failure notice");
            }
        }
    }

    /// Announce a freshly stored review on Slack
    pub async fn notify_new_review(&self, review: &Review) -> Result<()> {
        if !self.on_new_review {
            return Ok(());
        }

        if let Some(ref slack) = self.slack {
            slack.notify_new_review(&self.client, review).await?;
        }

        Ok(())
    }
}

/// Slack webhook notifier
struct SlackNotifier {
    webhook_url: String,
    channel: Option<String>,
}

#[derive(Serialize)]
struct SlackMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocks: Option<Vec<SlackBlock>>,
}

#[derive(Serialize)]
struct SlackBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: SlackText,
}

#[derive(Serialize)]
struct SlackText {
    #[serde(rename = "type")]
    text_type: String,
    text: String,
}

impl SlackMessage {
    fn plain(notifier: &SlackNotifier, text: String) -> Self {
        Self {
            channel: notifier.channel.clone(),
            text,
            blocks: None,
        }
    }
}

impl SlackBlock {
    fn section(text: String) -> Self {
        Self {
            block_type: "section".to_string(),
            text: SlackText {
                text_type: "mrkdwn".to_string(),
                text,
            },
        }
    }
}

impl SlackNotifier {
    fn new(webhook_url: String, channel: Option<String>) -> Self {
        Self {
            webhook_url,
            channel,
        }
    }

    async fn send(&self, client: &Client, message: SlackMessage) -> Result<()> {
        debug!("Sending Slack notification");

        let response = client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await
            .context("Failed to send Slack notification")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Slack notification failed");
            anyhow::bail!("Slack webhook returned error: {} - {}", status, body);
        }

        info!("Slack notification sent");
        Ok(())
    }

    async fn notify_new_review(&self, client: &Client, review: &Review) -> Result<()> {
        let text = format!("New review ({}/100)", review.rating);

        let message = SlackMessage {
            channel: self.channel.clone(),
            text: text.clone(),
            blocks: Some(vec![
                SlackBlock::section(format!("*{}*", text)),
                SlackBlock::section(format!("> {}", review.text)),
            ]),
        };

        self.send(client, message).await
    }
}
