//! Outbound notification channels
//!
//! One webhook call per configured channel per notice-enabled match. Every
//! channel gets a single attempt; failures are logged by the dispatcher and
//! never fail the capture.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::NoticeConfig;
use crate::error::{AppError, AppResult};
use crate::models::interaction::Interaction;

/// What a notification carries, regardless of channel.
#[derive(Debug, Clone)]
pub struct NoticeEvent {
    pub protocol: String,
    pub rule_name: String,
    pub remote_addr: String,
    pub flag: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl NoticeEvent {
    pub fn from_interaction(interaction: &Interaction) -> Self {
        Self {
            protocol: interaction.protocol.clone(),
            rule_name: interaction.rule_name.clone().unwrap_or_default(),
            remote_addr: interaction.remote_addr.clone(),
            flag: interaction.flag.clone(),
            captured_at: interaction.captured_at,
        }
    }

    fn render_text(&self) -> String {
        format!(
            "Lurecast captured a callback\nprotocol: {}\nrule: {}\nremote: {}\nflag: {}\ntime: {}",
            self.protocol,
            self.rule_name,
            self.remote_addr,
            self.flag.as_deref().unwrap_or("-"),
            self.captured_at.to_rfc3339(),
        )
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;
    async fn notify(&self, event: &NoticeEvent) -> AppResult<()>;
}

async fn post_json(
    client: &reqwest::Client,
    channel: &'static str,
    url: &str,
    body: serde_json::Value,
) -> AppResult<()> {
    client
        .post(url)
        .json(&body)
        .send()
        .await
        .map_err(|e| AppError::Notification(format!("{channel}: {e}")))?
        .error_for_status()
        .map_err(|e| AppError::Notification(format!("{channel}: {e}")))?;
    Ok(())
}

pub struct SlackNotifier {
    url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(url: String, client: reqwest::Client) -> Self {
        Self { url, client }
    }

    fn payload(&self, event: &NoticeEvent) -> serde_json::Value {
        serde_json::json!({ "text": event.render_text() })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn channel(&self) -> &'static str {
        "slack"
    }

    async fn notify(&self, event: &NoticeEvent) -> AppResult<()> {
        post_json(&self.client, self.channel(), &self.url, self.payload(event)).await
    }
}

pub struct DingTalkNotifier {
    url: String,
    client: reqwest::Client,
}

impl DingTalkNotifier {
    pub fn new(url: String, client: reqwest::Client) -> Self {
        Self { url, client }
    }

    fn payload(&self, event: &NoticeEvent) -> serde_json::Value {
        serde_json::json!({
            "msgtype": "markdown",
            "markdown": {
                "title": format!("Lurecast: {} callback", event.protocol),
                "text": event.render_text(),
            }
        })
    }
}

#[async_trait]
impl Notifier for DingTalkNotifier {
    fn channel(&self) -> &'static str {
        "dingtalk"
    }

    async fn notify(&self, event: &NoticeEvent) -> AppResult<()> {
        post_json(&self.client, self.channel(), &self.url, self.payload(event)).await
    }
}

pub struct LarkNotifier {
    url: String,
    client: reqwest::Client,
}

impl LarkNotifier {
    pub fn new(url: String, client: reqwest::Client) -> Self {
        Self { url, client }
    }

    fn payload(&self, event: &NoticeEvent) -> serde_json::Value {
        serde_json::json!({
            "msg_type": "text",
            "content": { "text": event.render_text() }
        })
    }
}

#[async_trait]
impl Notifier for LarkNotifier {
    fn channel(&self) -> &'static str {
        "lark"
    }

    async fn notify(&self, event: &NoticeEvent) -> AppResult<()> {
        post_json(&self.client, self.channel(), &self.url, self.payload(event)).await
    }
}

pub struct WecomNotifier {
    url: String,
    client: reqwest::Client,
}

impl WecomNotifier {
    pub fn new(url: String, client: reqwest::Client) -> Self {
        Self { url, client }
    }

    fn payload(&self, event: &NoticeEvent) -> serde_json::Value {
        serde_json::json!({
            "msgtype": "markdown",
            "markdown": { "content": event.render_text() }
        })
    }
}

#[async_trait]
impl Notifier for WecomNotifier {
    fn channel(&self) -> &'static str {
        "wecom"
    }

    async fn notify(&self, event: &NoticeEvent) -> AppResult<()> {
        post_json(&self.client, self.channel(), &self.url, self.payload(event)).await
    }
}

/// Build the configured channel set; empty URLs disable a channel.
pub fn build_notifiers(config: &NoticeConfig) -> Vec<Arc<dyn Notifier>> {
    let client = reqwest::Client::new();
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();

    if !config.slack.is_empty() {
        notifiers.push(Arc::new(SlackNotifier::new(config.slack.clone(), client.clone())));
    }
    if !config.dingtalk.is_empty() {
        notifiers.push(Arc::new(DingTalkNotifier::new(
            config.dingtalk.clone(),
            client.clone(),
        )));
    }
    if !config.lark.is_empty() {
        notifiers.push(Arc::new(LarkNotifier::new(config.lark.clone(), client.clone())));
    }
    if !config.wecom.is_empty() {
        notifiers.push(Arc::new(WecomNotifier::new(config.wecom.clone(), client)));
    }

    notifiers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> NoticeEvent {
        NoticeEvent {
            protocol: "ftp".to_string(),
            rule_name: "probe-1".to_string(),
            remote_addr: "203.0.113.9:52144".to_string(),
            flag: Some("abc123".to_string()),
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn rendered_text_carries_all_fields() {
        let text = event().render_text();
        assert!(text.contains("ftp"));
        assert!(text.contains("probe-1"));
        assert!(text.contains("203.0.113.9:52144"));
        assert!(text.contains("abc123"));
    }

    #[test]
    fn payload_shapes_per_channel() {
        let client = reqwest::Client::new();
        let e = event();

        let slack = SlackNotifier::new("u".to_string(), client.clone()).payload(&e);
        assert!(slack["text"].as_str().unwrap().contains("probe-1"));

        let dingtalk = DingTalkNotifier::new("u".to_string(), client.clone()).payload(&e);
        assert_eq!(dingtalk["msgtype"], "markdown");

        let lark = LarkNotifier::new("u".to_string(), client.clone()).payload(&e);
        assert_eq!(lark["msg_type"], "text");

        let wecom = WecomNotifier::new("u".to_string(), client).payload(&e);
        assert_eq!(wecom["msgtype"], "markdown");
    }

    #[test]
    fn empty_config_builds_no_notifiers() {
        assert!(build_notifiers(&NoticeConfig::default()).is_empty());
    }
}
