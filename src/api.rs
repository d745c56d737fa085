use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::{inbox::InboxMessage, protocol::TimerSyncPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquirableKind {
    Skills,
    Infusions,
    Weavings,
    Rites,
}

impl AcquirableKind {
    pub const ALL: [AcquirableKind; 4] = [
        AcquirableKind::Skills,
        AcquirableKind::Infusions,
        AcquirableKind::Weavings,
        AcquirableKind::Rites,
    ];

    pub fn path_segment(self) -> &'static str {
        match self {
            AcquirableKind::Skills => "skills",
            AcquirableKind::Infusions => "infusions",
            AcquirableKind::Weavings => "weavings",
            AcquirableKind::Rites => "rites",
        }
    }
}

/// The platform's REST surface, as far as this core consumes it. The trait
/// exists so the stateful pieces (inbox guard, refresh coordinator) can be
/// exercised against scripted fakes; no call here retries on its own.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn fetch_active_timers(&self, character_id: &str) -> Result<Vec<TimerSyncPayload>>;
    async fn fetch_inbox(&self, character_id: &str) -> Result<Vec<InboxMessage>>;
    async fn toggle_message_read(&self, message_id: i64) -> Result<()>;
    async fn delete_message(&self, message_id: i64) -> Result<()>;
    async fn fetch_character_detail(&self, character_id: &str) -> Result<Value>;
    async fn fetch_acquirable(&self, character_id: &str, kind: AcquirableKind) -> Result<Value>;
    async fn save_push_subscription(&self, character_id: &str, subscription: &Value)
        -> Result<()>;
}

pub struct HttpPlatformApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPlatformApi {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed building http client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
        })
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}/{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("request to {url} was rejected"))?;
        response
            .json::<Value>()
            .await
            .with_context(|| format!("invalid json from {url}"))
    }
}

#[async_trait]
impl PlatformApi for HttpPlatformApi {
    async fn fetch_active_timers(&self, character_id: &str) -> Result<Vec<TimerSyncPayload>> {
        let raw = self
            .get_json(&format!("characters/{character_id}/timers"))
            .await?;
        serde_json::from_value(raw).context("active timer list did not match expected shape")
    }

    async fn fetch_inbox(&self, character_id: &str) -> Result<Vec<InboxMessage>> {
        let raw = self
            .get_json(&format!("characters/{character_id}/messages"))
            .await?;
        serde_json::from_value(raw).context("inbox listing did not match expected shape")
    }

    async fn toggle_message_read(&self, message_id: i64) -> Result<()> {
        let url = format!("{}/messages/{message_id}/toggle-read", self.base_url);
        self.client
            .post(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("toggle of message {message_id} was rejected"))?;
        Ok(())
    }

    async fn delete_message(&self, message_id: i64) -> Result<()> {
        let url = format!("{}/messages/{message_id}", self.base_url);
        self.client
            .delete(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("delete of message {message_id} was rejected"))?;
        Ok(())
    }

    async fn fetch_character_detail(&self, character_id: &str) -> Result<Value> {
        self.get_json(&format!("characters/{character_id}")).await
    }

    async fn fetch_acquirable(&self, character_id: &str, kind: AcquirableKind) -> Result<Value> {
        self.get_json(&format!(
            "characters/{character_id}/acquirable/{}",
            kind.path_segment()
        ))
        .await
    }

    async fn save_push_subscription(
        &self,
        character_id: &str,
        subscription: &Value,
    ) -> Result<()> {
        let url = format!(
            "{}/characters/{character_id}/push-subscription",
            self.base_url
        );
        self.client
            .post(&url)
            .json(subscription)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .context("push subscription registration was rejected")?;
        Ok(())
    }
}
