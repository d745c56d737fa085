use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Timer fields as the platform pushes them. The same shape comes back from
/// the REST endpoint that lists a character's active countdowns.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimerSyncPayload {
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "data_fine")]
    pub ends_at: DateTime<Utc>,
    #[serde(rename = "alert_suono", default)]
    pub alert_sound: bool,
    #[serde(rename = "notifica_push", default)]
    pub notify_system: bool,
    #[serde(rename = "messaggio_in_app", default)]
    pub notify_in_app: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Audience {
    #[serde(rename = "BROAD")]
    Broadcast,
    #[serde(rename = "INDV")]
    Individual,
    #[serde(rename = "GROUP")]
    Group,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NotificationPayload {
    #[serde(rename = "tipo")]
    pub audience: Audience,
    #[serde(rename = "destinatario_id", default)]
    pub recipient_id: Option<String>,
    #[serde(rename = "titolo")]
    pub title: String,
    #[serde(rename = "testo")]
    pub body: String,
    #[serde(rename = "mittente", default)]
    pub sender: String,
}

impl NotificationPayload {
    /// Whether this notification is addressed to the given subscription
    /// context: broadcast, this character directly, or one of its groups.
    pub fn matches_audience(&self, character_id: &str, group_ids: &[String]) -> bool {
        match self.audience {
            Audience::Broadcast => true,
            Audience::Individual => self.recipient_id.as_deref() == Some(character_id),
            Audience::Group => self
                .recipient_id
                .as_deref()
                .map(|id| group_ids.iter().any(|group| group == id))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PushFrame {
    TimerSync(TimerSyncPayload),
    Notification(NotificationPayload),
}

#[derive(Debug, Clone, Deserialize)]
struct TimerSyncEnvelope {
    action: String,
    payload: TimerSyncPayload,
}

#[derive(Debug, Clone, Deserialize)]
struct NotificationEnvelope {
    #[serde(rename = "type")]
    kind: String,
    payload: NotificationPayload,
}

pub fn parse_push_frame(text: &str) -> Result<PushFrame> {
    if let Ok(envelope) = serde_json::from_str::<TimerSyncEnvelope>(text) {
        if envelope.action == "TIMER_SYNC" {
            return Ok(PushFrame::TimerSync(envelope.payload));
        }
    }

    if let Ok(envelope) = serde_json::from_str::<NotificationEnvelope>(text) {
        if envelope.kind == "notification" {
            return Ok(PushFrame::Notification(envelope.payload));
        }
    }

    Err(anyhow!(
        "payload did not match timer sync or notification frame"
    ))
}
