use crossbeam_channel::Sender;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

use crate::{
    alerts::AlertDispatcher,
    events::{strip_html, ClientEvent},
    protocol::{parse_push_frame, PushFrame},
    timers::{SharedRegistry, Timer},
};

/// The subscription context a session is bound to. Changing the active
/// character means closing the session and opening a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelContext {
    pub character_id: String,
    pub group_ids: Vec<String>,
}

struct ChannelSession {
    context: ChannelContext,
    handle: JoinHandle<()>,
}

/// Owns the single persistent duplex connection to the platform. There is
/// deliberately no reconnect/backoff: a dropped session stays down until the
/// next explicit `open`, matching the platform's original client. Frames a
/// superseded session was mid-processing die with its task.
pub struct PushChannel {
    endpoint_base: String,
    registry: SharedRegistry,
    alerts: AlertDispatcher,
    events: Sender<ClientEvent>,
    session: Option<ChannelSession>,
}

impl PushChannel {
    pub fn new(
        endpoint_base: String,
        registry: SharedRegistry,
        alerts: AlertDispatcher,
        events: Sender<ClientEvent>,
    ) -> Self {
        Self {
            endpoint_base: endpoint_base.trim_end_matches('/').to_owned(),
            registry,
            alerts,
            events,
            session: None,
        }
    }

    pub fn open(&mut self, context: ChannelContext) {
        self.close();
        let url = format!("{}/push/{}", self.endpoint_base, context.character_id);
        let handle = tokio::spawn(run_push_session(
            url,
            context.clone(),
            self.registry.clone(),
            self.alerts.clone(),
            self.events.clone(),
        ));
        self.session = Some(ChannelSession { context, handle });
    }

    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.handle.abort();
            info!(character_id = %session.context.character_id, "push channel closed");
        }
    }

    pub fn context(&self) -> Option<&ChannelContext> {
        self.session.as_ref().map(|session| &session.context)
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_push_session(
    url: String,
    context: ChannelContext,
    registry: SharedRegistry,
    alerts: AlertDispatcher,
    events: Sender<ClientEvent>,
) {
    match connect_async(&url).await {
        Ok((mut socket, _response)) => {
            info!(character_id = %context.character_id, "push channel connected");
            while let Some(next) = socket.next().await {
                let text = match next {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        warn!(?err, "push channel read error");
                        break;
                    }
                };
                handle_frame(&text, &context, &registry, &alerts, &events).await;
            }
            warn!(character_id = %context.character_id, "push channel session ended");
        }
        Err(err) => {
            warn!(?err, url = %url, "failed connecting push channel");
        }
    }
    let _ = events.send(ClientEvent::ChannelClosed {
        character_id: context.character_id.clone(),
    });
}

/// Classifies one inbound frame. A frame that fails to parse is dropped with
/// a warning; it must never tear the session down.
async fn handle_frame(
    text: &str,
    context: &ChannelContext,
    registry: &SharedRegistry,
    alerts: &AlertDispatcher,
    events: &Sender<ClientEvent>,
) {
    let frame = match parse_push_frame(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(?err, payload = %text, "dropped unrecognized push frame");
            return;
        }
    };

    match frame {
        PushFrame::TimerSync(payload) => {
            registry.lock().await.upsert(Timer::from(payload));
        }
        PushFrame::Notification(notice) => {
            if !notice.matches_audience(&context.character_id, &context.group_ids) {
                return;
            }
            let plain = strip_html(&notice.body);
            let _ = events.send(ClientEvent::Popup {
                title: notice.title.clone(),
                body: plain.clone(),
                sender: notice.sender.clone(),
            });
            alerts.dispatch_text(&notice.title, &plain);
            let _ = events.send(ClientEvent::InboxInvalidated);
            let _ = events.send(ClientEvent::SnapshotInvalidated);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::PathBuf,
        sync::{Arc, Mutex as StdMutex},
    };

    use tokio::sync::Mutex;

    use super::{handle_frame, ChannelContext};
    use crate::{
        alerts::{AlertDispatcher, NotificationPermission},
        audio::{AudioCue, CueRequest},
        events::ClientEvent,
        timers::TimerRegistry,
    };

    #[derive(Default)]
    struct RecordingCue {
        requests: StdMutex<Vec<CueRequest>>,
    }

    impl AudioCue for RecordingCue {
        fn play(&self, request: CueRequest) {
            self.requests
                .lock()
                .expect("cue lock should not be poisoned")
                .push(request);
        }
    }

    struct Harness {
        context: ChannelContext,
        registry: Arc<Mutex<TimerRegistry>>,
        alerts: AlertDispatcher,
        cue: Arc<RecordingCue>,
        events_tx: crossbeam_channel::Sender<ClientEvent>,
        events_rx: crossbeam_channel::Receiver<ClientEvent>,
    }

    fn harness() -> Harness {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let cue = Arc::new(RecordingCue::default());
        let alerts = AlertDispatcher::new(
            cue.clone(),
            events_tx.clone(),
            NotificationPermission::Granted,
            PathBuf::from("assets/alert.ogg"),
            1.0,
        );
        Harness {
            context: ChannelContext {
                character_id: "char-7".to_owned(),
                group_ids: vec!["coven-3".to_owned()],
            },
            registry: Arc::new(Mutex::new(TimerRegistry::new())),
            alerts,
            cue,
            events_tx,
            events_rx,
        }
    }

    impl Harness {
        async fn feed(&self, text: &str) {
            handle_frame(
                text,
                &self.context,
                &self.registry,
                &self.alerts,
                &self.events_tx,
            )
            .await;
        }
    }

    #[tokio::test]
    async fn timer_sync_frames_upsert_with_last_write_wins() {
        let harness = harness();
        harness
            .feed(
                r#"{"action":"TIMER_SYNC","payload":{
                    "nome":"Ritual","data_fine":"2026-08-06T12:00:10Z"}}"#,
            )
            .await;
        harness
            .feed(
                r#"{"action":"TIMER_SYNC","payload":{
                    "nome":"Ritual","data_fine":"2026-08-06T12:00:20Z"}}"#,
            )
            .await;

        let registry = harness.registry.lock().await;
        assert_eq!(registry.len(), 1);
        let end = registry.get("Ritual").map(|timer| timer.end_time);
        assert_eq!(
            end.map(|t| t.to_rfc3339()),
            Some("2026-08-06T12:00:20+00:00".to_owned())
        );
    }

    #[tokio::test]
    async fn malformed_frames_are_swallowed() {
        let harness = harness();
        harness.feed("{ not even json").await;
        harness.feed(r#"{"hello":"world"}"#).await;

        assert!(harness.registry.lock().await.is_empty());
        assert!(harness.events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn notification_for_another_character_is_ignored() {
        let harness = harness();
        harness
            .feed(
                r#"{"type":"notification","payload":{
                    "tipo":"INDV","destinatario_id":"char-8",
                    "titolo":"Summons","testo":"not for you"}}"#,
            )
            .await;

        assert!(harness.events_rx.try_recv().is_err());
        assert!(harness
            .cue
            .requests
            .lock()
            .expect("cue lock should not be poisoned")
            .is_empty());
    }

    #[tokio::test]
    async fn matching_notification_surfaces_popup_and_invalidations() {
        let harness = harness();
        harness
            .feed(
                r#"{"type":"notification","payload":{
                    "tipo":"GROUP","destinatario_id":"coven-3",
                    "titolo":"Muster","testo":"<b>Gather</b> at the&nbsp;gate",
                    "mittente":"Warden"}}"#,
            )
            .await;

        match harness.events_rx.try_recv() {
            Ok(ClientEvent::Popup {
                title,
                body,
                sender,
            }) => {
                assert_eq!(title, "Muster");
                assert_eq!(body, "Gather at the gate");
                assert_eq!(sender, "Warden");
            }
            other => panic!("expected popup first, got {other:?}"),
        }
        match harness.events_rx.try_recv() {
            Ok(ClientEvent::SystemNotice { .. }) => {}
            other => panic!("expected system notice, got {other:?}"),
        }
        assert_eq!(
            harness.events_rx.try_recv(),
            Ok(ClientEvent::InboxInvalidated)
        );
        assert_eq!(
            harness.events_rx.try_recv(),
            Ok(ClientEvent::SnapshotInvalidated)
        );
        assert_eq!(
            harness
                .cue
                .requests
                .lock()
                .expect("cue lock should not be poisoned")
                .len(),
            1
        );
    }
}
