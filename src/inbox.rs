use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{api::PlatformApi, events::ClientEvent};

/// Pause before the authoritative re-fetch after a successful toggle, giving
/// the backing store time to become consistent.
pub const TOGGLE_SETTLE_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboxMessage {
    pub id: i64,
    #[serde(rename = "letto")]
    pub read: bool,
    #[serde(rename = "data_invio")]
    pub sent_at: DateTime<Utc>,
    #[serde(rename = "testo")]
    pub body: String,
    #[serde(rename = "mittente", default)]
    pub sender: String,
}

/// Whole-object copy handed to readers; never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct InboxSnapshot {
    pub messages: Arc<[InboxMessage]>,
    pub unread: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TogglePhase {
    /// Local flag flipped, remote call in flight.
    Optimistic,
    /// Remote call settled, authoritative re-fetch pending.
    Reconciling,
}

#[derive(Debug, Default)]
struct InboxState {
    messages: Vec<InboxMessage>,
    unread: usize,
    pending: HashMap<i64, TogglePhase>,
}

/// Holds the inbox for one character and serializes read-state toggles.
/// Membership in the pending map is taken synchronously with the optimistic
/// flip, so at most one toggle per message id is ever in flight; overlapping
/// calls for the same id are dropped, not queued.
pub struct InboxGuard {
    api: Arc<dyn PlatformApi>,
    character_id: String,
    state: Mutex<InboxState>,
    snapshot_tx: watch::Sender<InboxSnapshot>,
    events: Sender<ClientEvent>,
}

impl InboxGuard {
    pub fn new(api: Arc<dyn PlatformApi>, character_id: String, events: Sender<ClientEvent>) -> Self {
        let (snapshot_tx, _snapshot_rx) = watch::channel(InboxSnapshot::default());
        Self {
            api,
            character_id,
            state: Mutex::new(InboxState::default()),
            snapshot_tx,
            events,
        }
    }

    pub fn snapshot(&self) -> InboxSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<InboxSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Authoritative re-fetch. Replaces messages and recomputes the unread
    /// counter; in-flight toggle markers are left untouched.
    pub async fn load(&self) -> Result<()> {
        let mut messages = self.api.fetch_inbox(&self.character_id).await?;
        messages.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        let mut state = self.lock_state();
        state.unread = messages.iter().filter(|message| !message.read).count();
        state.messages = messages;
        self.publish(&state);
        Ok(())
    }

    pub async fn toggle_read(&self, id: i64) -> Result<()> {
        {
            let mut state = self.lock_state();
            if state.pending.contains_key(&id) {
                debug!(id, "toggle already in flight; call dropped");
                return Ok(());
            }
            let Some(index) = state.messages.iter().position(|message| message.id == id) else {
                debug!(id, "toggle for unknown message ignored");
                return Ok(());
            };
            state.pending.insert(id, TogglePhase::Optimistic);
            state.messages[index].read = !state.messages[index].read;
            if state.messages[index].read {
                state.unread = state.unread.saturating_sub(1);
            } else {
                state.unread += 1;
            }
            self.publish(&state);
        }

        match self.api.toggle_message_read(id).await {
            Ok(()) => {
                self.set_phase(id, TogglePhase::Reconciling);
                tokio::time::sleep(TOGGLE_SETTLE_DELAY).await;
                if let Err(err) = self.load().await {
                    warn!(?err, id, "authoritative inbox refresh failed after toggle");
                }
                self.clear_pending(id);
                Ok(())
            }
            Err(err) => {
                self.set_phase(id, TogglePhase::Reconciling);
                if let Err(refresh_err) = self.load().await {
                    warn!(?refresh_err, id, "rollback refresh failed; reverting locally");
                    self.revert_local_flip(id);
                }
                self.clear_pending(id);
                let _ = self.events.send(ClientEvent::BlockingAlert {
                    text: format!("Updating message {id} failed: {err}"),
                });
                Err(err)
            }
        }
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        if let Err(err) = self.api.delete_message(id).await {
            let _ = self.events.send(ClientEvent::BlockingAlert {
                text: format!("Deleting message {id} failed: {err}"),
            });
            return Err(err);
        }
        if let Err(err) = self.load().await {
            warn!(?err, id, "inbox refresh failed after delete");
        }
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, InboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &InboxState) {
        self.snapshot_tx.send_replace(InboxSnapshot {
            messages: state.messages.clone().into(),
            unread: state.unread,
        });
    }

    fn set_phase(&self, id: i64, phase: TogglePhase) {
        let mut state = self.lock_state();
        if let Some(entry) = state.pending.get_mut(&id) {
            *entry = phase;
        }
    }

    fn clear_pending(&self, id: i64) {
        let mut state = self.lock_state();
        state.pending.remove(&id);
    }

    fn revert_local_flip(&self, id: i64) {
        let mut state = self.lock_state();
        if let Some(index) = state.messages.iter().position(|message| message.id == id) {
            state.messages[index].read = !state.messages[index].read;
            if state.messages[index].read {
                state.unread = state.unread.saturating_sub(1);
            } else {
                state.unread += 1;
            }
            self.publish(&state);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::Value;
    use tokio::sync::Notify;

    use super::{InboxGuard, InboxMessage};
    use crate::{
        api::{AcquirableKind, PlatformApi},
        events::ClientEvent,
    };

    struct ScriptedApi {
        messages: Mutex<Vec<InboxMessage>>,
        toggle_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
        fail_toggle: AtomicBool,
        hold_toggle: AtomicBool,
        release: Notify,
    }

    impl ScriptedApi {
        fn with_messages(messages: Vec<InboxMessage>) -> Arc<Self> {
            Arc::new(Self {
                messages: Mutex::new(messages),
                toggle_calls: AtomicUsize::new(0),
                fetch_calls: AtomicUsize::new(0),
                fail_toggle: AtomicBool::new(false),
                hold_toggle: AtomicBool::new(false),
                release: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl PlatformApi for ScriptedApi {
        async fn fetch_active_timers(
            &self,
            _character_id: &str,
        ) -> Result<Vec<crate::protocol::TimerSyncPayload>> {
            bail!("not used in inbox tests")
        }

        async fn fetch_inbox(&self, _character_id: &str) -> Result<Vec<InboxMessage>> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .messages
                .lock()
                .expect("message lock should not be poisoned")
                .clone())
        }

        async fn toggle_message_read(&self, message_id: i64) -> Result<()> {
            self.toggle_calls.fetch_add(1, Ordering::SeqCst);
            if self.hold_toggle.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            if self.fail_toggle.load(Ordering::SeqCst) {
                bail!("toggle rejected by server");
            }
            let mut messages = self
                .messages
                .lock()
                .expect("message lock should not be poisoned");
            if let Some(message) = messages.iter_mut().find(|message| message.id == message_id) {
                message.read = !message.read;
            }
            Ok(())
        }

        async fn delete_message(&self, message_id: i64) -> Result<()> {
            self.messages
                .lock()
                .expect("message lock should not be poisoned")
                .retain(|message| message.id != message_id);
            Ok(())
        }

        async fn fetch_character_detail(&self, _character_id: &str) -> Result<Value> {
            bail!("not used in inbox tests")
        }

        async fn fetch_acquirable(
            &self,
            _character_id: &str,
            _kind: AcquirableKind,
        ) -> Result<Value> {
            bail!("not used in inbox tests")
        }

        async fn save_push_subscription(
            &self,
            _character_id: &str,
            _subscription: &Value,
        ) -> Result<()> {
            bail!("not used in inbox tests")
        }
    }

    fn message(id: i64, read: bool) -> InboxMessage {
        InboxMessage {
            id,
            read,
            sent_at: Utc::now(),
            body: format!("message {id}"),
            sender: "Warden".to_owned(),
        }
    }

    fn guard_for(api: Arc<ScriptedApi>) -> (Arc<InboxGuard>, crossbeam_channel::Receiver<ClientEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (
            Arc::new(InboxGuard::new(api, "char-1".to_owned(), tx)),
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn back_to_back_toggles_collapse_to_one_remote_call() {
        let api = ScriptedApi::with_messages(vec![message(42, false)]);
        api.hold_toggle.store(true, Ordering::SeqCst);
        let (guard, _rx) = guard_for(api.clone());
        guard.load().await.expect("initial load");

        let first = tokio::spawn({
            let guard = guard.clone();
            async move { guard.toggle_read(42).await }
        });
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(api.toggle_calls.load(Ordering::SeqCst), 1);

        // second toggle for the same id while the first is in flight: dropped
        guard
            .toggle_read(42)
            .await
            .expect("dropped toggle is not an error");
        assert_eq!(api.toggle_calls.load(Ordering::SeqCst), 1);

        // net optimistic effect of a single flip
        let snapshot = guard.snapshot();
        assert!(snapshot.messages[0].read);
        assert_eq!(snapshot.unread, 0);

        api.hold_toggle.store(false, Ordering::SeqCst);
        api.release.notify_one();
        first
            .await
            .expect("task join")
            .expect("held toggle settles cleanly");

        assert_eq!(api.toggle_calls.load(Ordering::SeqCst), 1);
        assert!(guard.lock_state().pending.is_empty());
        assert!(guard.snapshot().messages[0].read);

        // a later toggle for the same id goes through again
        guard.toggle_read(42).await.expect("follow-up toggle");
        assert_eq!(api.toggle_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_toggle_refetches_after_settle_delay() {
        let api = ScriptedApi::with_messages(vec![message(42, false)]);
        let (guard, _rx) = guard_for(api.clone());
        guard.load().await.expect("initial load");
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 1);

        guard.toggle_read(42).await.expect("toggle settles");

        assert_eq!(api.toggle_calls.load(Ordering::SeqCst), 1);
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 2);
        let snapshot = guard.snapshot();
        assert!(snapshot.messages[0].read);
        assert_eq!(snapshot.unread, 0);
        assert!(guard.lock_state().pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_toggle_rolls_back_read_state_and_unread_count() {
        let api = ScriptedApi::with_messages(vec![message(42, false), message(7, true)]);
        api.fail_toggle.store(true, Ordering::SeqCst);
        let (guard, rx) = guard_for(api.clone());
        guard.load().await.expect("initial load");
        assert_eq!(guard.snapshot().unread, 1);

        let result = guard.toggle_read(42).await;
        assert!(result.is_err());

        let snapshot = guard.snapshot();
        let toggled = snapshot
            .messages
            .iter()
            .find(|message| message.id == 42)
            .expect("message 42 still present");
        assert!(!toggled.read);
        assert_eq!(snapshot.unread, 1);
        assert!(guard.lock_state().pending.is_empty());

        // the rollback re-fetch happens without the settle delay
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 2);
        assert!(rx
            .try_iter()
            .any(|event| matches!(event, ClientEvent::BlockingAlert { .. })));
    }

    #[tokio::test]
    async fn toggle_for_unknown_message_is_ignored() {
        let api = ScriptedApi::with_messages(vec![message(42, false)]);
        let (guard, _rx) = guard_for(api.clone());
        guard.load().await.expect("initial load");

        guard.toggle_read(99).await.expect("unknown id is a no-op");
        assert_eq!(api.toggle_calls.load(Ordering::SeqCst), 0);
        assert!(guard.lock_state().pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn optimistic_unread_adjustment_clamps_at_zero() {
        let api = ScriptedApi::with_messages(vec![message(42, false)]);
        api.hold_toggle.store(true, Ordering::SeqCst);
        let (guard, _rx) = guard_for(api.clone());
        guard.load().await.expect("initial load");

        // counter already drained elsewhere; the flip must not underflow
        guard.lock_state().unread = 0;

        let task = tokio::spawn({
            let guard = guard.clone();
            async move { guard.toggle_read(42).await }
        });
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(guard.snapshot().unread, 0);

        api.hold_toggle.store(false, Ordering::SeqCst);
        api.release.notify_one();
        task.await.expect("task join").expect("toggle settles");
    }

    #[tokio::test]
    async fn delete_refetches_the_authoritative_inbox() {
        let api = ScriptedApi::with_messages(vec![message(42, false), message(7, true)]);
        let (guard, _rx) = guard_for(api.clone());
        guard.load().await.expect("initial load");
        assert_eq!(guard.snapshot().messages.len(), 2);

        guard.delete(42).await.expect("delete settles");
        let snapshot = guard.snapshot();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].id, 7);
        assert_eq!(snapshot.unread, 0);
    }
}
