use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::{alerts::AlertDispatcher, events::ClientEvent, protocol::TimerSyncPayload};

/// A named countdown. `end_time` is always an absolute instant; conversion
/// from a relative duration happens at construction and never later.
#[derive(Debug, Clone, PartialEq)]
pub struct Timer {
    pub name: String,
    pub end_time: DateTime<Utc>,
    pub alert_sound: bool,
    pub notify_system: bool,
    pub notify_in_app: bool,
}

impl Timer {
    /// Builds a timer from a locally triggered countdown (e.g. a scanned
    /// trigger token carrying a duration rather than an end timestamp).
    pub fn from_duration(
        name: String,
        duration_seconds: i64,
        alert_sound: bool,
        notify_system: bool,
        notify_in_app: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name,
            end_time: now + chrono::Duration::seconds(duration_seconds),
            alert_sound,
            notify_system,
            notify_in_app,
        }
    }
}

impl From<TimerSyncPayload> for Timer {
    fn from(payload: TimerSyncPayload) -> Self {
        Self {
            name: payload.name,
            end_time: payload.ends_at,
            alert_sound: payload.alert_sound,
            notify_system: payload.notify_system,
            notify_in_app: payload.notify_in_app,
        }
    }
}

/// Read-only projection published to consumers after every mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerView {
    pub name: String,
    pub end_time: DateTime<Utc>,
    pub remaining_seconds: i64,
}

pub type SharedRegistry = Arc<Mutex<TimerRegistry>>;

/// Live map of active countdowns, keyed by timer name. Two timers sharing a
/// name collapse into one; the later write wins with no flag merge.
/// Consumers never read the map directly: every mutation republishes a
/// whole-object snapshot, so a reader cannot observe a half-updated state.
#[derive(Debug)]
pub struct TimerRegistry {
    entries: HashMap<String, Timer>,
    view_tx: watch::Sender<Arc<[TimerView]>>,
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerRegistry {
    pub fn new() -> Self {
        let (view_tx, _view_rx) = watch::channel::<Arc<[TimerView]>>(Vec::new().into());
        Self {
            entries: HashMap::new(),
            view_tx,
        }
    }

    pub fn upsert(&mut self, timer: Timer) {
        debug!(name = %timer.name, end_time = %timer.end_time, "timer upserted");
        self.entries.insert(timer.name.clone(), timer);
        self.publish(Utc::now());
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.entries.remove(name).is_some();
        if removed {
            self.publish(Utc::now());
        }
        removed
    }

    /// One scheduling step. Entries whose end time has been reached are
    /// removed from the map before this returns and handed back for dispatch;
    /// a later tick can never see them again, so expiry fires exactly once.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Timer> {
        let due: Vec<String> = self
            .entries
            .values()
            .filter(|timer| timer.end_time <= now)
            .map(|timer| timer.name.clone())
            .collect();

        let mut fired = Vec::with_capacity(due.len());
        for name in due {
            if let Some(timer) = self.entries.remove(&name) {
                fired.push(timer);
            }
        }
        fired.sort_by(|a, b| a.name.cmp(&b.name));
        self.publish(now);
        fired
    }

    pub fn get(&self, name: &str) -> Option<&Timer> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn watch_view(&self) -> watch::Receiver<Arc<[TimerView]>> {
        self.view_tx.subscribe()
    }

    fn publish(&self, now: DateTime<Utc>) {
        let mut view: Vec<TimerView> = self
            .entries
            .values()
            .map(|timer| TimerView {
                name: timer.name.clone(),
                end_time: timer.end_time,
                remaining_seconds: (timer.end_time - now).num_seconds().max(0),
            })
            .collect();
        view.sort_by(|a, b| a.end_time.cmp(&b.end_time).then_with(|| a.name.cmp(&b.name)));
        self.view_tx.send_replace(view.into());
    }
}

/// Drives the registry once per second. Ticks are strictly sequential: the
/// next tick is not scheduled until the previous one's synchronous work is
/// done. Expired timers go to the alert dispatcher and the host feed.
pub fn spawn_tick_driver(
    registry: SharedRegistry,
    alerts: AlertDispatcher,
    tx: Sender<ClientEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let fired = registry.lock().await.tick(Utc::now());
            for timer in fired {
                alerts.dispatch(&timer);
                if tx
                    .send(ClientEvent::TimerExpired {
                        name: timer.name.clone(),
                    })
                    .is_err()
                {
                    warn!("host receiver dropped; stopping timer tick driver");
                    return;
                }
            }
        }
    })
}
