mod alerts;
mod api;
mod audio;
mod channel;
mod config;
mod control;
mod events;
mod inbox;
mod protocol;
mod snapshot;
mod timers;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender};
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    alerts::{AlertDispatcher, NotificationPermission},
    api::{HttpPlatformApi, PlatformApi},
    audio::{AudioCue, RodioPlayer},
    channel::{ChannelContext, PushChannel},
    config::ClientConfig,
    control::ControlMessage,
    events::ClientEvent,
    inbox::InboxGuard,
    snapshot::RefreshCoordinator,
    timers::{spawn_tick_driver, Timer, TimerRegistry, TimerView},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (config, config_path) = ClientConfig::load_or_create()?;
    let (events_tx, events_rx) = crossbeam_channel::unbounded::<ClientEvent>();
    let (control_tx, control_rx) = mpsc::unbounded_channel::<ControlMessage>();

    let startup_character = config.active_character_id.clone();
    let mut manager = tokio::spawn(run_client_manager(
        config,
        config_path,
        events_tx.clone(),
        control_rx,
    ));
    drop(events_tx);

    spawn_feed_printer(events_rx, control_tx.clone());

    // restore the last-selected character so the push channel comes back up
    // without user interaction
    if let Some(character_id) = startup_character {
        let _ = control_tx.send(ControlMessage::SelectCharacter(Some(character_id)));
    }

    tokio::select! {
        _ = &mut manager => {}
        signal = tokio::signal::ctrl_c() => {
            if signal.is_ok() {
                info!("shutdown requested");
                let _ = control_tx.send(ControlMessage::Shutdown);
            }
            let _ = manager.await;
        }
    }
    Ok(())
}

/// Prints the event feed and routes invalidation events back to the manager
/// as refresh commands. Runs on its own thread because the crossbeam side of
/// the fan-in is blocking.
fn spawn_feed_printer(
    events_rx: Receiver<ClientEvent>,
    control_tx: mpsc::UnboundedSender<ControlMessage>,
) {
    std::thread::spawn(move || {
        while let Ok(event) = events_rx.recv() {
            match &event {
                ClientEvent::InboxInvalidated => {
                    let _ = control_tx.send(ControlMessage::RefreshInbox);
                }
                ClientEvent::SnapshotInvalidated => {
                    let _ = control_tx.send(ControlMessage::RefreshSnapshot);
                }
                _ => {}
            }
            info!(target: "feed", "{}", event.feed_label());
        }
    });
}

async fn run_client_manager(
    mut config: ClientConfig,
    config_path: PathBuf,
    events_tx: Sender<ClientEvent>,
    mut control_rx: mpsc::UnboundedReceiver<ControlMessage>,
) {
    let api: Arc<dyn PlatformApi> = match HttpPlatformApi::new(&config.api_base_url) {
        Ok(api) => Arc::new(api),
        Err(err) => {
            error!(?err, "failed constructing platform api client");
            return;
        }
    };
    let audio: Arc<dyn AudioCue> = Arc::new(RodioPlayer::new());
    let alerts = AlertDispatcher::new(
        audio,
        events_tx.clone(),
        NotificationPermission::from_granted(config.system_notices_granted),
        PathBuf::from(&config.alert_sound_path),
        config.sound_volume,
    );

    let registry = Arc::new(Mutex::new(TimerRegistry::new()));
    let countdown_logger = spawn_countdown_logger(registry.lock().await.watch_view());
    let ticker = spawn_tick_driver(registry.clone(), alerts.clone(), events_tx.clone());
    let mut push_channel = PushChannel::new(
        config.push_base_url.clone(),
        registry.clone(),
        alerts.clone(),
        events_tx.clone(),
    );
    let coordinator = RefreshCoordinator::new(api.clone());
    let mut inbox: Option<Arc<InboxGuard>> = None;

    while let Some(message) = control_rx.recv().await {
        match message {
            ControlMessage::SelectCharacter(next) => {
                push_channel.close();
                inbox = None;
                config.active_character_id = next.clone();
                if let Err(err) = config.save(&config_path) {
                    warn!(?err, "failed persisting active character selection");
                }
                let Some(character_id) = next else {
                    info!("character deselected; push channel stays down");
                    continue;
                };

                // bulk-load this character's active countdowns before subscribing
                match api.fetch_active_timers(&character_id).await {
                    Ok(payloads) => {
                        let mut registry = registry.lock().await;
                        for payload in payloads {
                            registry.upsert(Timer::from(payload));
                        }
                    }
                    Err(err) => warn!(?err, "failed loading active timers"),
                }

                let guard = Arc::new(InboxGuard::new(
                    api.clone(),
                    character_id.clone(),
                    events_tx.clone(),
                ));
                match guard.load().await {
                    Ok(()) => info!(unread = guard.snapshot().unread, "inbox loaded"),
                    Err(err) => warn!(?err, "failed loading inbox"),
                }
                if let Err(err) = coordinator.refresh_all(Some(&character_id)).await {
                    warn!(?err, "initial character refresh failed");
                }
                push_channel.open(ChannelContext {
                    character_id,
                    group_ids: config.character_group_ids.clone(),
                });
                inbox = Some(guard);
            }
            ControlMessage::TriggerTimer {
                name,
                duration_seconds,
                alert_sound,
                notify_system,
                notify_in_app,
            } => {
                let timer = Timer::from_duration(
                    name,
                    duration_seconds,
                    alert_sound,
                    notify_system,
                    notify_in_app,
                    Utc::now(),
                );
                registry.lock().await.upsert(timer);
            }
            ControlMessage::ToggleMessageRead(id) => {
                if let Some(guard) = &inbox {
                    let guard = guard.clone();
                    tokio::spawn(async move {
                        let _ = guard.toggle_read(id).await;
                    });
                } else {
                    warn!(id, "toggle requested without an active character");
                }
            }
            ControlMessage::DeleteMessage(id) => {
                if let Some(guard) = &inbox {
                    let guard = guard.clone();
                    tokio::spawn(async move {
                        let _ = guard.delete(id).await;
                    });
                } else {
                    warn!(id, "delete requested without an active character");
                }
            }
            ControlMessage::RefreshInbox => {
                if let Some(guard) = &inbox {
                    match guard.load().await {
                        Ok(()) => debug!(unread = guard.snapshot().unread, "inbox refreshed"),
                        Err(err) => warn!(?err, "inbox refresh failed"),
                    }
                }
            }
            ControlMessage::RefreshSnapshot => {
                if let Err(err) = coordinator
                    .refresh_all(config.active_character_id.as_deref())
                    .await
                {
                    warn!(?err, "character snapshot refresh failed");
                }
            }
            ControlMessage::RegisterPushSubscription(subscription) => {
                let Some(character_id) = config.active_character_id.as_deref() else {
                    warn!("push subscription registration without an active character");
                    continue;
                };
                if let Err(err) = api.save_push_subscription(character_id, &subscription).await {
                    warn!(?err, "failed saving push subscription");
                    let _ = events_tx.send(ClientEvent::BlockingAlert {
                        text: format!("Saving the push subscription failed: {err}"),
                    });
                }
            }
            ControlMessage::Shutdown => break,
        }
    }

    push_channel.close();
    ticker.abort();
    countdown_logger.abort();
    info!("client manager stopped");
}

/// Follows the registry's published view; this is where a front end would
/// render the remaining times.
fn spawn_countdown_logger(mut view: watch::Receiver<Arc<[TimerView]>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while view.changed().await.is_ok() {
            let snapshot = view.borrow_and_update().clone();
            for timer in snapshot.iter() {
                debug!(
                    target: "countdown",
                    name = %timer.name,
                    remaining = timer.remaining_seconds,
                    "countdown update"
                );
            }
        }
    })
}
