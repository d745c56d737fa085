use std::{path::PathBuf, sync::Arc, time::Duration};

use crossbeam_channel::Sender;
use tracing::debug;

use crate::{
    audio::{AudioCue, CueRequest},
    events::ClientEvent,
    timers::Timer,
};

/// The alert chime plays this many times per expiry, back to back.
pub const EXPIRY_CUE_REPEATS: u32 = 3;

/// The blocking in-app alert waits this long so it does not stall the start
/// of the audio sequence.
const IN_APP_ALERT_DELAY: Duration = Duration::from_millis(200);

const SYSTEM_NOTICE_BODY: &str = "A tracked countdown has come to its end.";

/// Whether the environment has previously granted system-notification
/// permission. The core never prompts; it only honours the recorded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPermission {
    Granted,
    Denied,
}

impl NotificationPermission {
    pub fn from_granted(granted: bool) -> Self {
        if granted {
            Self::Granted
        } else {
            Self::Denied
        }
    }
}

/// Fans an expired timer (or a pushed notification) out over up to three
/// independent channels: audio cue, system notice, blocking in-app alert.
/// Each channel is fire-and-forget; a failure in one never blocks the
/// others, and nothing here can re-arm a timer.
#[derive(Clone)]
pub struct AlertDispatcher {
    audio: Arc<dyn AudioCue>,
    events: Sender<ClientEvent>,
    permission: NotificationPermission,
    cue_path: PathBuf,
    cue_volume: f32,
}

impl AlertDispatcher {
    pub fn new(
        audio: Arc<dyn AudioCue>,
        events: Sender<ClientEvent>,
        permission: NotificationPermission,
        cue_path: PathBuf,
        cue_volume: f32,
    ) -> Self {
        Self {
            audio,
            events,
            permission,
            cue_path,
            cue_volume,
        }
    }

    pub fn dispatch(&self, timer: &Timer) {
        if timer.alert_sound {
            self.play_cue();
        }
        if timer.notify_system {
            self.send_system_notice(
                format!("{} elapsed", timer.name),
                SYSTEM_NOTICE_BODY.to_owned(),
            );
        }
        if timer.notify_in_app {
            self.send_delayed_alert(format!("The {} countdown has ended.", timer.name));
        }
    }

    /// Routes a pushed notification through the same three channels as a
    /// timer expiry. Callers pass plain text; rich markup is stripped before
    /// this point.
    pub fn dispatch_text(&self, title: &str, body: &str) {
        self.play_cue();
        self.send_system_notice(title.to_owned(), body.to_owned());
        self.send_delayed_alert(if body.is_empty() {
            title.to_owned()
        } else {
            format!("{title}: {body}")
        });
    }

    fn play_cue(&self) {
        self.audio.play(CueRequest {
            path: self.cue_path.clone(),
            volume: self.cue_volume,
            repeat: EXPIRY_CUE_REPEATS,
        });
    }

    fn send_system_notice(&self, title: String, body: String) {
        if self.permission != NotificationPermission::Granted {
            debug!(title = %title, "system notice suppressed; permission not granted");
            return;
        }
        let _ = self.events.send(ClientEvent::SystemNotice { title, body });
    }

    fn send_delayed_alert(&self, text: String) {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(IN_APP_ALERT_DELAY).await;
            let _ = events.send(ClientEvent::BlockingAlert { text });
        });
    }
}
