use serde_json::Value;

/// Host-to-manager commands. The manager owns the per-character wiring and
/// reconfigures the workers when one of these arrives.
#[derive(Debug, Clone)]
pub enum ControlMessage {
    /// Switch the active subscription context (or clear it with `None`).
    SelectCharacter(Option<String>),
    /// Insert a locally triggered countdown, e.g. from a scanned trigger
    /// token carrying a duration.
    TriggerTimer {
        name: String,
        duration_seconds: i64,
        alert_sound: bool,
        notify_system: bool,
        notify_in_app: bool,
    },
    ToggleMessageRead(i64),
    DeleteMessage(i64),
    RefreshInbox,
    RefreshSnapshot,
    RegisterPushSubscription(Value),
    Shutdown,
}
