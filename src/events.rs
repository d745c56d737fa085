/// Messages the background workers hand to the host loop. The host renders
/// them however it likes; the core only guarantees their ordering per worker.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    TimerExpired {
        name: String,
    },
    Popup {
        title: String,
        body: String,
        sender: String,
    },
    SystemNotice {
        title: String,
        body: String,
    },
    BlockingAlert {
        text: String,
    },
    InboxInvalidated,
    SnapshotInvalidated,
    ChannelClosed {
        character_id: String,
    },
}

impl ClientEvent {
    pub fn feed_label(&self) -> String {
        match self {
            ClientEvent::TimerExpired { name } => format!("TIMER {name} elapsed"),
            ClientEvent::Popup { title, sender, .. } => {
                if sender.is_empty() {
                    format!("NOTICE {title}")
                } else {
                    format!("NOTICE {title} from {sender}")
                }
            }
            ClientEvent::SystemNotice { title, .. } => format!("SYSTEM {title}"),
            ClientEvent::BlockingAlert { text } => format!("ALERT {text}"),
            ClientEvent::InboxInvalidated => "INBOX refresh queued".to_owned(),
            ClientEvent::SnapshotInvalidated => "CHARACTER refresh queued".to_owned(),
            ClientEvent::ChannelClosed { character_id } => {
                format!("CHANNEL closed for {character_id}")
            }
        }
    }
}

/// Reduces server-sent rich text to the plain form used by popups and the
/// alert channels: tags removed, common entities decoded, whitespace
/// collapsed.
pub fn strip_html(input: &str) -> String {
    let mut stripped = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            _ => stripped.push(ch),
        }
    }
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}
