use uuid::Uuid;

use crate::protocol::{ChatEvent, ChatEventKind};

/// Returns the current unix time in milliseconds.
pub fn unix_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}

/// Append-only chat log, ordered by local arrival. Arrival order gives every
/// participant a self-consistent view regardless of sender clock skew; it is
/// rebuilt from scratch after a reconnect, never merged.
#[derive(Debug, Default)]
pub struct ChatLog {
    events: Vec<ChatEvent>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, event: ChatEvent) {
        self.events.push(event);
    }

    /// Append a locally generated system notice (joins, leaves, kicks).
    pub fn append_system(&mut self, subject: Uuid, body: impl Into<String>) {
        self.events.push(ChatEvent {
            id: Uuid::new_v4(),
            author: subject,
            body: body.into(),
            timestamp: unix_millis(),
            kind: ChatEventKind::System,
        });
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> Vec<ChatEvent> {
        self.events.clone()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
