//! Event kinds and the tagged event value carried across the bus.

use std::fmt;

use crate::types::{AgentTip, ChatMessage, TrainingMetrics};

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

pub const KIND_METRICS: &str = "metrics";
pub const KIND_TIP: &str = "tip";
pub const KIND_CHAT: &str = "chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Metrics,
    Tip,
    Chat,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Metrics => KIND_METRICS,
            EventKind::Tip => KIND_TIP,
            EventKind::Chat => KIND_CHAT,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A decoded event from either channel or from the demo generator.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Metrics(TrainingMetrics),
    Tip(AgentTip),
    Chat(ChatMessage),
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StreamEvent::Metrics(_) => EventKind::Metrics,
            StreamEvent::Tip(_) => EventKind::Tip,
            StreamEvent::Chat(_) => EventKind::Chat,
        }
    }
}
