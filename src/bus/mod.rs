//! In-process event bus between the stream connections and their consumers.
//!
//! Events flow connection → `EventBus` → subscribers:
//! - `Topic<T>`: ordered subscriber list for one event kind
//! - `EventBus`: one topic per kind (metrics, tips, chat)
//! - `Subscription`: handle returned by every subscribe call
//!
//! Publishing is synchronous; each publish iterates a snapshot of the
//! subscriber list taken before the first handler runs.

mod event_bus;
mod event_types;

pub use event_bus::{EventBus, Subscription, Topic};
pub use event_types::{EventKind, StreamEvent};
