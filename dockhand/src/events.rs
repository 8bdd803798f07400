//! Lifecycle event emission.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::container::Container;

const CHANNEL_CAPACITY: usize = 256;
const HISTORY_LIMIT: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Container,
    Image,
    Volume,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// e.g. `create`, `start`, `die`, `exec_start: sh -c ls`.
    pub action: String,
    pub actor_id: String,
    pub attributes: BTreeMap<String, String>,
    pub time: DateTime<Utc>,
}

/// Sink for daemon events.
pub trait EventLogger: Send + Sync {
    fn log(&self, event: Event);

    fn log_container_event(&self, container: &Container, action: &str) {
        self.log_container_event_with(container, action, BTreeMap::new());
    }

    /// Container event with extra attributes (e.g. `exitCode`).
    fn log_container_event_with(
        &self,
        container: &Container,
        action: &str,
        extra: BTreeMap<String, String>,
    ) {
        let mut attributes = container.config.labels.clone();
        attributes.insert("name".into(), container.name.clone());
        attributes.insert("image".into(), container.config.image.clone());
        attributes.extend(extra);
        self.log(Event {
            event_type: EventType::Container,
            action: action.to_string(),
            actor_id: container.id.to_string(),
            attributes,
            time: Utc::now(),
        });
    }

    fn log_image_event(&self, image_id: &str, reference: &str, action: &str) {
        let mut attributes = BTreeMap::new();
        if !reference.is_empty() {
            attributes.insert("name".into(), reference.to_string());
        }
        self.log(Event {
            event_type: EventType::Image,
            action: action.to_string(),
            actor_id: image_id.to_string(),
            attributes,
            time: Utc::now(),
        });
    }

    fn log_volume_event(&self, name: &str, action: &str, attributes: BTreeMap<String, String>) {
        self.log(Event {
            event_type: EventType::Volume,
            action: action.to_string(),
            actor_id: name.to_string(),
            attributes,
            time: Utc::now(),
        });
    }
}

/// In-process event bus: live subscribers plus a bounded replay buffer.
pub struct EventsService {
    tx: broadcast::Sender<Event>,
    history: Mutex<VecDeque<Event>>,
}

impl Default for EventsService {
    fn default() -> Self {
        Self::new()
    }
}

impl EventsService {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        }
    }

    /// Live events from now on. Lagging subscribers skip missed events.
    pub fn subscribe(&self) -> impl Stream<Item = Event> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|e| e.ok())
    }

    /// Buffered events at or after `since`, oldest first.
    pub fn since(&self, since: DateTime<Utc>) -> Vec<Event> {
        self.history
            .lock()
            .iter()
            .filter(|e| e.time >= since)
            .cloned()
            .collect()
    }
}

impl EventLogger for EventsService {
    fn log(&self, event: Event) {
        tracing::debug!(
            event_type = ?event.event_type,
            action = %event.action,
            actor = %event.actor_id,
            "Event"
        );
        {
            let mut history = self.history.lock();
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}
