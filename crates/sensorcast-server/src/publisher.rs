//! Replay publisher: re-emits recorded feed items on the publication cadence.
//!
//! Items are matched against the wall clock: at a cadence minute, the item
//! whose `timestamp` equals the current minute (`YYYY-MM-DDTHH:MM:00`) is
//! published into the feed. The latest published message lives in a
//! [`PublishContext`] shared with the HTTP layer.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::events::{EventBus, PipelineEvent};
use crate::types::{ServerError, ServerResult};

/// Topic recorded on replayed messages.
pub const DEFAULT_TOPIC: &str = "sensorcast/feed";

const MATCH_FORMAT: &str = "%Y-%m-%dT%H:%M:00";
const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// A message as handed to the feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedMessage {
    pub topic: String,
    pub message: Value,
    /// Wall-clock time of publication.
    pub timestamp: String,
}

/// Holds the most recently published message.
#[derive(Debug, Default)]
pub struct PublishContext {
    latest: RwLock<Option<PublishedMessage>>,
}

impl PublishContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, message: PublishedMessage) {
        let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        *latest = Some(message);
    }

    pub fn latest(&self) -> Option<PublishedMessage> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Replays a recorded item list in step with the clock.
pub struct ReplayPublisher {
    items: Vec<Value>,
    topic: String,
    cadence: Vec<u32>,
    context: Arc<PublishContext>,
    events: Arc<EventBus>,
}

impl ReplayPublisher {
    pub fn new(
        items: Vec<Value>,
        cadence: Vec<u32>,
        context: Arc<PublishContext>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            items,
            topic: DEFAULT_TOPIC.to_string(),
            cadence,
            context,
            events,
        }
    }

    /// Load items from a JSON array file.
    pub fn load(
        path: &Path,
        cadence: Vec<u32>,
        context: Arc<PublishContext>,
        events: Arc<EventBus>,
    ) -> ServerResult<Self> {
        let bytes = std::fs::read(path)?;
        let items = match serde_json::from_slice::<Value>(&bytes)? {
            Value::Array(items) => items,
            _ => {
                return Err(ServerError::InvalidPayload(format!(
                    "{} is not a JSON array",
                    path.display()
                )))
            }
        };
        if items.is_empty() {
            tracing::warn!(path = %path.display(), "Replay file has no items");
        } else {
            tracing::info!(path = %path.display(), items = items.len(), "Replay items loaded");
        }
        Ok(Self::new(items, cadence, context, events))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The first item stamped with `now`'s minute, if any.
    pub fn due_item(&self, now: NaiveDateTime) -> Option<&Value> {
        let key = now.format(MATCH_FORMAT).to_string();
        self.items
            .iter()
            .find(|item| item.get("timestamp").and_then(Value::as_str) == Some(key.as_str()))
    }

    /// Publish the item due at `now` when `now` is on the cadence.
    pub fn publish_at(&self, now: NaiveDateTime) -> Option<PublishedMessage> {
        if !self.cadence.contains(&now.minute()) {
            return None;
        }
        let item = self.due_item(now)?;
        let message = PublishedMessage {
            topic: self.topic.clone(),
            message: item.clone(),
            timestamp: now.format(sensorcast::TIMESTAMP_FORMAT).to_string(),
        };

        self.context.record(message.clone());
        self.events.emit(PipelineEvent::MessagePublished {
            timestamp: message.timestamp.clone(),
            payload: message.message.clone(),
        });
        tracing::info!(topic = %message.topic, at = %message.timestamp, "Published replay item");
        Some(message)
    }

    /// Poll the clock and publish into `feed` until the receiver goes away.
    pub async fn run(self, feed: mpsc::Sender<Value>) {
        let mut last_minute: Option<NaiveDateTime> = None;
        tracing::info!(items = self.items.len(), cadence = ?self.cadence, "Replay publisher started");

        loop {
            let now = chrono::Local::now().naive_local();
            let minute = now.with_second(0).and_then(|t| t.with_nanosecond(0));

            if minute.is_some() && minute != last_minute {
                last_minute = minute;
                if let Some(message) = self.publish_at(now) {
                    if feed.send(message.message).await.is_err() {
                        tracing::info!("Feed closed, stopping replay publisher");
                        break;
                    }
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
