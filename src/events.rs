//! Typed publish/subscribe for sensor changes.
//!
//! Publishing never blocks: handler subscribers run inline and their failures
//! (errors or panics) are logged and counted without affecting other
//! subscribers; channel subscribers use `try_send`, and a full queue is logged
//! and counted. Snapshot and statistics events are also forwarded to the
//! realtime push channel consumed by the UI.

use crate::sensor::{CompositeId, DisplayView, FieldValue};
use crate::stats::ProtocolStats;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::broadcast;

/// Capacity of the realtime broadcast channel.
const REALTIME_CAPACITY: usize = 256;

/// Events produced by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HubEvent {
    /// A mappable field changed value.
    ValueChanged {
        id: CompositeId,
        capability: String,
        value: FieldValue,
    },
    /// A payload for the sensor was ingested, changed or not.
    Updated {
        id: CompositeId,
        timestamp: DateTime<Utc>,
    },
    /// Full listing of display views after a classified update.
    SnapshotChanged { sensors: Vec<DisplayView> },
    /// Decode counters of one protocol.
    StatsUpdate {
        protocol_id: String,
        stats: ProtocolStats,
    },
}

impl HubEvent {
    pub fn topic(&self) -> Topic {
        match self {
            HubEvent::ValueChanged { id, .. } => Topic::Value(id.clone()),
            HubEvent::Updated { id, .. } => Topic::Update(id.clone()),
            HubEvent::SnapshotChanged { .. } => Topic::Snapshot,
            HubEvent::StatsUpdate { .. } => Topic::Stats,
        }
    }
}

/// What a subscriber listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// `value:<id>`
    Value(CompositeId),
    /// `update:<id>`
    Update(CompositeId),
    Snapshot,
    Stats,
    /// Every event
    All,
}

impl Topic {
    fn matches(&self, event: &HubEvent) -> bool {
        match (self, event) {
            (Topic::All, _) => true,
            (Topic::Value(id), HubEvent::ValueChanged { id: eid, .. }) => id == eid,
            (Topic::Update(id), HubEvent::Updated { id: eid, .. }) => id == eid,
            (Topic::Snapshot, HubEvent::SnapshotChanged { .. }) => true,
            (Topic::Stats, HubEvent::StatsUpdate { .. }) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Value(id) => write!(f, "value:{id}"),
            Topic::Update(id) => write!(f, "update:{id}"),
            Topic::Snapshot => write!(f, "snapshot"),
            Topic::Stats => write!(f, "stats"),
            Topic::All => write!(f, "*"),
        }
    }
}

/// Inline event handler.
pub trait Subscriber: Send {
    fn on_event(&mut self, event: &HubEvent) -> anyhow::Result<()>;
}

impl<F> Subscriber for F
where
    F: FnMut(&HubEvent) -> anyhow::Result<()> + Send,
{
    fn on_event(&mut self, event: &HubEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Handle returned by `subscribe*`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum Sink {
    Handler(Box<dyn Subscriber>),
    Channel(Sender<HubEvent>),
}

struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    sink: Sink,
}

/// Named message on the realtime push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RealtimeMessage {
    SensorUpdate(Vec<DisplayView>),
    StatsUpdate {
        #[serde(rename = "protocolId")]
        protocol_id: String,
        stats: ProtocolStats,
    },
}

impl RealtimeMessage {
    /// Event name as seen by the UI.
    pub fn name(&self) -> &'static str {
        match self {
            RealtimeMessage::SensorUpdate(_) => "sensor_update",
            RealtimeMessage::StatsUpdate { .. } => "stats_update",
        }
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub handler_failures: u64,
    pub queue_full: u64,
}

/// Fan-out of hub events to subscribers.
pub struct EventBus {
    subscriptions: Vec<Subscription>,
    next_id: u64,
    realtime: broadcast::Sender<RealtimeMessage>,
    stats: BusStats,
}

impl EventBus {
    pub fn new() -> Self {
        let (realtime, _) = broadcast::channel(REALTIME_CAPACITY);
        Self {
            subscriptions: Vec::new(),
            next_id: 0,
            realtime,
            stats: BusStats::default(),
        }
    }

    fn add(&mut self, topic: Topic, sink: Sink) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        tracing::debug!("Subscribing {:?} to {}", id, topic);
        self.subscriptions.push(Subscription { id, topic, sink });
        id
    }

    /// Register an inline handler.
    pub fn subscribe<S>(&mut self, topic: Topic, subscriber: S) -> SubscriptionId
    where
        S: Subscriber + 'static,
    {
        self.add(topic, Sink::Handler(Box::new(subscriber)))
    }

    /// Register a bounded queue and return its receiving end.
    pub fn subscribe_channel(&mut self, topic: Topic, capacity: usize) -> (SubscriptionId, Receiver<HubEvent>) {
        let (tx, rx) = bounded(capacity);
        let id = self.add(topic, Sink::Channel(tx));
        (id, rx)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        before != self.subscriptions.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Receiver for the realtime push channel.
    pub fn realtime(&self) -> broadcast::Receiver<RealtimeMessage> {
        self.realtime.subscribe()
    }

    /// Sender side of the realtime channel, for components that subscribe later.
    pub fn realtime_sender(&self) -> broadcast::Sender<RealtimeMessage> {
        self.realtime.clone()
    }

    pub fn stats(&self) -> BusStats {
        self.stats
    }

    /// Deliver an event to every matching subscriber.
    pub fn publish(&mut self, event: HubEvent) {
        self.stats.published += 1;
        let mut closed = Vec::new();

        for sub in self.subscriptions.iter_mut().filter(|s| s.topic.matches(&event)) {
            match &mut sub.sink {
                Sink::Handler(handler) => {
                    match catch_unwind(AssertUnwindSafe(|| handler.on_event(&event))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            self.stats.handler_failures += 1;
                            tracing::warn!("Subscriber on {} failed: {:#}", sub.topic, e);
                        }
                        Err(_) => {
                            self.stats.handler_failures += 1;
                            tracing::error!("Subscriber on {} panicked", sub.topic);
                        }
                    }
                }
                Sink::Channel(tx) => match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.stats.queue_full += 1;
                        tracing::warn!("Subscriber queue on {} is full, event not delivered", sub.topic);
                    }
                    Err(TrySendError::Disconnected(_)) => closed.push(sub.id),
                },
            }
        }

        if !closed.is_empty() {
            tracing::debug!("Dropping {} closed subscriber queue(s)", closed.len());
            self.subscriptions.retain(|s| !closed.contains(&s.id));
        }

        let realtime = match event {
            HubEvent::SnapshotChanged { sensors } => Some(RealtimeMessage::SensorUpdate(sensors)),
            HubEvent::StatsUpdate { protocol_id, stats } => {
                Some(RealtimeMessage::StatsUpdate { protocol_id, stats })
            }
            _ => None,
        };
        if let Some(message) = realtime {
            // An error only means nobody is listening right now.
            let _ = self.realtime.send(message);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
