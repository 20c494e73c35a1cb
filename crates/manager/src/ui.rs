use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace, warn};

use reef_core::ids::JobId;
use reef_core::Error;
use uuid::Uuid;

/// How often buffered updates are fanned out. A burst of state syncs
/// produces at most one frame per topic per tick.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
/// Cached payloads older than this are regenerated on subscribe.
pub const CACHE_TTL: Duration = Duration::from_secs(10);
/// Unchanged payloads are not re-sent to a client more often than this.
pub const MIN_RESEND_DELAY: Duration = Duration::from_secs(1);

const UPDATE_CHANNEL_CAPACITY: usize = 256;
pub(crate) const CLIENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TopicKind {
    AllJobs,
    SingleJob,
    Nodes,
}

/// A labeled UI push channel. `single_job` carries the job id in
/// `additional`; the other kinds carry nothing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Topic {
    pub kind: TopicKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub additional: Option<String>,
}

impl Topic {
    pub fn all_jobs() -> Self {
        Self { kind: TopicKind::AllJobs, additional: None }
    }

    pub fn nodes() -> Self {
        Self { kind: TopicKind::Nodes, additional: None }
    }

    pub fn single_job(id: &JobId) -> Self {
        Self {
            kind: TopicKind::SingleJob,
            additional: Some(id.clone()),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        match self.kind {
            TopicKind::AllJobs | TopicKind::Nodes => {
                if self.additional.is_some() {
                    return Err(Error::BadRequest(
                        "the additional field must be empty for this topic kind".to_string(),
                    ));
                }
                Ok(())
            }
            TopicKind::SingleJob => {
                if self.additional.as_deref().unwrap_or("").is_empty() {
                    return Err(Error::BadRequest(
                        "the additional field cannot be empty for single jobs".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// A client's subscription message; replaces its previous topic set.
#[derive(Debug, Deserialize)]
pub struct SubscribeMessage {
    pub topics: Vec<Topic>,
}

/// One update emitted by a datasource (registries, reconciler, ...).
pub struct UiUpdate {
    pub topic: Topic,
    pub data: serde_json::Value,
}

struct CachedPayload {
    at: Instant,
    payload: String,
}

struct UiClient {
    tx: mpsc::Sender<String>,
    /// Subscribed topics with the time of the last frame sent to this client.
    topics: HashMap<Topic, Option<Instant>>,
}

#[derive(Default)]
struct UiShared {
    clients: RwLock<HashMap<Uuid, UiClient>>,
    cache: RwLock<HashMap<Topic, CachedPayload>>,
}

/// Cloneable producer half of the bus, held by the manager and the API.
#[derive(Clone)]
pub struct UiHandle {
    updates_tx: mpsc::Sender<UiUpdate>,
    refresh_tx: mpsc::Sender<Topic>,
    shared: Arc<UiShared>,
}

impl UiHandle {
    /// Queue an update for fan-out. Never blocks: when the bus is saturated
    /// the update is dropped (the next one supersedes it anyway).
    pub fn publish(&self, topic: Topic, data: serde_json::Value) {
        if self.updates_tx.try_send(UiUpdate { topic, data }).is_err() {
            warn!("UI update bus saturated, dropping update");
        }
    }

    /// Register a client connection. Frames for the client go into `tx`.
    pub async fn register_client(&self, id: Uuid, tx: mpsc::Sender<String>) {
        self.shared.clients.write().await.insert(
            id,
            UiClient {
                tx,
                topics: HashMap::new(),
            },
        );
        debug!(client = %id, "UI client connected");
    }

    pub async fn remove_client(&self, id: Uuid) {
        if self.shared.clients.write().await.remove(&id).is_some() {
            debug!(client = %id, "UI client dropped");
        }
    }

    /// Replace a client's topic set. Topics with a fresh cached payload are
    /// served immediately; the rest are forwarded to the datasource for
    /// regeneration.
    pub async fn subscribe(&self, id: Uuid, topics: Vec<Topic>) {
        let mut clients = self.shared.clients.write().await;
        let Some(client) = clients.get_mut(&id) else {
            return;
        };

        client.topics.clear();

        let cache = self.shared.cache.read().await;
        for topic in topics {
            let mut last_sent = None;

            match cache.get(&topic) {
                Some(cached) if cached.at.elapsed() <= CACHE_TTL => {
                    let frame = outbound_frame(&topic, &cached.payload);
                    if client.tx.try_send(frame).is_ok() {
                        last_sent = Some(Instant::now());
                    }
                }
                _ => {
                    trace!(?topic, "no fresh cached payload, requesting refresh");
                    let _ = self.refresh_tx.try_send(topic.clone());
                }
            }

            client.topics.insert(topic, last_sent);
        }
    }
}

/// Consumer half: buffers updates and fans them out on a fixed tick.
pub struct UiBus {
    updates_rx: mpsc::Receiver<UiUpdate>,
    buffer: HashMap<Topic, serde_json::Value>,
    shared: Arc<UiShared>,
}

impl UiBus {
    /// Build the bus. Returns the consumer, the producer handle, and the
    /// receiver for refresh requests (served by the manager's datasource
    /// worker).
    pub fn new() -> (Self, UiHandle, mpsc::Receiver<Topic>) {
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let (refresh_tx, refresh_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let shared = Arc::new(UiShared::default());

        let bus = Self {
            updates_rx,
            buffer: HashMap::new(),
            shared: shared.clone(),
        };
        let handle = UiHandle {
            updates_tx,
            refresh_tx,
            shared,
        };
        (bus, handle, refresh_rx)
    }

    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(FLUSH_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                update = self.updates_rx.recv() => match update {
                    Some(update) => {
                        // Coalesce: the latest payload per topic wins.
                        self.buffer.insert(update.topic, update.data);
                    }
                    None => break,
                },
                _ = tick.tick() => self.flush().await,
            }
        }

        self.flush().await;
    }

    /// Fan the buffered updates out to every subscribed client, honoring the
    /// per-client rate floor. Clients that cannot keep up are dropped.
    async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        for (topic, data) in self.buffer.drain() {
            let payload = match serde_json::to_string(&data) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("could not marshal UI payload: {e}");
                    continue;
                }
            };

            let unchanged = {
                let cache = self.shared.cache.read().await;
                cache
                    .get(&topic)
                    .map(|cached| cached.payload == payload)
                    .unwrap_or(false)
            };

            self.shared.cache.write().await.insert(
                topic.clone(),
                CachedPayload {
                    at: Instant::now(),
                    payload: payload.clone(),
                },
            );

            let frame = outbound_frame(&topic, &payload);
            let mut dead = Vec::new();

            let mut clients = self.shared.clients.write().await;
            for (client_id, client) in clients.iter_mut() {
                let Some(last_sent) = client.topics.get_mut(&topic) else {
                    continue;
                };

                if unchanged {
                    if let Some(at) = last_sent {
                        if at.elapsed() < MIN_RESEND_DELAY {
                            trace!(client = %client_id, "unchanged payload inside rate floor, skipping");
                            continue;
                        }
                    }
                }

                match client.tx.try_send(frame.clone()) {
                    Ok(()) => *last_sent = Some(Instant::now()),
                    Err(_) => {
                        // Slow or gone; drop it rather than block producers.
                        warn!(client = %client_id, "UI client cannot keep up, dropping");
                        dead.push(*client_id);
                    }
                }
            }

            for id in dead {
                clients.remove(&id);
            }
        }
    }
}

/// `{"topic": ..., "data": ...}` with the payload already serialized.
fn outbound_frame(topic: &Topic, payload: &str) -> String {
    let topic_json = serde_json::to_string(topic).unwrap_or_else(|_| "null".to_string());
    format!(r#"{{"topic":{topic_json},"data":{payload}}}"#)
}
