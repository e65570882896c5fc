use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use itin_wire::{EventEnvelope, EventPayload};
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

/// Minimum resident history size per itinerary (spec §3 HistoryTail).
pub const DEFAULT_TAIL_SIZE: usize = 10;
/// Per-subscriber bounded send buffer (spec §5: "size >= 16").
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

pub type SubscriptionId = String;

struct Subscriber {
    sender: mpsc::Sender<EventEnvelope>,
}

/// Per-itinerary state: sequence counter, bounded tail, subscriber set.
/// All three fields are mutated only while holding `inner`'s lock, which
/// is this itinerary's serialization point (spec §4.1) — distinct from
/// every other itinerary's lock so broadcasts across itineraries never
/// contend with each other.
struct PerItinerary {
    next_event_id: u64,
    tail: VecDeque<EventEnvelope>,
    tail_capacity: usize,
    subscribers: HashMap<SubscriptionId, Subscriber>,
}

impl PerItinerary {
    fn new(tail_capacity: usize) -> Self {
        Self {
            next_event_id: 1,
            tail: VecDeque::with_capacity(tail_capacity),
            tail_capacity,
            subscribers: HashMap::new(),
        }
    }

    fn last_event_id(&self) -> u64 {
        self.next_event_id - 1
    }

    fn tail_oldest_id(&self) -> Option<u64> {
        self.tail.front().and_then(|e| e.event_id)
    }

    fn push_tail(&mut self, event: EventEnvelope) {
        if self.tail.len() >= self.tail_capacity {
            self.tail.pop_front();
        }
        self.tail.push_back(event);
    }
}

/// A handle returned by `register`. Dropping it does not unregister —
/// callers must call `ConnectionManager::unregister` explicitly so
/// unregistration stays an observable, idempotent operation (spec §4.1).
#[derive(Debug, Clone)]
pub struct Registration {
    pub itinerary_id: String,
    pub subscription_id: SubscriptionId,
    pub receiver_handle: Arc<Mutex<Option<mpsc::Receiver<EventEnvelope>>>>,
}

impl Registration {
    /// Takes ownership of the receiver half. Can only be called once.
    pub async fn take_receiver(&self) -> Option<mpsc::Receiver<EventEnvelope>> {
        self.receiver_handle.lock().await.take()
    }
}

/// Connection Manager (CM): authoritative per-itinerary index of live
/// subscribers, bounded history tail, and the monotonic event-id counter.
/// Pure in-memory, no agent logic (spec §4.1).
pub struct ConnectionManager {
    itineraries: RwLock<HashMap<String, Arc<Mutex<PerItinerary>>>>,
    tail_capacity: usize,
    subscriber_buffer: usize,
}

impl ConnectionManager {
    pub fn new(tail_capacity: usize, subscriber_buffer: usize) -> Self {
        Self {
            itineraries: RwLock::new(HashMap::new()),
            tail_capacity,
            subscriber_buffer,
        }
    }

    async fn slot(&self, itinerary_id: &str) -> Arc<Mutex<PerItinerary>> {
        if let Some(slot) = self.itineraries.read().await.get(itinerary_id) {
            return slot.clone();
        }
        let mut write = self.itineraries.write().await;
        write
            .entry(itinerary_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PerItinerary::new(self.tail_capacity))))
            .clone()
    }

    /// Registers a subscriber. If `last_seen_event_id` is given, the tail
    /// is replayed in full under the same lock acquisition that computes
    /// the live-delivery starting point, so a concurrent broadcast either
    /// lands in the replay snapshot or is delivered live — never both,
    /// never neither (spec §4.1 algorithmic notes).
    pub async fn register(
        &self,
        itinerary_id: &str,
        last_seen_event_id: Option<u64>,
    ) -> (Registration, Vec<EventEnvelope>, u64) {
        let slot = self.slot(itinerary_id).await;
        let mut guard = slot.lock().await;

        let mut replay = Vec::new();
        if let Some(last_seen) = last_seen_event_id {
            match guard.tail_oldest_id() {
                Some(oldest) if last_seen + 1 < oldest => {
                    replay.push(EventEnvelope::new(
                        itinerary_id,
                        String::new(),
                        EventPayload::RecoveryIncomplete {
                            tail_oldest_event_id: oldest,
                        },
                    ));
                }
                _ => {
                    for event in guard.tail.iter() {
                        if event.event_id.map(|id| id > last_seen).unwrap_or(false) {
                            replay.push(event.clone());
                        }
                    }
                }
            }
        }

        let subscription_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        guard
            .subscribers
            .insert(subscription_id.clone(), Subscriber { sender: tx });
        let last_event_id = guard.last_event_id();

        (
            Registration {
                itinerary_id: itinerary_id.to_string(),
                subscription_id,
                receiver_handle: Arc::new(Mutex::new(Some(rx))),
            },
            replay,
            last_event_id,
        )
    }

    /// Idempotent: unregistering an already-absent subscription is a
    /// no-op (spec §4.1).
    pub async fn unregister(&self, itinerary_id: &str, subscription_id: &str) {
        let slot = self.slot(itinerary_id).await;
        let mut guard = slot.lock().await;
        guard.subscribers.remove(subscription_id);
    }

    /// Assigns the next event id, appends to the tail, then attempts
    /// best-effort delivery to every current subscriber. A full or closed
    /// subscriber channel drops that subscriber only; the bus never
    /// blocks on one slow reader (spec §4.1/§5).
    pub async fn broadcast(&self, itinerary_id: &str, mut event: EventEnvelope) -> u64 {
        let slot = self.slot(itinerary_id).await;
        let mut guard = slot.lock().await;

        let event_id = guard.next_event_id;
        guard.next_event_id += 1;
        event.event_id = Some(event_id);
        guard.push_tail(event.clone());

        let mut dead = Vec::new();
        for (id, subscriber) in guard.subscribers.iter() {
            if subscriber.sender.try_send(event.clone()).is_err() {
                dead.push(id.clone());
            }
        }
        for id in dead {
            guard.subscribers.remove(&id);
        }

        event_id
    }

    pub async fn subscriber_count(&self, itinerary_id: &str) -> usize {
        let slot = self.slot(itinerary_id).await;
        let guard = slot.lock().await;
        guard.subscribers.len()
    }
}

/// Builds the `connected` handshake envelope (spec §6 line 173: the wire
/// contract is `(connected, replayedEvents..., liveEvents...)`). Callers
/// must place this ahead of the replay/live streams themselves — it
/// carries no `event_id` and is never pushed through a subscriber's
/// channel, so it can't race with the first broadcast events.
pub fn connected_event(itinerary_id: &str, last_event_id: u64) -> EventEnvelope {
    EventEnvelope::new(
        itinerary_id,
        String::new(),
        EventPayload::Connected {
            last_event_id: Some(last_event_id),
        },
    )
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(DEFAULT_TAIL_SIZE, DEFAULT_SUBSCRIBER_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_ids_strictly_increase_per_itinerary() {
        let cm = ConnectionManager::new(10, 16);
        let (reg, _, _) = cm.register("trip-1", None).await;
        let mut rx = reg.take_receiver().await.unwrap();

        for i in 0..5 {
            cm.broadcast(
                "trip-1",
                EventEnvelope::new(
                    "trip-1",
                    "exec-1",
                    EventPayload::Progress {
                        overall_pct: i * 10,
                        phase: itin_types::PhaseName::Skeleton,
                        current_activity: "working".into(),
                    },
                ),
            )
            .await;
        }

        let mut last = 0u64;
        for _ in 0..5 {
            let event = rx.try_recv().unwrap();
            let id = event.event_id.unwrap();
            assert!(id > last);
            last = id;
        }
    }

    #[tokio::test]
    async fn unregister_stops_delivery() {
        let cm = ConnectionManager::new(10, 16);
        let (reg, _, _) = cm.register("trip-1", None).await;
        cm.unregister("trip-1", &reg.subscription_id).await;
        assert_eq!(cm.subscriber_count("trip-1").await, 0);
    }

    #[tokio::test]
    async fn reconnect_replays_tail_in_order() {
        let cm = ConnectionManager::new(10, 16);
        for i in 0..5 {
            cm.broadcast(
                "trip-1",
                EventEnvelope::new(
                    "trip-1",
                    "exec-1",
                    EventPayload::Progress {
                        overall_pct: i * 10,
                        phase: itin_types::PhaseName::Skeleton,
                        current_activity: "working".into(),
                    },
                ),
            )
            .await;
        }
        let (_reg, replay, last_event_id) = cm.register("trip-1", Some(2)).await;
        assert_eq!(last_event_id, 5);
        let ids: Vec<u64> = replay.iter().filter_map(|e| e.event_id).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn reconnect_past_tail_gets_recovery_incomplete() {
        let cm = ConnectionManager::new(3, 16);
        for i in 0..10 {
            cm.broadcast(
                "trip-1",
                EventEnvelope::new(
                    "trip-1",
                    "exec-1",
                    EventPayload::Progress {
                        overall_pct: i * 10,
                        phase: itin_types::PhaseName::Skeleton,
                        current_activity: "working".into(),
                    },
                ),
            )
            .await;
        }
        let (_reg, replay, _last) = cm.register("trip-1", Some(1)).await;
        assert_eq!(replay.len(), 1);
        assert!(matches!(replay[0].payload, EventPayload::RecoveryIncomplete { .. }));
    }
}
