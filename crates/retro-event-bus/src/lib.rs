//! Event bus with typed pub/sub for retro_state
//!
//! The EventBus fans every fired event out to two kinds of consumers:
//!
//! - broadcast subscribers (`subscribe`, `subscribe_all`, `subscribe_typed`),
//!   which receive events asynchronously and may lag
//! - synchronous listeners (`listen`, `listen_all`), which run inside `fire`
//!   before it returns
//!
//! Workers that must not miss an event (the recorder, the exporter) register
//! a synchronous listener that only pushes into their own [`WorkQueue`].

mod queue;

pub use queue::{work_queue, WorkQueue, WorkReceiver};

use dashmap::DashMap;
use retro_core::{Context, Event, EventData, EventType};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Default channel capacity for event subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A unique identifier for an event listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callback invoked synchronously for each matching event
pub type Listener = Arc<dyn Fn(&Event<serde_json::Value>) + Send + Sync>;

/// The event bus for publishing and subscribing to events
pub struct EventBus {
    /// Map of event types to their broadcast senders
    senders: DashMap<EventType, broadcast::Sender<Event<serde_json::Value>>>,
    /// Special sender for MATCH_ALL subscribers
    match_all_sender: broadcast::Sender<Event<serde_json::Value>>,
    /// Synchronous listeners keyed by event type (`*` for all events)
    listeners: DashMap<EventType, Vec<(ListenerId, Listener)>>,
    /// Counter for generating unique listener IDs
    next_listener_id: AtomicU64,
    /// Channel capacity
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with specified channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (match_all_sender, _) = broadcast::channel(capacity);
        Self {
            senders: DashMap::new(),
            match_all_sender,
            listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
            capacity,
        }
    }

    /// Subscribe to events of a specific type
    pub fn subscribe(
        &self,
        event_type: impl Into<EventType>,
    ) -> broadcast::Receiver<Event<serde_json::Value>> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing to event type");

        if event_type.is_match_all() {
            return self.match_all_sender.subscribe();
        }

        self.senders
            .entry(event_type)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .subscribe()
    }

    /// Subscribe to events of a specific typed event
    pub fn subscribe_typed<T: EventData + serde::de::DeserializeOwned>(
        &self,
    ) -> TypedEventReceiver<T> {
        TypedEventReceiver::new(self.subscribe(T::event_type()))
    }

    /// Subscribe to all events
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event<serde_json::Value>> {
        self.match_all_sender.subscribe()
    }

    /// Register a synchronous listener for one event type
    ///
    /// The callback runs on the firing thread and must not block.
    pub fn listen<F>(&self, event_type: impl Into<EventType>, callback: F) -> ListenerId
    where
        F: Fn(&Event<serde_json::Value>) + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let id = self.next_listener_id();
        debug!(event_type = %event_type, listener = id.0, "Registering listener");
        self.listeners
            .entry(event_type)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Register a synchronous listener for every event
    pub fn listen_all<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Event<serde_json::Value>) + Send + Sync + 'static,
    {
        self.listen(EventType::match_all(), callback)
    }

    /// Remove a listener; returns false if it was not registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut removed = false;
        for mut entry in self.listeners.iter_mut() {
            let before = entry.len();
            entry.retain(|(lid, _)| *lid != id);
            removed |= entry.len() != before;
        }
        removed
    }

    /// Fire an event to all listeners and subscribers
    ///
    /// Listeners for the specific type run first, then MATCH_ALL listeners,
    /// then the event is broadcast.
    pub fn fire(&self, event: Event<serde_json::Value>) {
        debug!(event_type = %event.event_type, "Firing event");

        // Clone the callbacks out so a listener may register/remove listeners
        let mut callbacks: Vec<Listener> = Vec::new();
        for key in [event.event_type.clone(), EventType::match_all()] {
            if let Some(entry) = self.listeners.get(&key) {
                callbacks.extend(entry.iter().map(|(_, cb)| cb.clone()));
            }
        }
        for callback in callbacks {
            callback(&event);
        }

        if let Some(sender) = self.senders.get(&event.event_type) {
            // Send errors only mean there are no active receivers
            let _ = sender.send(event.clone());
        }
        let _ = self.match_all_sender.send(event);
    }

    /// Fire a typed event
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        self.fire_event(&Event::typed(data, context));
    }

    /// Fire an already-built typed event, keeping its type and timestamp
    pub fn fire_event<T: serde::Serialize>(&self, event: &Event<T>) {
        match event.to_json_event() {
            Ok(json_event) => self.fire(json_event),
            Err(err) => warn!(event_type = %event.event_type, %err, "Dropping unserializable event"),
        }
    }

    /// Generate a new unique listener ID
    pub fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Number of registered synchronous listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.iter().map(|entry| entry.len()).sum()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A receiver for typed events
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<Event<serde_json::Value>>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    fn new(rx: broadcast::Receiver<Event<serde_json::Value>>) -> Self {
        Self {
            rx,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Receive the next event whose data parses as `T`
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Ok(event.map_data(|_| data));
            }
        }
    }
}

/// Thread-safe wrapper for EventBus
pub type SharedEventBus = Arc<EventBus>;
