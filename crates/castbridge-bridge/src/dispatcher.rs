/*!
 * Central event dispatcher.
 *
 * Discovery callbacks, bus callbacks and dying sessions all funnel into
 * one prioritized mailbox consumed by a single worker task. The worker
 * owns the session table, so adding and removing sessions never races.
 *
 * Topology events (devices appearing and disappearing, session deaths)
 * outrank routine message traffic; within a tier, arrival order wins.
 */
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use castbridge_core::config::SharedConfig;
use castbridge_core::types::DeviceId;
use castbridge_devices::{BusCallback, CastDeviceProvider, DiscoveryCallback, MessageBus};

use crate::properties;
use crate::session::{Command, DeviceSession};

/// Priority tier of a dispatcher event. Lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    /// Session table changes
    Topology = 0,
    /// Everything else, chiefly inbound messages
    Routine = 2,
}

/// One event for the dispatch worker.
#[derive(Debug)]
pub enum Event {
    /// Discovery found a device
    DeviceAppeared {
        /// Device identifier
        id: DeviceId,
        /// Model name reported by discovery
        model_name: String,
        /// Network address the device answered from
        address: String,
        /// Service port
        port: u16,
    },
    /// Discovery lost a device
    DeviceDisappeared {
        /// Device identifier
        id: DeviceId,
    },
    /// A session hit a recoverable failure; informational only
    SessionFailed {
        /// Device identifier
        id: DeviceId,
    },
    /// A session gave up and must leave the table
    SessionDead {
        /// Device identifier
        id: DeviceId,
    },
    /// The bus (re)connected; subscriptions must be replayed
    BusConnected,
    /// An inbound bus message
    Message {
        /// Full topic
        topic: String,
        /// Raw payload
        payload: Bytes,
    },
    /// Stop the worker and release every session
    Shutdown,
}

impl Event {
    fn tier(&self) -> Tier {
        match self {
            Event::Message { .. } | Event::SessionFailed { .. } => Tier::Routine,
            _ => Tier::Topology,
        }
    }

    /// Short name for log lines and tests
    pub fn label(&self) -> &'static str {
        match self {
            Event::DeviceAppeared { .. } => "device_appeared",
            Event::DeviceDisappeared { .. } => "device_disappeared",
            Event::SessionFailed { .. } => "session_failed",
            Event::SessionDead { .. } => "session_dead",
            Event::BusConnected => "bus_connected",
            Event::Message { .. } => "message",
            Event::Shutdown => "shutdown",
        }
    }
}

/// Heap entry; ordering is inverted so the std max-heap pops the lowest
/// (tier, seq) pair first.
struct QueuedEvent {
    tier: Tier,
    seq: u64,
    at: DateTime<Utc>,
    event: Event,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.tier == other.tier && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (other.tier, other.seq).cmp(&(self.tier, self.seq))
    }
}

/// Unbounded priority mailbox shared between producers and the worker.
struct Mailbox {
    heap: Mutex<BinaryHeap<QueuedEvent>>,
    seq: AtomicU64,
    notify: Notify,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    fn push(&self, event: Event) {
        let entry = QueuedEvent {
            tier: event.tier(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            at: Utc::now(),
            event,
        };
        self.heap
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<QueuedEvent> {
        self.heap.lock().unwrap_or_else(|e| e.into_inner()).pop()
    }

    async fn pop(&self) -> QueuedEvent {
        loop {
            // arm the waiter before checking, so a push between the check
            // and the await is not lost
            let notified = self.notify.notified();
            if let Some(entry) = self.try_pop() {
                return entry;
            }
            notified.await;
        }
    }
}

/// Cloneable handle feeding the dispatch worker.
#[derive(Clone)]
pub struct EventDispatcher {
    mailbox: Arc<Mailbox>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher").finish_non_exhaustive()
    }
}

impl EventDispatcher {
    /// Create a dispatcher handle with an empty mailbox.
    pub fn new() -> Self {
        Self {
            mailbox: Arc::new(Mailbox::new()),
        }
    }

    /// Queue a device appearance.
    pub fn notify_device_appeared(
        &self,
        id: DeviceId,
        model_name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) {
        self.mailbox.push(Event::DeviceAppeared {
            id,
            model_name: model_name.into(),
            address: address.into(),
            port,
        });
    }

    /// Queue a device disappearance.
    pub fn notify_device_disappeared(&self, id: DeviceId) {
        self.mailbox.push(Event::DeviceDisappeared { id });
    }

    /// Queue a recoverable session failure; called from session workers.
    pub fn notify_session_failed(&self, id: DeviceId) {
        self.mailbox.push(Event::SessionFailed { id });
    }

    /// Queue a session death; called from session workers.
    pub fn notify_session_dead(&self, id: DeviceId) {
        self.mailbox.push(Event::SessionDead { id });
    }

    /// Queue a bus connection notification.
    pub fn notify_bus_connected(&self) {
        self.mailbox.push(Event::BusConnected);
    }

    /// Queue an inbound bus message.
    pub fn notify_message(&self, topic: impl Into<String>, payload: Bytes) {
        self.mailbox.push(Event::Message {
            topic: topic.into(),
            payload,
        });
    }

    /// Queue an orderly shutdown.
    pub fn shutdown(&self) {
        self.mailbox.push(Event::Shutdown);
    }

    /// Spawn the worker that consumes this handle's mailbox.
    pub fn spawn_worker(
        &self,
        bus: Arc<dyn MessageBus>,
        provider: Arc<dyn CastDeviceProvider>,
        config: SharedConfig,
    ) -> JoinHandle<()> {
        let worker = DispatchWorker {
            dispatcher: self.clone(),
            bus,
            provider,
            config,
            sessions: HashMap::new(),
        };
        tokio::spawn(worker.run())
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&self) -> Option<Event> {
        self.mailbox.try_pop().map(|entry| entry.event)
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryCallback for EventDispatcher {
    fn on_appeared(&self, id: DeviceId, model_name: &str, address: &str, port: u16) {
        self.notify_device_appeared(id, model_name, address, port);
    }

    fn on_disappeared(&self, id: DeviceId) {
        self.notify_device_disappeared(id);
    }
}

impl BusCallback for EventDispatcher {
    fn on_connected(&self) {
        self.notify_bus_connected();
    }

    fn on_message(&self, topic: &str, payload: Bytes) {
        self.notify_message(topic, payload);
    }
}

/// The single task consuming the mailbox and owning the session table.
struct DispatchWorker {
    dispatcher: EventDispatcher,
    bus: Arc<dyn MessageBus>,
    provider: Arc<dyn CastDeviceProvider>,
    config: SharedConfig,
    sessions: HashMap<DeviceId, DeviceSession>,
}

impl DispatchWorker {
    async fn run(mut self) {
        info!("dispatch worker started");
        loop {
            let entry = self.dispatcher.mailbox.pop().await;
            let waited = Utc::now() - entry.at;
            debug!(
                event = entry.event.label(),
                seq = entry.seq,
                queued_ms = waited.num_milliseconds(),
                "dispatching"
            );
            if matches!(entry.event, Event::Shutdown) {
                self.release_all().await;
                info!("dispatch worker stopped");
                return;
            }
            self.handle_event(entry.event).await;
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::DeviceAppeared {
                id,
                model_name,
                address,
                port,
            } => {
                info!(device = %id, %model_name, %address, port, "device appeared");
                if self.sessions.contains_key(&id) {
                    debug!(device = %id, "session already exists");
                } else {
                    let session = self.ensure_session(id).clone();
                    if let Err(err) = session.enqueue(Command::CreateConnection).await {
                        warn!(device = %session.id(), error = %err, "eager connect not queued");
                    }
                }
            }
            Event::DeviceDisappeared { id } => self.on_disappeared(id).await,
            Event::SessionFailed { id } => {
                warn!(device = %id, "session reported a failure");
            }
            Event::SessionDead { id } => {
                if self.sessions.remove(&id).is_some() {
                    info!(device = %id, "dead session removed");
                } else {
                    debug!(device = %id, "death notice for unknown session");
                }
            }
            Event::BusConnected => self.on_bus_connected().await,
            Event::Message { topic, payload } => self.on_message(topic, payload).await,
            Event::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    /// Create a session for a device unless one already exists.
    fn ensure_session(&mut self, id: DeviceId) -> &DeviceSession {
        let config = self.config.clone();
        let bus = self.bus.clone();
        let provider = self.provider.clone();
        let dispatcher = self.dispatcher.clone();
        self.sessions.entry(id).or_insert_with_key(|id| {
            debug!(device = %id, "creating session");
            DeviceSession::spawn(
                id.clone(),
                &config.get().topics.root,
                bus,
                provider,
                dispatcher,
                &config.get().session,
            )
        })
    }

    async fn on_disappeared(&mut self, id: DeviceId) {
        match self.sessions.get(&id) {
            // mdns flaps; a session that still holds a live connection
            // stays in the table
            Some(session) if session.is_connected() => {
                debug!(device = %id, "ignoring disappearance of a connected device");
            }
            Some(_) => {
                info!(device = %id, "device disappeared, releasing session");
                if let Some(session) = self.sessions.remove(&id) {
                    session.release().await;
                }
            }
            None => debug!(device = %id, "disappearance of an unknown device"),
        }
    }

    /// Re-arm the wildcard command subscriptions after a bus (re)connect.
    async fn on_bus_connected(&self) {
        info!("bus connected, subscribing command filters");
        for filter in properties::command_filters(&self.config.get().topics.root) {
            if let Err(err) = self.bus.subscribe(&filter).await {
                warn!(%filter, error = %err, "wildcard subscription failed");
            }
        }
    }

    async fn on_message(&mut self, topic: String, payload: Bytes) {
        let device_id = match properties::device_id_from_topic(&topic) {
            Some(id) => DeviceId::from(id),
            None => {
                debug!(%topic, "message on a malformed topic");
                return;
            }
        };

        // commands may arrive before discovery announces the device
        let session = self.ensure_session(device_id).clone();
        if let Err(err) = session.forward_message(topic.clone(), payload).await {
            warn!(%topic, error = %err, "message could not be forwarded");
        }
    }

    async fn release_all(&mut self) {
        let sessions: Vec<DeviceSession> = self.sessions.drain().map(|(_, s)| s).collect();
        info!(count = sessions.len(), "releasing all sessions");
        join_all(sessions.iter().map(|session| session.release())).await;
    }
}
