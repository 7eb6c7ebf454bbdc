/*!
 * Per-device session workers.
 *
 * Each discovered device gets one [`DeviceSession`]: a cheap handle around
 * a bounded command mailbox whose worker task owns the device handle, the
 * property channel and the connection state machine. Everything that
 * touches one device runs on that one worker, so no state here is shared.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use castbridge_core::config::SessionConfig;
use castbridge_core::types::DeviceId;
use castbridge_devices::{
    CastConnectionStatus, CastDevice, CastDeviceProvider, CastEvent, CastStatus, DeviceError,
    DeviceLink, MediaStatus, MessageBus, CONNECTION_STATUS_ERROR, CONNECTION_STATUS_NOT_FOUND,
    CONNECTION_STATUS_WAITING, PLAYER_STATE_IDLE,
};

use crate::dispatcher::EventDispatcher;
use crate::error::{Error, Result};
use crate::properties::{self, PlayerRequest, PropertyChannel};

/// One unit of work for a session worker.
#[derive(Debug)]
pub enum Command {
    /// Eagerly connect to the device; queued right after discovery
    CreateConnection,
    /// A decoded player command
    Request(PlayerRequest),
    /// Receiver status pushed by the device
    CastStatus(CastStatus),
    /// Connection status pushed by the device
    ConnectionStatus(CastConnectionStatus),
    /// Media player status pushed by the device
    MediaStatus(MediaStatus),
    /// A raw inbound bus message addressed to this device
    MessageIngress {
        /// Full topic the message arrived on
        topic: String,
        /// Raw payload
        payload: Bytes,
    },
    /// Orderly teardown request
    Shutdown,
}

impl Command {
    /// Short name for log lines
    pub fn label(&self) -> &'static str {
        match self {
            Command::CreateConnection => "create_connection",
            Command::Request(_) => "request",
            Command::CastStatus(_) => "cast_status",
            Command::ConnectionStatus(_) => "connection_status",
            Command::MediaStatus(_) => "media_status",
            Command::MessageIngress { .. } => "message_ingress",
            Command::Shutdown => "shutdown",
        }
    }
}

/// Connection lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    /// No device handle is held
    Disconnected,
    /// A lookup and connect is in progress
    Connecting,
    /// A device handle is held and usable
    Connected,
    /// The last connect or push status reported a failure
    Failed,
    /// The session gave up; the worker is winding down
    Dead,
}

/// Handle to one device session.
///
/// Cloning is cheap; all clones feed the same worker mailbox.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    id: DeviceId,
    tx: mpsc::Sender<Command>,
    connected: Arc<AtomicBool>,
}

impl DeviceSession {
    /// Spawn a worker for one device and return its handle.
    pub fn spawn(
        id: DeviceId,
        topic_root: &str,
        bus: Arc<dyn MessageBus>,
        provider: Arc<dyn CastDeviceProvider>,
        dispatcher: EventDispatcher,
        config: &SessionConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.mailbox_capacity);
        let connected = Arc::new(AtomicBool::new(false));

        let worker = SessionWorker {
            id: id.clone(),
            rx,
            tx: tx.clone(),
            channel: PropertyChannel::new(topic_root, id.clone(), bus),
            provider,
            dispatcher,
            connected: connected.clone(),
            state: ConnectionState::Disconnected,
            failures: 0,
            failure_threshold: config.failure_threshold,
            device: None,
            forwarder: None,
        };
        let span = castbridge_core::logging::session_span(id.as_str());
        tokio::spawn(worker.run().instrument(span));

        Self { id, tx, connected }
    }

    /// Device this session belongs to
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Snapshot of the worker's connectivity, for liveness checks
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Whether a topic addresses this session's device
    pub fn matches_topic(&self, topic: &str) -> bool {
        properties::device_id_from_topic(topic) == Some(self.id.as_str())
    }

    /// Queue a command; blocks when the mailbox is full.
    pub async fn enqueue(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::session("session mailbox closed"))
    }

    /// Queue an inbound bus message for decoding on the worker.
    pub async fn forward_message(&self, topic: String, payload: Bytes) -> Result<()> {
        self.enqueue(Command::MessageIngress { topic, payload }).await
    }

    /// Ask the worker to tear down. Safe to call on a dead session.
    pub async fn release(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }
}

struct SessionWorker {
    id: DeviceId,
    rx: mpsc::Receiver<Command>,
    /// Clone handed to the callback forwarder task
    tx: mpsc::Sender<Command>,
    channel: PropertyChannel,
    provider: Arc<dyn CastDeviceProvider>,
    dispatcher: EventDispatcher,
    connected: Arc<AtomicBool>,
    state: ConnectionState,
    failures: u32,
    failure_threshold: u32,
    device: Option<Box<dyn CastDevice>>,
    forwarder: Option<JoinHandle<()>>,
}

impl SessionWorker {
    async fn run(mut self) {
        debug!(device = %self.id, "session worker started");
        if let Err(err) = self.channel.subscribe_topics().await {
            warn!(device = %self.id, error = %err, "command topic subscription failed");
        }

        while let Some(command) = self.rx.recv().await {
            debug!(device = %self.id, command = command.label(), "processing");
            match command {
                Command::Shutdown => {
                    self.shutdown().await;
                    return;
                }
                other => self.process(other).await,
            }
            if self.state == ConnectionState::Dead {
                return;
            }
        }
        debug!(device = %self.id, "session mailbox closed");
    }

    async fn process(&mut self, command: Command) {
        match command {
            Command::CreateConnection => {
                if self.state == ConnectionState::Connected {
                    debug!(device = %self.id, "already connected");
                } else if let Err(err) = self.establish().await {
                    // the eager connect reports a plain error; on-demand
                    // reconnects later map lookup misses to NOT_FOUND
                    warn!(device = %self.id, error = %err, "eager connect failed");
                    if err.is_fatal() {
                        self.escalate_dead().await;
                    } else {
                        self.state = ConnectionState::Failed;
                        self.connected.store(false, Ordering::Relaxed);
                        self.publish_connection(CONNECTION_STATUS_ERROR).await;
                        self.record_failure().await;
                    }
                }
            }
            Command::Request(request) => {
                if let Err(err) = self.try_execute(request).await {
                    self.command_failed(err).await;
                }
            }
            Command::MessageIngress { topic, payload } => {
                if let Some(request) = self.channel.handle(&topic, &payload) {
                    info!(device = %self.id, ?request, "player command received");
                    if let Err(err) = self.try_execute(request).await {
                        self.command_failed(err).await;
                    }
                }
            }
            Command::CastStatus(status) => self.on_cast_status(status).await,
            Command::ConnectionStatus(status) => self.on_connection_status(status).await,
            Command::MediaStatus(status) => self.on_media_status(status).await,
            Command::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    async fn try_execute(
        &mut self,
        request: PlayerRequest,
    ) -> std::result::Result<(), DeviceError> {
        self.ensure_connected().await?;
        let device = self
            .device
            .as_mut()
            .ok_or(DeviceError::ConnectionUnavailable)?;

        match request {
            PlayerRequest::SetMute(muted) => device.set_volume_muted(muted).await,
            PlayerRequest::SetVolumeAbsolute(percent) => {
                device.set_volume(percent.clamp(0, 100) as f64 / 100.0).await
            }
            PlayerRequest::SetVolumeRelative(delta) => {
                let current = (device.volume_level() * 100.0).round() as i64;
                let target = (current + delta).clamp(0, 100);
                device.set_volume(target as f64 / 100.0).await
            }
            PlayerRequest::Seek(position) => device.seek(position as f64).await,
            PlayerRequest::PlayStream { url, content_type } => {
                device.play_media(&url, &content_type, true).await
            }
            PlayerRequest::Pause => device.pause().await,
            PlayerRequest::Resume => device.play().await,
            PlayerRequest::Stop => device.stop().await,
            PlayerRequest::Skip => match device.media_duration() {
                // land just before the end so the player advances by itself
                Some(duration) => device.seek(duration - 1.0).await,
                None => {
                    debug!(device = %self.id, "skip requested without an active media session");
                    Ok(())
                }
            },
            PlayerRequest::Rewind => device.rewind().await,
        }
    }

    async fn ensure_connected(&mut self) -> std::result::Result<(), DeviceError> {
        if self.device.is_some() && self.state == ConnectionState::Connected {
            return Ok(());
        }
        self.establish().await
    }

    async fn establish(&mut self) -> std::result::Result<(), DeviceError> {
        info!(device = %self.id, "connecting");
        self.state = ConnectionState::Connecting;
        self.publish_connection(CONNECTION_STATUS_WAITING).await;

        let link = self.provider.connect(&self.id).await?;
        self.install_link(link);
        self.mark_connected().await;
        Ok(())
    }

    fn install_link(&mut self, link: DeviceLink) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.device = Some(link.device);

        let id = self.id.clone();
        let tx = self.tx.clone();
        let mut events = link.events;
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let command = match event {
                    CastEvent::Cast(status) => Command::CastStatus(status),
                    CastEvent::Connection(status) => Command::ConnectionStatus(status),
                    CastEvent::Media(status) => Command::MediaStatus(status),
                    CastEvent::LaunchError(reason) => {
                        warn!(device = %id, %reason, "application launch failed");
                        continue;
                    }
                };
                if tx.send(command).await.is_err() {
                    break;
                }
            }
        }));
    }

    async fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.connected.store(true, Ordering::Relaxed);
        self.failures = 0;
        self.publish_connection(CastConnectionStatus::Connected.as_str())
            .await;
        self.announce_device().await;
        info!(device = %self.id, "connected");
    }

    /// Publish the static device attributes from the live handle.
    async fn announce_device(&mut self) {
        let data = self
            .device
            .as_ref()
            .map(|d| (d.cast_type().to_string(), d.friendly_name().to_string()));
        if let Some((cast_type, friendly_name)) = data {
            if let Err(err) = self.channel.write_cast_data(&cast_type, &friendly_name).await {
                warn!(device = %self.id, error = %err, "device announcement failed");
            }
        }
    }

    async fn command_failed(&mut self, err: DeviceError) {
        if err.is_fatal() {
            error!(device = %self.id, error = %err, "device handle lost");
            self.escalate_dead().await;
        } else if err.is_connectivity() {
            warn!(device = %self.id, error = %err, "device unreachable");
            self.state = ConnectionState::Failed;
            self.connected.store(false, Ordering::Relaxed);
            self.publish_connection(CONNECTION_STATUS_NOT_FOUND).await;
        } else {
            warn!(device = %self.id, error = %err, "command failed");
            self.publish_connection(CONNECTION_STATUS_ERROR).await;
            self.record_failure().await;
        }
    }

    async fn record_failure(&mut self) {
        self.failures += 1;
        self.dispatcher.notify_session_failed(self.id.clone());
        // counter-based death only applies from a failed connection;
        // command errors on a live handle keep being retried by
        // continuation
        if self.state == ConnectionState::Failed && self.failures > self.failure_threshold {
            warn!(
                device = %self.id,
                failures = self.failures,
                "failure threshold exceeded, giving up on device"
            );
            self.escalate_dead().await;
        }
    }

    async fn on_cast_status(&mut self, status: CastStatus) {
        // any receiver status proves the socket is alive
        self.failures = 0;
        if self.state != ConnectionState::Connected {
            self.state = ConnectionState::Connected;
            self.connected.store(true, Ordering::Relaxed);
            self.publish_connection(CastConnectionStatus::Connected.as_str())
                .await;
            self.announce_device().await;
        }

        if let Err(err) = self
            .channel
            .write_cast_status(
                status.display_name.clone(),
                status.volume_level,
                status.volume_muted,
                status.cast_type.clone(),
                status.friendly_name.clone(),
            )
            .await
        {
            warn!(device = %self.id, error = %err, "cast status publish failed");
        }

        if status.is_idle() {
            if let Err(err) = self
                .channel
                .write_player_status(PLAYER_STATE_IDLE, None, None)
                .await
            {
                warn!(device = %self.id, error = %err, "idle player status publish failed");
            }
        }
    }

    async fn on_connection_status(&mut self, status: CastConnectionStatus) {
        self.publish_connection(status.as_str()).await;
        match status {
            CastConnectionStatus::Connected => {
                self.state = ConnectionState::Connected;
                self.connected.store(true, Ordering::Relaxed);
                self.failures = 0;
                self.announce_device().await;
            }
            CastConnectionStatus::Disconnected => {
                self.state = ConnectionState::Disconnected;
                self.connected.store(false, Ordering::Relaxed);
            }
            CastConnectionStatus::Failed | CastConnectionStatus::Lost => {
                self.state = ConnectionState::Failed;
                self.connected.store(false, Ordering::Relaxed);
                self.record_failure().await;
            }
        }
    }

    async fn on_media_status(&mut self, status: MediaStatus) {
        if let Err(err) = self
            .channel
            .write_player_status(&status.player_state, status.current_time, status.duration)
            .await
        {
            warn!(device = %self.id, error = %err, "player status publish failed");
        }
        if let Err(err) = self.channel.write_media_status(&status).await {
            warn!(device = %self.id, error = %err, "media status publish failed");
        }
    }

    async fn publish_connection(&mut self, status: &str) {
        if let Err(err) = self.channel.write_connection_status(status).await {
            warn!(device = %self.id, error = %err, "connection status publish failed");
        }
    }

    /// Point of no return: tear everything down and tell the dispatcher
    /// to drop this session.
    async fn escalate_dead(&mut self) {
        self.state = ConnectionState::Dead;
        self.connected.store(false, Ordering::Relaxed);
        self.teardown_device().await;
        if let Err(err) = self.channel.unsubscribe_topics().await {
            warn!(device = %self.id, error = %err, "command topic unsubscription failed");
        }
        self.dispatcher.notify_session_dead(self.id.clone());

        // stop producers and fail fast on whatever is already queued
        self.rx.close();
        while let Ok(command) = self.rx.try_recv() {
            debug!(device = %self.id, command = command.label(), "dropping queued command");
        }
        info!(device = %self.id, "session dead");
    }

    async fn shutdown(&mut self) {
        self.connected.store(false, Ordering::Relaxed);
        self.teardown_device().await;
        self.publish_connection(CastConnectionStatus::Disconnected.as_str())
            .await;
        if let Err(err) = self.channel.unsubscribe_topics().await {
            warn!(device = %self.id, error = %err, "command topic unsubscription failed");
        }
        info!(device = %self.id, "session shut down");
    }

    async fn teardown_device(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(mut device) = self.device.take() {
            if let Err(err) = device.disconnect().await {
                debug!(device = %self.id, error = %err, "disconnect failed");
            }
        }
    }
}
