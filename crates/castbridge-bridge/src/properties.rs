/*!
 * Property channel between one device session and the message bus.
 *
 * This module owns topic naming, outbound value encoding with
 * publish-dedup, and inbound payload decoding with echo and duplicate
 * suppression. One channel belongs to exactly one session worker, so the
 * dedup caches need no synchronization.
 */
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use castbridge_core::types::{DeviceId, PropertyValue};
use castbridge_devices::{BusError, MediaStatus, MessageBus};

/// Publish-only attributes.
pub const ATTR_FRIENDLY_NAME: &str = "friendly_name";
/// Connection status attribute.
pub const ATTR_CONNECTION_STATUS: &str = "connection_status";
/// Cast type attribute.
pub const ATTR_CAST_TYPE: &str = "cast_type";
/// Currently running application attribute.
pub const ATTR_CURRENT_APP: &str = "current_app";
/// Media title attribute.
pub const ATTR_MEDIA_TITLE: &str = "media/title";
/// Album name attribute.
pub const ATTR_MEDIA_ALBUM_NAME: &str = "media/album_name";
/// Artist attribute.
pub const ATTR_MEDIA_ARTIST: &str = "media/artist";
/// Album artist attribute.
pub const ATTR_MEDIA_ALBUM_ARTIST: &str = "media/album_artist";
/// Track number attribute.
pub const ATTR_MEDIA_TRACK: &str = "media/track";
/// First artwork URL attribute.
pub const ATTR_MEDIA_IMAGES: &str = "media/images";
/// Content MIME type attribute.
pub const ATTR_MEDIA_CONTENT_TYPE: &str = "media/content_type";
/// Content id (stream URL) attribute.
pub const ATTR_MEDIA_CONTENT_URL: &str = "media/content_url";
/// Media duration attribute.
pub const ATTR_PLAYER_DURATION: &str = "player_duration";

/// Published and subscribed attributes.
pub const ATTR_VOLUME_LEVEL: &str = "volume_level";
/// Mute attribute, "0" or "1" on the wire.
pub const ATTR_VOLUME_MUTED: &str = "volume_muted";
/// Playback position attribute, integer seconds.
pub const ATTR_PLAYER_POSITION: &str = "player_position";
/// Player state attribute; inbound payloads carry command keywords or a
/// two-element `[url, contentType]` array.
pub const ATTR_PLAYER_STATE: &str = "player_state";

/// Attributes every session subscribes to for inbound commands.
const COMMAND_ATTRIBUTES: [&str; 4] = [
    ATTR_VOLUME_LEVEL,
    ATTR_VOLUME_MUTED,
    ATTR_PLAYER_POSITION,
    ATTR_PLAYER_STATE,
];

/// A player command decoded from an inbound bus message.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerRequest {
    /// Mute or unmute the receiver
    SetMute(bool),
    /// Change the volume relative to the current level, in percent
    SetVolumeRelative(i64),
    /// Set the volume to an absolute percentage
    SetVolumeAbsolute(i64),
    /// Seek to a position in seconds
    Seek(i64),
    /// Start playback of a stream
    PlayStream {
        /// Stream URL
        url: String,
        /// Stream MIME type
        content_type: String,
    },
    /// Pause playback
    Pause,
    /// Resume playback
    Resume,
    /// Stop playback
    Stop,
    /// Skip to the end of the current media
    Skip,
    /// Rewind to the start of the current media
    Rewind,
}

/// Wildcard filters the dispatcher subscribes to so that commands for any
/// device are received.
pub fn command_filters(root: &str) -> Vec<String> {
    COMMAND_ATTRIBUTES
        .iter()
        .map(|attr| format!("{}/+/{}", root, attr))
        .collect()
}

/// Extract the device segment of a topic (`<root>/<device>/<attribute>`).
pub fn device_id_from_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.splitn(3, '/');
    let _root = parts.next()?;
    let device = parts.next()?;
    // require an attribute segment as well
    parts.next()?;
    if device.is_empty() {
        None
    } else {
        Some(device)
    }
}

/// Per-session property channel.
#[derive(Debug)]
pub struct PropertyChannel {
    root: String,
    device: DeviceId,
    bus: Arc<dyn MessageBus>,
    /// Last value published per topic, for publish-dedup and echo detection
    published: HashMap<String, String>,
    /// Last inbound value per topic, for duplicate suppression
    received: HashMap<String, String>,
}

impl PropertyChannel {
    /// Create a channel for one device under a topic root.
    pub fn new(root: impl Into<String>, device: DeviceId, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            root: root.into(),
            device,
            bus,
            published: HashMap::new(),
            received: HashMap::new(),
        }
    }

    /// Full topic for an attribute of this channel's device.
    pub fn topic(&self, attribute: &str) -> String {
        format!("{}/{}/{}", self.root, self.device, attribute)
    }

    /// Whether a topic addresses this channel's device.
    pub fn matches_device(&self, topic: &str) -> bool {
        device_id_from_topic(topic) == Some(self.device.as_str())
    }

    /// Subscribe to this device's command topics.
    pub async fn subscribe_topics(&self) -> Result<(), BusError> {
        for attribute in COMMAND_ATTRIBUTES {
            self.bus.subscribe(&self.topic(attribute)).await?;
        }
        Ok(())
    }

    /// Unsubscribe from this device's command topics.
    pub async fn unsubscribe_topics(&self) -> Result<(), BusError> {
        for attribute in COMMAND_ATTRIBUTES {
            self.bus.unsubscribe(&self.topic(attribute)).await?;
        }
        Ok(())
    }

    /// Encode a value for the wire.
    ///
    /// Floats inside 0..=1 are normalized levels and scale to a 0-100
    /// integer; other floats round to integers; booleans become "1"/"0";
    /// null becomes an empty payload.
    fn encode(value: &PropertyValue) -> String {
        match value {
            PropertyValue::Null => String::new(),
            PropertyValue::Bool(true) => "1".to_string(),
            PropertyValue::Bool(false) => "0".to_string(),
            PropertyValue::Int(i) => i.to_string(),
            PropertyValue::Float(f) if (0.0..=1.0).contains(f) => {
                ((f * 100.0).round() as i64).to_string()
            }
            PropertyValue::Float(f) => (f.round() as i64).to_string(),
            PropertyValue::Text(s) => s.clone(),
        }
    }

    /// Publish an attribute value, skipping the publish if it matches the
    /// last value written to that exact topic.
    pub async fn write(
        &mut self,
        attribute: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<(), BusError> {
        let encoded = Self::encode(&value.into());
        let topic = self.topic(attribute);

        if self.published.get(&topic) == Some(&encoded) {
            return Ok(());
        }
        self.published.insert(topic.clone(), encoded.clone());

        self.bus.publish(&topic, &encoded, true).await
    }

    /// Publish the fields of a receiver status.
    ///
    /// Device type and name are only written when the status carries them,
    /// so a sparse status cannot blank out an earlier announcement.
    pub async fn write_cast_status(
        &mut self,
        app_name: Option<String>,
        volume_level: f64,
        volume_muted: bool,
        cast_type: Option<String>,
        friendly_name: Option<String>,
    ) -> Result<(), BusError> {
        self.write(ATTR_CURRENT_APP, app_name).await?;
        self.write(ATTR_VOLUME_LEVEL, volume_level).await?;
        self.write(ATTR_VOLUME_MUTED, volume_muted).await?;
        if let Some(cast_type) = cast_type {
            self.write(ATTR_CAST_TYPE, cast_type).await?;
        }
        if let Some(friendly_name) = friendly_name {
            self.write(ATTR_FRIENDLY_NAME, friendly_name).await?;
        }
        Ok(())
    }

    /// Publish the player state, position and duration.
    pub async fn write_player_status(
        &mut self,
        state: &str,
        position: Option<f64>,
        duration: Option<f64>,
    ) -> Result<(), BusError> {
        self.write(ATTR_PLAYER_STATE, state).await?;
        self.write(ATTR_PLAYER_POSITION, position).await?;
        self.write(ATTR_PLAYER_DURATION, duration).await
    }

    /// Publish the metadata fields of a media status.
    pub async fn write_media_status(&mut self, status: &MediaStatus) -> Result<(), BusError> {
        self.write(ATTR_MEDIA_TITLE, status.title.clone()).await?;
        self.write(ATTR_MEDIA_ALBUM_NAME, status.album_name.clone())
            .await?;
        self.write(ATTR_MEDIA_ARTIST, status.artist.clone()).await?;
        self.write(ATTR_MEDIA_ALBUM_ARTIST, status.album_artist.clone())
            .await?;
        self.write(ATTR_MEDIA_TRACK, status.track).await?;
        self.write(ATTR_MEDIA_IMAGES, status.first_image().map(str::to_string))
            .await?;
        self.write(ATTR_MEDIA_CONTENT_TYPE, status.content_type.clone())
            .await?;
        self.write(ATTR_MEDIA_CONTENT_URL, status.content_id.clone())
            .await
    }

    /// Publish the device type and name.
    pub async fn write_cast_data(
        &mut self,
        cast_type: &str,
        friendly_name: &str,
    ) -> Result<(), BusError> {
        self.write(ATTR_CAST_TYPE, cast_type).await?;
        self.write(ATTR_FRIENDLY_NAME, friendly_name).await
    }

    /// Publish a connection status value.
    pub async fn write_connection_status(&mut self, status: &str) -> Result<(), BusError> {
        self.write(ATTR_CONNECTION_STATUS, status).await
    }

    /// Decode an inbound message into a player request.
    ///
    /// Returns `None` for echoes of values this channel published itself,
    /// duplicate payloads, unknown attributes and malformed payloads.
    pub fn handle(&mut self, topic: &str, payload: &Bytes) -> Option<PlayerRequest> {
        let text = match std::str::from_utf8(payload) {
            Ok(text) => text.trim(),
            Err(err) => {
                warn!(topic, error = %err, "ignoring non-text payload");
                return None;
            }
        };

        if self.published.get(topic).map(String::as_str) == Some(text) {
            warn!(topic, value = text, "ignoring echo of an own write");
            return None;
        }
        if self.received.get(topic).map(String::as_str) == Some(text) {
            warn!(topic, value = text, "ignoring duplicate payload");
            return None;
        }
        self.received.insert(topic.to_string(), text.to_string());

        let prefix = format!("{}/{}/", self.root, self.device);
        let attribute = topic.strip_prefix(&prefix)?;

        match attribute {
            ATTR_VOLUME_MUTED => self.decode_mute(text),
            ATTR_VOLUME_LEVEL => self.decode_volume(text),
            ATTR_PLAYER_POSITION => self.decode_position(text),
            ATTR_PLAYER_STATE => self.decode_player_state(text),
            _ => {
                debug!(topic, "no handler for attribute");
                None
            }
        }
    }

    fn decode_mute(&self, text: &str) -> Option<PlayerRequest> {
        match text {
            "1" => Some(PlayerRequest::SetMute(true)),
            "0" => Some(PlayerRequest::SetMute(false)),
            other => {
                warn!(value = other, "ignoring invalid mute payload");
                None
            }
        }
    }

    fn decode_volume(&self, text: &str) -> Option<PlayerRequest> {
        // look only at the first byte; payloads can be arbitrarily short
        let relative = matches!(text.as_bytes().first(), Some(b'+') | Some(b'-'));

        match text.parse::<i64>() {
            Ok(value) if relative => Some(PlayerRequest::SetVolumeRelative(
                value.clamp(-100, 100),
            )),
            Ok(value) => Some(PlayerRequest::SetVolumeAbsolute(value.clamp(0, 100))),
            Err(err) => {
                warn!(value = text, error = %err, "ignoring unparsable volume payload");
                None
            }
        }
    }

    fn decode_position(&self, text: &str) -> Option<PlayerRequest> {
        match text.parse::<i64>() {
            Ok(position) => Some(PlayerRequest::Seek(position)),
            Err(err) => {
                warn!(value = text, error = %err, "ignoring unparsable position payload");
                None
            }
        }
    }

    fn decode_player_state(&self, text: &str) -> Option<PlayerRequest> {
        match text {
            "PAUSE" => return Some(PlayerRequest::Pause),
            "RESUME" => return Some(PlayerRequest::Resume),
            "STOP" => return Some(PlayerRequest::Stop),
            "SKIP" => return Some(PlayerRequest::Skip),
            "REWIND" => return Some(PlayerRequest::Rewind),
            _ => {}
        }

        match serde_json::from_str::<Vec<String>>(text) {
            Ok(parts) => {
                if let [url, content_type] = parts.as_slice() {
                    Some(PlayerRequest::PlayStream {
                        url: url.clone(),
                        content_type: content_type.clone(),
                    })
                } else {
                    warn!(value = text, "ignoring stream payload with wrong arity");
                    None
                }
            }
            Err(err) => {
                warn!(value = text, error = %err, "ignoring unparsable player state payload");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingBus;

    fn channel(bus: Arc<RecordingBus>) -> PropertyChannel {
        PropertyChannel::new("chromecast", "dev1".into(), bus)
    }

    fn payload(text: &str) -> Bytes {
        Bytes::copy_from_slice(text.as_bytes())
    }

    #[test]
    fn test_device_id_from_topic() {
        assert_eq!(
            device_id_from_topic("chromecast/dev1/player_state"),
            Some("dev1")
        );
        assert_eq!(
            device_id_from_topic("chromecast/dev1/media/title"),
            Some("dev1")
        );
        assert_eq!(device_id_from_topic("chromecast/dev1"), None);
        assert_eq!(device_id_from_topic("chromecast"), None);
        assert_eq!(device_id_from_topic("chromecast//x"), None);
    }

    #[test]
    fn test_command_filters() {
        let filters = command_filters("chromecast");
        assert_eq!(
            filters,
            vec![
                "chromecast/+/volume_level",
                "chromecast/+/volume_muted",
                "chromecast/+/player_position",
                "chromecast/+/player_state",
            ]
        );
    }

    #[test]
    fn test_encoding_rules() {
        assert_eq!(PropertyChannel::encode(&PropertyValue::Null), "");
        assert_eq!(PropertyChannel::encode(&PropertyValue::Bool(true)), "1");
        assert_eq!(PropertyChannel::encode(&PropertyValue::Bool(false)), "0");
        assert_eq!(PropertyChannel::encode(&PropertyValue::Int(42)), "42");
        // floats inside 0..=1 are normalized levels
        assert_eq!(PropertyChannel::encode(&PropertyValue::Float(0.35)), "35");
        assert_eq!(PropertyChannel::encode(&PropertyValue::Float(1.0)), "100");
        assert_eq!(PropertyChannel::encode(&PropertyValue::Float(0.0)), "0");
        // other floats round to whole numbers
        assert_eq!(
            PropertyChannel::encode(&PropertyValue::Float(13938.85)),
            "13939"
        );
        assert_eq!(
            PropertyChannel::encode(&PropertyValue::Text("PLAYING".to_string())),
            "PLAYING"
        );
    }

    #[tokio::test]
    async fn test_write_dedup() {
        let bus = Arc::new(RecordingBus::default());
        let mut channel = channel(bus.clone());

        channel.write(ATTR_VOLUME_LEVEL, 0.35).await.unwrap();
        channel.write(ATTR_VOLUME_LEVEL, 0.35).await.unwrap();
        channel.write(ATTR_VOLUME_LEVEL, 0.35).await.unwrap();
        assert_eq!(bus.published().len(), 1);

        channel.write(ATTR_VOLUME_LEVEL, 0.5).await.unwrap();
        assert_eq!(bus.published().len(), 2);
        assert_eq!(
            bus.last_for("chromecast/dev1/volume_level"),
            Some("50".to_string())
        );
    }

    #[tokio::test]
    async fn test_handle_ignores_echo_of_own_write() {
        let bus = Arc::new(RecordingBus::default());
        let mut channel = channel(bus);

        channel.write(ATTR_VOLUME_MUTED, true).await.unwrap();

        // the broker echoes the retained value back to the subscriber
        let echo = channel.handle("chromecast/dev1/volume_muted", &payload("1"));
        assert_eq!(echo, None);

        let change = channel.handle("chromecast/dev1/volume_muted", &payload("0"));
        assert_eq!(change, Some(PlayerRequest::SetMute(false)));
    }

    #[tokio::test]
    async fn test_handle_ignores_duplicate_payloads() {
        let bus = Arc::new(RecordingBus::default());
        let mut channel = channel(bus);

        let first = channel.handle("chromecast/dev1/player_position", &payload("30"));
        assert_eq!(first, Some(PlayerRequest::Seek(30)));

        let second = channel.handle("chromecast/dev1/player_position", &payload("30"));
        assert_eq!(second, None);

        let third = channel.handle("chromecast/dev1/player_position", &payload("31"));
        assert_eq!(third, Some(PlayerRequest::Seek(31)));
    }

    #[tokio::test]
    async fn test_volume_decoding_and_clamping() {
        let bus = Arc::new(RecordingBus::default());
        let mut channel = channel(bus);
        let topic = "chromecast/dev1/volume_level";

        assert_eq!(
            channel.handle(topic, &payload("+150")),
            Some(PlayerRequest::SetVolumeRelative(100))
        );
        assert_eq!(
            channel.handle(topic, &payload("-5")),
            Some(PlayerRequest::SetVolumeRelative(-5))
        );
        assert_eq!(
            channel.handle(topic, &payload("250")),
            Some(PlayerRequest::SetVolumeAbsolute(100))
        );
        assert_eq!(
            channel.handle(topic, &payload("40")),
            Some(PlayerRequest::SetVolumeAbsolute(40))
        );
        // parse failures are dropped
        assert_eq!(channel.handle(topic, &payload("loud")), None);
        // a bare sign is not a number
        assert_eq!(channel.handle(topic, &payload("+")), None);
    }

    #[tokio::test]
    async fn test_mute_decoding_is_strict() {
        let bus = Arc::new(RecordingBus::default());
        let mut channel = channel(bus);
        let topic = "chromecast/dev1/volume_muted";

        assert_eq!(
            channel.handle(topic, &payload(" 1 ")),
            Some(PlayerRequest::SetMute(true))
        );
        assert_eq!(channel.handle(topic, &payload("2")), None);
        assert_eq!(channel.handle(topic, &payload("true")), None);
    }

    #[tokio::test]
    async fn test_player_state_keywords() {
        let bus = Arc::new(RecordingBus::default());
        let mut channel = channel(bus);
        let topic = "chromecast/dev1/player_state";

        assert_eq!(
            channel.handle(topic, &payload("PAUSE")),
            Some(PlayerRequest::Pause)
        );
        assert_eq!(
            channel.handle(topic, &payload("RESUME")),
            Some(PlayerRequest::Resume)
        );
        assert_eq!(
            channel.handle(topic, &payload("STOP")),
            Some(PlayerRequest::Stop)
        );
        assert_eq!(
            channel.handle(topic, &payload("SKIP")),
            Some(PlayerRequest::Skip)
        );
        assert_eq!(
            channel.handle(topic, &payload("REWIND")),
            Some(PlayerRequest::Rewind)
        );
    }

    #[tokio::test]
    async fn test_player_state_stream_payload() {
        let bus = Arc::new(RecordingBus::default());
        let mut channel = channel(bus);
        let topic = "chromecast/dev1/player_state";

        assert_eq!(
            channel.handle(topic, &payload(r#"["http://x/a.mp3","audio/mpeg"]"#)),
            Some(PlayerRequest::PlayStream {
                url: "http://x/a.mp3".to_string(),
                content_type: "audio/mpeg".to_string(),
            })
        );

        assert_eq!(channel.handle(topic, &payload("not-json")), None);
        assert_eq!(channel.handle(topic, &payload(r#"["only-url"]"#)), None);
        assert_eq!(channel.handle(topic, &payload(r#"["a","b","c"]"#)), None);
    }

    #[tokio::test]
    async fn test_handle_rejects_foreign_topics() {
        let bus = Arc::new(RecordingBus::default());
        let mut channel = channel(bus);

        assert_eq!(
            channel.handle("chromecast/other/player_position", &payload("5")),
            None
        );
    }

    #[tokio::test]
    async fn test_subscription_lifecycle() {
        let bus = Arc::new(RecordingBus::default());
        let channel = channel(bus.clone());

        channel.subscribe_topics().await.unwrap();
        let subs = bus.subscriptions();
        assert_eq!(subs.len(), 4);
        assert!(subs.contains(&"chromecast/dev1/volume_level".to_string()));
        assert!(subs.contains(&"chromecast/dev1/player_state".to_string()));

        channel.unsubscribe_topics().await.unwrap();
        assert_eq!(bus.unsubscriptions().len(), 4);
    }

    #[test]
    fn test_matches_device() {
        let channel = channel(Arc::new(RecordingBus::default()));
        assert!(channel.matches_device("chromecast/dev1/player_state"));
        assert!(!channel.matches_device("chromecast/dev2/player_state"));
        assert!(!channel.matches_device("dev1"));
    }
}
