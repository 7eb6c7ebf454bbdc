/*!
 * Status payloads pushed by cast devices.
 *
 * Devices report three independent status streams: receiver ("cast")
 * status, socket connection status and media player status. The structs
 * here are the bridge-side representation of those callbacks.
 */
use serde::{Deserialize, Serialize};

/// Application id reported by an idle receiver showing the backdrop.
pub const IDLE_APP_ID: &str = "E8C28D3C";

/// Player state reported while no media session is active.
pub const PLAYER_STATE_IDLE: &str = "IDLE";

/// Connection status synthesized by the bridge while a device lookup is
/// in progress.
pub const CONNECTION_STATUS_WAITING: &str = "WAITING";

/// Connection status synthesized by the bridge after a generic failure.
pub const CONNECTION_STATUS_ERROR: &str = "ERROR";

/// Connection status synthesized by the bridge when a device cannot be
/// located by name.
pub const CONNECTION_STATUS_NOT_FOUND: &str = "NOT_FOUND";

/// Receiver status pushed by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastStatus {
    /// Id of the running application, if any
    pub app_id: Option<String>,
    /// Display name of the running application
    pub display_name: Option<String>,
    /// Receiver volume, normalized to 0.0..=1.0
    pub volume_level: f64,
    /// Whether the receiver is muted
    pub volume_muted: bool,
    /// Device category reported by the receiver (audio, cast, group)
    pub cast_type: Option<String>,
    /// Human-readable device name
    pub friendly_name: Option<String>,
}

impl CastStatus {
    /// Whether the receiver is idle (no app, or only the backdrop)
    pub fn is_idle(&self) -> bool {
        match &self.app_id {
            None => true,
            Some(id) => id == IDLE_APP_ID,
        }
    }
}

/// Socket connection status pushed by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CastConnectionStatus {
    /// The socket to the device is established
    Connected,
    /// The socket was closed in an orderly fashion
    Disconnected,
    /// Connecting or keeping the socket alive failed
    Failed,
    /// The device vanished mid-connection
    Lost,
}

impl CastConnectionStatus {
    /// Wire representation published on the bus
    pub fn as_str(&self) -> &'static str {
        match self {
            CastConnectionStatus::Connected => "CONNECTED",
            CastConnectionStatus::Disconnected => "DISCONNECTED",
            CastConnectionStatus::Failed => "FAILED",
            CastConnectionStatus::Lost => "LOST",
        }
    }
}

/// Media player status pushed by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaStatus {
    /// Player state keyword (PLAYING, PAUSED, BUFFERING, IDLE, ...)
    pub player_state: String,
    /// Playback position in seconds
    pub current_time: Option<f64>,
    /// Media duration in seconds
    pub duration: Option<f64>,
    /// Track title
    pub title: Option<String>,
    /// Album name
    pub album_name: Option<String>,
    /// Artist
    pub artist: Option<String>,
    /// Album artist
    pub album_artist: Option<String>,
    /// Track number
    pub track: Option<i64>,
    /// Artwork URLs; only the first one is surfaced on the bus
    pub images: Vec<String>,
    /// MIME type of the content
    pub content_type: Option<String>,
    /// Content id, usually the stream URL
    pub content_id: Option<String>,
}

impl MediaStatus {
    /// First artwork URL, if any
    pub fn first_image(&self) -> Option<&str> {
        self.images.first().map(String::as_str)
    }
}

/// One push callback from a device, in arrival order.
#[derive(Debug, Clone)]
pub enum CastEvent {
    /// Receiver status update
    Cast(CastStatus),
    /// Connection status update
    Connection(CastConnectionStatus),
    /// Media player status update
    Media(MediaStatus),
    /// Application launch failure; informational only
    LaunchError(String),
}
