/*!
 * Device control abstractions.
 *
 * This module defines the handle to one connected cast device and the
 * provider that locates devices on the network and links them up.
 */
use std::fmt::Debug;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use castbridge_core::types::DeviceId;

use crate::status::CastEvent;

/// Error type for device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The device could not be located by name
    #[error("Device not found: {0}")]
    NotFound(DeviceId),

    /// A connection was required but could not be established
    #[error("Connection to device unavailable")]
    ConnectionUnavailable,

    /// The device handle itself became unusable; fatal for the session
    #[error("Device handle lost: {0}")]
    HandleLost(String),

    /// A command failed on an otherwise healthy device
    #[error("Command failed: {0}")]
    Command(String),

    /// The device is in an invalid state for the operation
    #[error("Invalid device state: {0}")]
    InvalidState(String),

    /// Communication error with the device
    #[error("Communication error: {0}")]
    Communication(String),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

impl DeviceError {
    /// Whether this error means the handle is beyond recovery.
    ///
    /// Fatal errors escalate the owning session straight to Dead instead
    /// of going through the failure counter.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeviceError::HandleLost(_))
    }

    /// Whether this error is a connectivity problem rather than a command
    /// failure. Connectivity problems surface as NOT_FOUND on the bus.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            DeviceError::NotFound(_) | DeviceError::ConnectionUnavailable
        )
    }
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Handle to one connected cast device.
///
/// All methods are invoked from a single session worker; implementations
/// do not need to serialize calls themselves.
#[async_trait]
pub trait CastDevice: Send + Debug {
    /// Human-readable device name
    fn friendly_name(&self) -> &str;

    /// Device category (audio, cast, group)
    fn cast_type(&self) -> &str;

    /// Current receiver volume, normalized to 0.0..=1.0
    fn volume_level(&self) -> f64;

    /// Duration of the current media session in seconds, if any
    fn media_duration(&self) -> Option<f64>;

    /// Tear down the socket to the device
    async fn disconnect(&mut self) -> Result<()>;

    /// Mute or unmute the receiver
    async fn set_volume_muted(&mut self, muted: bool) -> Result<()>;

    /// Set the receiver volume, normalized to 0.0..=1.0
    async fn set_volume(&mut self, level: f64) -> Result<()>;

    /// Seek the current media session to a position in seconds
    async fn seek(&mut self, position: f64) -> Result<()>;

    /// Start playback of a stream
    async fn play_media(&mut self, url: &str, content_type: &str, autoplay: bool) -> Result<()>;

    /// Pause the current media session
    async fn pause(&mut self) -> Result<()>;

    /// Resume the current media session
    async fn play(&mut self) -> Result<()>;

    /// Stop the current media session
    async fn stop(&mut self) -> Result<()>;

    /// Rewind the current media session to the start
    async fn rewind(&mut self) -> Result<()>;
}

/// A freshly connected device together with its push-callback stream.
///
/// The receiver yields status callbacks in arrival order; the session
/// forwards them into its own mailbox so that all device work stays on
/// one worker.
#[derive(Debug)]
pub struct DeviceLink {
    /// The connected device handle
    pub device: Box<dyn CastDevice>,
    /// Push callbacks emitted by the device
    pub events: mpsc::Receiver<CastEvent>,
}

/// Locates cast devices on the network and establishes connections.
#[async_trait]
pub trait CastDeviceProvider: Send + Sync + Debug {
    /// Look up a device by its identifier and connect to it.
    ///
    /// Runs synchronously from the caller's point of view; a session
    /// invoking this blocks only its own worker.
    async fn connect(&self, id: &DeviceId) -> Result<DeviceLink>;
}
