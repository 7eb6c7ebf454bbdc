/*!
 * castbridge Devices
 *
 * This crate defines the collaborator seams of the bridge: the cast
 * device handle and provider, the status payloads devices push, the
 * message bus, and the discovery/bus callback surfaces.
 */

#![warn(missing_docs)]

pub mod bus;
pub mod device;
pub mod discovery;
pub mod status;

// Re-export the main seams
pub use bus::{BusError, MessageBus};
pub use device::{CastDevice, CastDeviceProvider, DeviceError, DeviceLink};
pub use discovery::{BusCallback, DiscoveryCallback};
pub use status::{
    CastConnectionStatus, CastEvent, CastStatus, MediaStatus, CONNECTION_STATUS_ERROR,
    CONNECTION_STATUS_NOT_FOUND, CONNECTION_STATUS_WAITING, IDLE_APP_ID, PLAYER_STATE_IDLE,
};

/// castbridge devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
