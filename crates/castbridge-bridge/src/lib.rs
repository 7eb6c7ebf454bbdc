/*!
 * CastBridge Bridge
 *
 * This crate wires discovered cast devices to a message bus: the event
 * dispatcher owns the session table, each device session publishes its
 * device's attributes and executes player commands received on the bus.
 */

#![warn(missing_docs)]

// Re-export core types for convenience
pub use castbridge_core::types::{DeviceId, PropertyValue};

pub mod dispatcher;
pub mod error;
pub mod properties;
pub mod session;

#[cfg(test)]
mod testutil;

// Re-export main types for convenience
pub use dispatcher::{Event, EventDispatcher, Tier};
pub use error::{Error, Result};
pub use properties::{PlayerRequest, PropertyChannel};
pub use session::{Command, DeviceSession};

/// CastBridge bridge crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the bridge
pub fn init() -> Result<()> {
    tracing::info!("CastBridge Bridge {} initialized", VERSION);
    Ok(())
}
