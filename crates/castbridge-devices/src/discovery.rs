/*!
 * Discovery and bus callback seams.
 *
 * The discovery mechanism (mDNS in production) and the bus client both
 * run outside the bridge and report in through these traits. The event
 * dispatcher implements both; implementations must return quickly and
 * never block on device I/O.
 */
use castbridge_core::types::DeviceId;

use bytes::Bytes;

/// Notifications from the device discovery mechanism.
pub trait DiscoveryCallback: Send + Sync {
    /// A device appeared on the network
    fn on_appeared(&self, id: DeviceId, model_name: &str, address: &str, port: u16);

    /// A device disappeared from the network
    fn on_disappeared(&self, id: DeviceId);
}

/// Notifications from the message bus client.
pub trait BusCallback: Send + Sync {
    /// The bus connection was (re-)established; subscriptions must be
    /// renewed here
    fn on_connected(&self);

    /// A message arrived on a subscribed topic
    fn on_message(&self, topic: &str, payload: Bytes);
}
