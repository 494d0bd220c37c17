//! Client library for SiliconDust HDHomeRun network tuners.
//!
//! Devices are found with [`discover_devices`] (or a configured
//! [`Discover`]), turned into a [`Device`] for the richer HTTP/JSON
//! operations, and controlled at the low level through
//! [`ControlConnection`].

mod constants;
mod control;
mod device;
mod discover;
mod error;
pub mod protocol;

use constants::{DEFAULT_BROADCAST_ADDRESS, DEFAULT_DISCOVER_TIMEOUT};

pub use control::ControlConnection;
pub use device::{Capability, CapabilitySet, Channel, Device, GatherOptions, TunerStatus};
pub use discover::{DeviceDescriptor, DeviceType, Discover, DiscoverMode, DiscoveryMethod};
pub use error::{ControlError, Error, FetchPart, PartialFailure, Result};

use tokio::time::Duration;

/// Discover HDHomeRun devices on the local network
///
/// Broadcasts a discovery request and falls back to an HTTP probe when
/// nothing answers. Returns a deduplicated set of
/// [`DeviceDescriptor`]s; enrich one via [`Device::from_descriptor`].
pub async fn discover_devices() -> Result<Vec<DeviceDescriptor>> {
    Discover::new()
        .mode(DiscoverMode::Auto)
        .broadcast_address(DEFAULT_BROADCAST_ADDRESS)
        .timeout(Duration::from_secs(DEFAULT_DISCOVER_TIMEOUT))
        .run()
        .await
}
