use super::constants::*;
use super::error::{Error, Result};
use super::protocol::{discover_request, Frame};

use regex::Regex;
use serde::Deserialize;
use tokio::{
    net::UdpSocket,
    time::{timeout, Duration},
};

use std::net::SocketAddr;
use std::time::Instant;

/// How to look for devices on the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverMode {
    /// Broadcast over UDP first, probe over HTTP only if nothing answers
    Auto,
    Udp,
    Http,
}

/// Which path produced a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMethod {
    Udp,
    Http,
}

impl std::fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Udp => write!(f, "UDP"),
            Self::Http => write!(f, "HTTP"),
        }
    }
}

/// Device types as defined by the discovery protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Tuner,
    Storage,
    Unknown(u32),
}

impl From<u32> for DeviceType {
    fn from(raw: u32) -> Self {
        match raw {
            DEVICE_TYPE_TUNER => DeviceType::Tuner,
            DEVICE_TYPE_STORAGE => DeviceType::Storage,
            other => DeviceType::Unknown(other),
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tuner => write!(f, "Tuner"),
            Self::Storage => write!(f, "Storage"),
            Self::Unknown(raw) => write!(f, "Unknown({:#010x})", raw),
        }
    }
}

/// Identity of a discovered device.
///
/// Descriptors are immutable once produced; the device id is the stable key
/// across polls, the host is only where the device answered from this time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    device_id: String,
    device_type: DeviceType,
    discovery_method: DiscoveryMethod,
    host: String,
    base_url: Option<String>,
    discover_url: Option<String>,
    lineup_url: Option<String>,
    device_auth: Option<String>,
    tuner_count: Option<u8>,
}

impl DeviceDescriptor {
    /// Device id rendered as eight uppercase hex digits
    pub fn device_id(&self) -> String {
        self.device_id.clone()
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn discovery_method(&self) -> DiscoveryMethod {
        self.discovery_method
    }

    /// IP address the device last answered from
    pub fn host(&self) -> String {
        self.host.clone()
    }

    pub fn base_url(&self) -> Option<String> {
        self.base_url.clone()
    }

    pub fn discover_url(&self) -> Option<String> {
        self.discover_url.clone()
    }

    pub fn lineup_url(&self) -> Option<String> {
        self.lineup_url.clone()
    }

    pub fn device_auth(&self) -> Option<String> {
        self.device_auth.clone()
    }

    pub fn tuner_count(&self) -> Option<u8> {
        self.tuner_count
    }

    fn from_frame(frame: &Frame, host: String) -> Result<Self> {
        if frame.frame_type() != TYPE_DISCOVER_RPY {
            return Err(Error::MalformedPacket(format!(
                "unexpected frame type {:#06x} in discovery reply",
                frame.frame_type()
            )));
        }

        let device_id = frame
            .get_u32(TAG_DEVICE_ID)
            .map(|id| format!("{:08X}", id))
            .ok_or_else(|| Error::MalformedPacket("discovery reply without device id".into()))?;

        Ok(Self {
            device_id,
            device_type: frame
                .get_u32(TAG_DEVICE_TYPE)
                .map(DeviceType::from)
                .unwrap_or(DeviceType::Unknown(0)),
            discovery_method: DiscoveryMethod::Udp,
            host,
            base_url: frame.get_str(TAG_BASE_URL),
            discover_url: None,
            lineup_url: frame.get_str(TAG_LINEUP_URL),
            device_auth: frame.get_str(TAG_DEVICE_AUTH_STR),
            tuner_count: frame.get_u8(TAG_TUNER_COUNT),
        })
    }

    // A device may answer from several interfaces; later replies only fill
    // in fields the first one left empty.
    fn absorb(&mut self, other: DeviceDescriptor) {
        if self.base_url.is_none() {
            self.base_url = other.base_url;
        }
        if self.discover_url.is_none() {
            self.discover_url = other.discover_url;
        }
        if self.lineup_url.is_none() {
            self.lineup_url = other.lineup_url;
        }
        if self.device_auth.is_none() {
            self.device_auth = other.device_auth;
        }
        if self.tuner_count.is_none() {
            self.tuner_count = other.tuner_count;
        }
    }
}

/// Discovery configuration.
///
/// ```no_run
/// # use hdhomerun::{Discover, DiscoverMode};
/// # use std::time::Duration;
/// # async fn run() -> Result<(), hdhomerun::Error> {
/// let devices = Discover::new()
///     .mode(DiscoverMode::Udp)
///     .broadcast_address("192.168.0.255")
///     .timeout(Duration::from_secs(2))
///     .run()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Discover {
    mode: DiscoverMode,
    broadcast_address: String,
    timeout: Duration,
    http_discover_url: String,
}

impl Default for Discover {
    fn default() -> Self {
        Self::new()
    }
}

impl Discover {
    pub fn new() -> Self {
        Self {
            mode: DiscoverMode::Auto,
            broadcast_address: DEFAULT_BROADCAST_ADDRESS.into(),
            timeout: Duration::from_secs(DEFAULT_DISCOVER_TIMEOUT),
            http_discover_url: DEFAULT_HTTP_DISCOVER_URL.into(),
        }
    }

    pub fn mode(mut self, mode: DiscoverMode) -> Self {
        self.mode = mode;
        self
    }

    /// Address the discovery datagram is sent to. This may be a broadcast
    /// address or an individual device IP for targeted rediscovery. A port
    /// may be appended, otherwise the protocol port is used.
    pub fn broadcast_address<S: Into<String>>(mut self, address: S) -> Self {
        self.broadcast_address = address.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Endpoint used for the HTTP probe path
    pub fn http_discover_url<S: Into<String>>(mut self, url: S) -> Self {
        self.http_discover_url = url.into();
        self
    }

    /// Collect descriptors for every device answering within the timeout.
    ///
    /// An empty result is not an error. The call never blocks past the
    /// configured timeout.
    pub async fn run(&self) -> Result<Vec<DeviceDescriptor>> {
        self.run_until(|_| false).await
    }

    /// Like [`run`](Self::run), but stops collecting early once `stop`
    /// returns true for the devices gathered so far.
    pub async fn run_until<F>(&self, mut stop: F) -> Result<Vec<DeviceDescriptor>>
    where
        F: FnMut(&[DeviceDescriptor]) -> bool,
    {
        let mut devices = Vec::new();

        if matches!(self.mode, DiscoverMode::Auto | DiscoverMode::Udp) {
            devices = udp(&self.broadcast_address, self.timeout, &mut stop).await?;
        }

        let fall_back = self.mode == DiscoverMode::Auto && devices.is_empty();
        if self.mode == DiscoverMode::Http || fall_back {
            if fall_back {
                log::debug!("no UDP responses, falling back to HTTP discovery");
            }
            devices = http(&self.http_discover_url, self.timeout).await?;
        }

        Ok(devices)
    }

    /// Targeted discovery: return the descriptor for one device id,
    /// stopping the collection window as soon as it answers.
    pub async fn find(&self, device_id: &str) -> Result<DeviceDescriptor> {
        let found = self
            .run_until(|devices| devices.iter().any(|d| d.device_id == device_id))
            .await?;

        found
            .into_iter()
            .find(|d| d.device_id == device_id)
            .ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))
    }
}

// Broadcast one discovery request and collect replies until the deadline,
// de-duplicating by device id.
async fn udp<F>(target: &str, window: Duration, stop: &mut F) -> Result<Vec<DeviceDescriptor>>
where
    F: FnMut(&[DeviceDescriptor]) -> bool,
{
    let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await?;
    socket.set_broadcast(true)?;

    let target = with_default_port(target, DISCOVER_UDP_PORT);
    let request = discover_request(DEVICE_TYPE_WILDCARD, DEVICE_ID_WILDCARD);
    log::debug!("sending discovery request to {}", target);
    socket.send_to(&request, target.as_str()).await?;

    let deadline = Instant::now() + window;
    let mut devices: Vec<DeviceDescriptor> = Vec::new();
    let mut rbuf = [0; 2048];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let (len, addr) = match timeout(remaining, socket.recv_from(&mut rbuf)).await {
            Err(_) => break,
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(received)) => received,
        };

        let descriptor = Frame::decode(&rbuf[..len])
            .and_then(|frame| DeviceDescriptor::from_frame(&frame, addr.ip().to_string()));
        match descriptor {
            Ok(descriptor) => {
                match devices.iter_mut().find(|d| d.device_id == descriptor.device_id) {
                    Some(existing) => existing.absorb(descriptor),
                    None => devices.push(descriptor),
                }
                if stop(&devices) {
                    break;
                }
            }
            // Not every datagram on this port is a well-formed reply
            Err(e) => log::debug!("ignoring datagram from {}: {}", addr, e),
        }
    }

    log::debug!("{} device(s) found via UDP", devices.len());
    Ok(devices)
}

#[derive(Debug, Deserialize)]
struct HttpDiscoveryEntry {
    #[serde(rename = "DeviceID")]
    device_id: Option<String>,
    #[serde(rename = "StorageID")]
    storage_id: Option<String>,
    #[serde(rename = "LocalIP")]
    local_ip: Option<String>,
    #[serde(rename = "BaseURL")]
    base_url: Option<String>,
    #[serde(rename = "DiscoverURL")]
    discover_url: Option<String>,
    #[serde(rename = "LineupURL")]
    lineup_url: Option<String>,
    #[serde(rename = "DeviceAuth")]
    device_auth: Option<String>,
    #[serde(rename = "TunerCount")]
    tuner_count: Option<u8>,
}

// Probe the discovery endpoint; the body is either a single device object
// or a list of them.
pub(crate) async fn http(discover_url: &str, timeout: Duration) -> Result<Vec<DeviceDescriptor>> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let body: serde_json::Value = client
        .get(discover_url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let entries: Vec<HttpDiscoveryEntry> = match body {
        serde_json::Value::Array(_) => serde_json::from_value(body)?,
        single => vec![serde_json::from_value(single)?],
    };

    let mut devices: Vec<DeviceDescriptor> = Vec::new();
    for entry in entries {
        let device_id = match entry.device_id.clone().or_else(|| entry.storage_id.clone()) {
            Some(id) => id,
            None => continue,
        };

        let host = entry
            .local_ip
            .clone()
            .or_else(|| entry.base_url.as_deref().and_then(host_of))
            .or_else(|| host_of(discover_url));
        let host = match host {
            Some(host) => host,
            None => {
                log::debug!("discovery entry for '{}' has no usable address", device_id);
                continue;
            }
        };

        let device_type = if entry.device_id.is_some() {
            DeviceType::Tuner
        } else {
            DeviceType::Storage
        };

        let descriptor = DeviceDescriptor {
            device_id,
            device_type,
            discovery_method: DiscoveryMethod::Http,
            host,
            base_url: entry.base_url,
            discover_url: entry.discover_url,
            lineup_url: entry.lineup_url,
            device_auth: entry.device_auth,
            tuner_count: entry.tuner_count,
        };

        match devices.iter_mut().find(|d| d.device_id == descriptor.device_id) {
            Some(existing) => existing.absorb(descriptor),
            None => devices.push(descriptor),
        }
    }

    log::debug!("{} device(s) found via HTTP", devices.len());
    Ok(devices)
}

fn with_default_port(address: &str, port: u16) -> String {
    if address.contains(':') {
        address.to_string()
    } else {
        format!("{}:{}", address, port)
    }
}

// Strip scheme and port from a URL, keeping the host. Also handles the
// rtp/udp stream targets the control protocol reports.
pub(crate) fn host_of(url: &str) -> Option<String> {
    Regex::new(r"^(?:[a-z][a-z0-9+.-]*://)?([^/:]+)(?::\d+)?")
        .unwrap()
        .captures(url)
        .map(|caps| caps[1].to_string())
}
