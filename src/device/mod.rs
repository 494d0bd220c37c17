use super::constants::*;
use super::control::ControlConnection;
use super::discover::{host_of, DeviceDescriptor, Discover, DiscoverMode, DiscoveryMethod};
use super::error::{Error, FetchPart, PartialFailure, Result};

mod capability;
mod status;

pub use self::capability::{Capability, CapabilitySet};
pub use self::status::{Channel, TunerStatus};

use self::status::DiscoverJson;

use reqwest::Client;
use tokio::time::Duration;

/// Which sub-fetches [`Device::gather_details`] should perform.
///
/// The identity fetch is mandatory when requested; lineup and tuner status
/// are optional and their failures are contained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatherOptions {
    pub discover: bool,
    pub lineup: bool,
    pub tuner_status: bool,
}

impl GatherOptions {
    pub fn all() -> Self {
        Self {
            discover: true,
            lineup: true,
            tuner_status: true,
        }
    }

    pub fn identity() -> Self {
        Self {
            discover: true,
            lineup: false,
            tuner_status: false,
        }
    }
}

impl Default for GatherOptions {
    fn default() -> Self {
        Self::all()
    }
}

/// An HDHomeRun device.
///
/// A `Device` is created empty at discovery time (identity only) and
/// enriched by [`gather_details`](Self::gather_details) and
/// [`refresh_tuner_status`](Self::refresh_tuner_status). The caller owns the
/// value; refresh methods take `&mut self`, so one writer at a time by
/// construction. Failed refreshes keep the last-known-good data visible and
/// only flip [`online`](Self::online).
#[derive(Debug, Clone)]
pub struct Device {
    descriptor: DeviceDescriptor,
    host: String,
    friendly_name: Option<String>,
    base_url: Option<String>,
    discover_url: Option<String>,
    lineup_url: Option<String>,
    device_auth: Option<String>,
    tuner_count: Option<u8>,
    model: Option<String>,
    hw_model: Option<String>,
    installed_version: Option<String>,
    latest_version: Option<String>,
    online: bool,
    tuner_status: Vec<TunerStatus>,
    channels: Vec<Channel>,
    capabilities: CapabilitySet,
    old_firmware_signaled: bool,
    client: Client,
}

impl Device {
    /// Build a device client from a discovery descriptor.
    pub fn from_descriptor(descriptor: DeviceDescriptor) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT))
            .build()?;

        Ok(Self {
            host: descriptor.host(),
            friendly_name: None,
            base_url: descriptor.base_url(),
            discover_url: descriptor.discover_url(),
            lineup_url: descriptor.lineup_url(),
            device_auth: descriptor.device_auth(),
            tuner_count: descriptor.tuner_count(),
            model: None,
            hw_model: None,
            installed_version: None,
            latest_version: None,
            online: true,
            tuner_status: Vec::new(),
            channels: Vec::new(),
            capabilities: CapabilitySet::default(),
            old_firmware_signaled: false,
            descriptor,
            client,
        })
    }

    /// Connect to a device directly by IP address, probing its discovery
    /// endpoint for identity.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use hdhomerun::Device;
    /// #
    /// # async fn connect() -> Result<Device, hdhomerun::Error> {
    /// let dev = Device::from_host("192.168.0.20").await?;
    /// println!("{}", dev.device_id());
    /// // > "1234ABCD"
    /// # Ok(dev)
    /// # }
    /// ```
    pub async fn from_host<S: Into<String>>(host: S) -> Result<Self> {
        let host = host.into();
        let url = format!("http://{}/{}", host, DEF_DISCOVER);
        let mut found =
            super::discover::http(&url, Duration::from_secs(DEFAULT_TIMEOUT)).await?;
        if found.is_empty() {
            return Err(Error::DeviceNotFound(host));
        }
        Self::from_descriptor(found.swap_remove(0))
    }

    // region #-- read-only snapshot --#

    /// The descriptor this device was created from, with the address it
    /// last answered from
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Device id, the stable identity key across IP changes
    pub fn device_id(&self) -> String {
        self.descriptor.device_id()
    }

    /// Current IP address
    pub fn host(&self) -> String {
        self.host.clone()
    }

    pub fn discovery_method(&self) -> DiscoveryMethod {
        self.descriptor.discovery_method()
    }

    pub fn friendly_name(&self) -> Option<String> {
        self.friendly_name.clone()
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

    /// Firmware name, e.g. `hdhomerun4_atsc`
    pub fn model(&self) -> Option<String> {
        self.model.clone()
    }

    /// Hardware model number, e.g. `HDHR4-2US`
    pub fn hw_model(&self) -> Option<String> {
        self.hw_model.clone()
    }

    pub fn installed_version(&self) -> Option<String> {
        self.installed_version.clone()
    }

    pub fn latest_version(&self) -> Option<String> {
        self.latest_version.clone()
    }

    pub fn update_available(&self) -> bool {
        self.latest_version.is_some()
    }

    /// Outcome of the most recent network operation. Stale data stays
    /// visible while this is false.
    pub fn online(&self) -> bool {
        self.online
    }

    pub fn tuner_status(&self) -> &[TunerStatus] {
        &self.tuner_status
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    /// Look up one tuner's status by resource name, e.g. `tuner0`
    pub fn tuner(&self, resource: &str) -> Option<&TunerStatus> {
        self.tuner_status
            .iter()
            .find(|t| t.resource().eq_ignore_ascii_case(resource))
    }

    // endregion

    /// Fetch the requested detail documents and fold them into the device.
    ///
    /// The requested sub-fetches run concurrently. A failed identity fetch
    /// fails the whole call with [`Error::UpdateFailed`]. Failures of the
    /// optional parts leave the previous values in place and are reported
    /// in the returned [`PartialFailure`]; `Ok(None)` means everything
    /// requested succeeded.
    pub async fn gather_details(
        &mut self,
        include: GatherOptions,
    ) -> Result<Option<PartialFailure>> {
        if !include.discover && !include.lineup && !include.tuner_status {
            return Err(Error::Other("no details were requested".into()));
        }

        let want_lineup = include.lineup && self.capabilities.allows(FetchPart::Lineup);
        let want_status = include.tuner_status && self.capabilities.allows(FetchPart::TunerStatus);

        let identity_fut = async {
            if include.discover {
                Some(self.fetch_json::<DiscoverJson>(&self.endpoint(DEF_DISCOVER)).await)
            } else {
                None
            }
        };
        let lineup_fut = async {
            if want_lineup {
                Some(self.fetch_json::<Vec<Channel>>(&self.endpoint(DEF_LINEUP)).await)
            } else {
                None
            }
        };
        let status_fut = async {
            if want_status {
                Some(
                    self.fetch_json::<Vec<TunerStatus>>(&self.endpoint(DEF_TUNER_STATUS))
                        .await,
                )
            } else {
                None
            }
        };

        let (identity, lineup, status) = tokio::join!(identity_fut, lineup_fut, status_fut);

        let mut failed: Vec<FetchPart> = Vec::new();
        let mut transport_failure = false;

        match identity {
            Some(Ok(json)) => self.apply_identity(json),
            Some(Err(e)) => {
                self.online = false;
                return Err(Error::UpdateFailed(format!(
                    "identity fetch for '{}' failed: {}",
                    self.device_id(),
                    e
                )));
            }
            None => {}
        }

        match lineup {
            Some(Ok(channels)) => {
                self.capabilities.record(FetchPart::Lineup, true);
                self.channels = channels;
            }
            Some(Err(e)) => {
                failed.push(FetchPart::Lineup);
                if e.is_status() {
                    self.capabilities.record(FetchPart::Lineup, false);
                } else {
                    transport_failure = true;
                }
                log::warn!("lineup fetch for '{}' failed: {}", self.device_id(), e);
            }
            None => {}
        }

        match status {
            Some(Ok(tuners)) => {
                self.capabilities.record(FetchPart::TunerStatus, true);
                self.tuner_status = tuners;
            }
            Some(Err(e)) => {
                failed.push(FetchPart::TunerStatus);
                if e.is_status() {
                    self.mark_old_firmware();
                } else {
                    transport_failure = true;
                    log::warn!(
                        "tuner status fetch for '{}' failed: {}",
                        self.device_id(),
                        e
                    );
                }
            }
            None => {}
        }

        self.online = !transport_failure;

        if failed.is_empty() {
            Ok(None)
        } else {
            Ok(Some(PartialFailure::new(failed)))
        }
    }

    /// Fetch only the tuner status document.
    ///
    /// On success the whole status sequence is replaced. On transport
    /// failure the previous sequence stays visible, `online` flips false and
    /// the caller gets [`Error::UpdateFailed`] to retry on its own cadence.
    /// A device whose firmware lacks the endpoint yields
    /// [`Error::OldFirmware`] exactly once; later calls are silent no-ops so
    /// the caller can drop the polling path without seeing the same failure
    /// every cycle.
    pub async fn refresh_tuner_status(&mut self) -> Result<()> {
        if !self.capabilities.allows(FetchPart::TunerStatus) {
            if !self.old_firmware_signaled {
                self.old_firmware_signaled = true;
                return Err(Error::OldFirmware(self.device_id()));
            }
            return Ok(());
        }

        if !self.has_http_surface() {
            return self.refresh_tuner_status_tcp().await;
        }

        match self
            .fetch_json::<Vec<TunerStatus>>(&self.endpoint(DEF_TUNER_STATUS))
            .await
        {
            Ok(tuners) => {
                self.capabilities.record(FetchPart::TunerStatus, true);
                self.tuner_status = tuners;
                self.online = true;
                Ok(())
            }
            Err(e) if e.is_status() => {
                self.mark_old_firmware();
                if self.old_firmware_signaled {
                    Ok(())
                } else {
                    self.old_firmware_signaled = true;
                    Err(Error::OldFirmware(self.device_id()))
                }
            }
            Err(e) => {
                self.online = false;
                Err(Error::UpdateFailed(format!(
                    "tuner status refresh for '{}' failed: {}",
                    self.device_id(),
                    e
                )))
            }
        }
    }

    /// Re-resolve the device's current address by its id and refresh.
    ///
    /// The last known address is asked first, over UDP and then over its
    /// HTTP discovery endpoint, before the given broadcast address is
    /// tried. [`Error::DeviceNotFound`] means the id answered nowhere;
    /// callers treat that as extended offline, not as fatal.
    pub async fn rediscover(
        &mut self,
        broadcast_address: &str,
        timeout: Duration,
    ) -> Result<Option<PartialFailure>> {
        let device_id = self.device_id();

        let targeted = Discover::new()
            .mode(DiscoverMode::Udp)
            .broadcast_address(self.host.clone())
            .timeout(timeout);
        let descriptor = match targeted.find(&device_id).await {
            Ok(descriptor) => descriptor,
            Err(_) => match self.rediscover_http(&device_id, timeout).await {
                Some(descriptor) => descriptor,
                None => {
                    log::debug!(
                        "device '{}' not at {}, asking {}",
                        device_id,
                        self.host,
                        broadcast_address
                    );
                    let wide = Discover::new()
                        .mode(DiscoverMode::Udp)
                        .broadcast_address(broadcast_address)
                        .timeout(timeout);
                    match wide.find(&device_id).await {
                        Ok(descriptor) => descriptor,
                        Err(e) => {
                            if e.is_device_not_found() {
                                self.online = false;
                            }
                            return Err(e);
                        }
                    }
                }
            },
        };

        self.adopt(descriptor);

        if self.has_http_surface() {
            self.gather_details(GatherOptions::all()).await
        } else {
            // Legacy device with no web surface; scrape what the control
            // port offers instead
            self.gather_identity_tcp().await?;
            self.online = true;
            Ok(Some(PartialFailure::new(vec![FetchPart::Discover])))
        }
    }

    /// Restart the device over the control port.
    pub async fn restart(&self) -> Result<()> {
        ControlConnection::connect(self.host.clone()).await?.restart().await
    }

    /// Read a named protocol variable, e.g. `/sys/version`.
    pub async fn get_protocol_variable(&self, name: &str) -> Result<String> {
        let mut control = ControlConnection::connect(self.host.clone()).await?;
        control.get_var(name).await
    }

    /// Write a named protocol variable, e.g. `/tuner0/channel`.
    pub async fn set_protocol_variable(&self, name: &str, value: &str) -> Result<String> {
        let mut control = ControlConnection::connect(self.host.clone()).await?;
        control.set_var(name, value).await
    }

    // UDP may be filtered on the networks where the HTTP path found the
    // device in the first place; its own discovery endpoint is asked
    // before anything is broadcast
    async fn rediscover_http(&self, device_id: &str, timeout: Duration) -> Option<DeviceDescriptor> {
        let url = format!("http://{}/{}", self.host, DEF_DISCOVER);
        match super::discover::http(&url, timeout).await {
            Ok(found) => found
                .into_iter()
                .find(|d| d.device_id().eq_ignore_ascii_case(device_id)),
            Err(e) => {
                log::debug!("http probe of {} failed: {}", url, e);
                None
            }
        }
    }

    fn has_http_surface(&self) -> bool {
        self.discover_url.is_some() || self.base_url.is_some()
    }

    // Prefer the urls the device itself advertised; fall back to the
    // well-known paths on its current address
    fn endpoint(&self, name: &str) -> String {
        if name == DEF_DISCOVER {
            if let Some(url) = &self.discover_url {
                return url.clone();
            }
        }
        if name == DEF_LINEUP {
            if let Some(url) = &self.lineup_url {
                return url.clone();
            }
        }
        match &self.base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), name),
            None => format!("http://{}/{}", self.host, name),
        }
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> std::result::Result<T, reqwest::Error> {
        log::debug!("fetching {}", url);
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    fn apply_identity(&mut self, json: DiscoverJson) {
        if let Some(id) = &json.device_id {
            if !id.eq_ignore_ascii_case(&self.device_id()) {
                log::warn!(
                    "host {} reported id '{}', expected '{}'",
                    self.host,
                    id,
                    self.device_id()
                );
            }
        }

        if json.friendly_name.is_some() {
            self.friendly_name = json.friendly_name;
        }
        if json.firmware_name.is_some() {
            self.model = json.firmware_name;
        }
        if json.model_number.is_some() {
            self.hw_model = json.model_number;
        }
        if json.firmware_version.is_some() {
            self.installed_version = json.firmware_version;
        }
        if json.upgrade_available.is_some() {
            self.latest_version = json.upgrade_available;
        }
        if json.device_auth.is_some() {
            self.device_auth = json.device_auth;
        }
        if json.base_url.is_some() {
            self.base_url = json.base_url;
        }
        if json.discover_url.is_some() {
            self.discover_url = json.discover_url;
        }
        if json.lineup_url.is_some() {
            self.lineup_url = json.lineup_url;
        }
        if json.tuner_count.is_some() {
            self.tuner_count = json.tuner_count;
        }
    }

    fn adopt(&mut self, descriptor: DeviceDescriptor) {
        self.host = descriptor.host();
        if descriptor.base_url().is_some() {
            self.base_url = descriptor.base_url();
        }
        if descriptor.discover_url().is_some() {
            self.discover_url = descriptor.discover_url();
        }
        if descriptor.lineup_url().is_some() {
            self.lineup_url = descriptor.lineup_url();
        }
        if descriptor.device_auth().is_some() {
            self.device_auth = descriptor.device_auth();
        }
        if descriptor.tuner_count().is_some() {
            self.tuner_count = descriptor.tuner_count();
        }
        self.descriptor = descriptor;
    }

    fn mark_old_firmware(&mut self) {
        self.capabilities.record(FetchPart::TunerStatus, false);
        log::warn!(
            "device '{}' firmware {} does not serve tuner status; disabling that path",
            self.device_id(),
            self.installed_version.as_deref().unwrap_or("(unknown)")
        );
    }

    // The control protocol mimics the fields of status.json closely enough
    // to build the same snapshot for devices without a web surface
    async fn refresh_tuner_status_tcp(&mut self) -> Result<()> {
        let count = match self.tuner_count {
            Some(count) if count > 0 => count as usize,
            _ => {
                return Err(Error::UpdateFailed(format!(
                    "tuner count for '{}' unknown, cannot poll over the control port",
                    self.device_id()
                )))
            }
        };

        let mut control = match ControlConnection::connect(self.host.clone()).await {
            Ok(control) => control,
            Err(e) => {
                self.online = false;
                return Err(Error::UpdateFailed(format!(
                    "control connection to '{}' failed: {}",
                    self.device_id(),
                    e
                )));
            }
        };

        let mut tuners = Vec::with_capacity(count);
        for index in 0..count {
            let raw = match control.tuner_status(index).await {
                Ok(raw) => raw,
                Err(e) => {
                    self.online = false;
                    return Err(Error::UpdateFailed(format!(
                        "tuner {} status for '{}' failed: {}",
                        index,
                        self.device_id(),
                        e
                    )));
                }
            };

            let mut tuner = parse_tuner_status_var(index, &raw);
            if tuner.symbol_quality_percent.is_some() {
                // Locked tuner; resolve what it is tuned to
                let program = control.tuner_program(index).await.ok();
                if let Some(program) = program
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty() && p != "0")
                {
                    if let Ok(streaminfo) = control.tuner_streaminfo(index).await {
                        if let Some((number, name)) = parse_streaminfo(&streaminfo, &program) {
                            tuner.vct_number = Some(number);
                            tuner.vct_name = Some(name);
                        }
                    }
                }
                if let Ok(target) = control.tuner_target(index).await {
                    // An idle target reads "none"
                    if target != "none" {
                        tuner.target_ip = host_of(&target);
                    }
                }
            }
            tuners.push(tuner);
        }

        self.tuner_status = tuners;
        self.online = true;
        Ok(())
    }

    async fn gather_identity_tcp(&mut self) -> Result<()> {
        let mut control = ControlConnection::connect(self.host.clone()).await?;
        if let Ok(version) = control.version().await {
            self.installed_version = Some(version);
        }
        if let Ok(model) = control.model().await {
            self.model = Some(model);
        }
        if let Ok(hwmodel) = control.hwmodel().await {
            self.hw_model = Some(hwmodel);
        }
        Ok(())
    }
}

// Status variables are space delimited `key=value` items, e.g.
// "ch=8vsb:177000000 lock=8vsb ss=92 snq=88 seq=100 bps=6892000 pps=812".
// Zero percentages mean "no reading" and are dropped, matching status.json.
fn parse_tuner_status_var(index: usize, raw: &str) -> TunerStatus {
    let mut tuner = TunerStatus {
        resource: format!("tuner{}", index),
        ..TunerStatus::default()
    };

    for item in raw.split_whitespace() {
        let (key, value) = match item.split_once('=') {
            Some(split) => split,
            None => continue,
        };
        match key {
            "ss" => tuner.signal_strength_percent = nonzero_u8(value),
            "snq" => tuner.signal_quality_percent = nonzero_u8(value),
            "seq" => tuner.symbol_quality_percent = nonzero_u8(value),
            "ch" => tuner.frequency = value.split(':').nth(1).and_then(|f| f.parse().ok()),
            "bps" => tuner.network_rate = value.parse().ok().filter(|v| *v != 0),
            _ => {}
        }
    }

    tuner
}

fn nonzero_u8(value: &str) -> Option<u8> {
    value.parse().ok().filter(|v| *v != 0)
}

// streaminfo lists one program per line as "<program>: <number> <name>";
// the tuner's current program id selects the line
fn parse_streaminfo(streaminfo: &str, program: &str) -> Option<(String, String)> {
    let prefix = format!("{}: ", program);
    streaminfo.lines().find_map(|line| {
        let rest = line.strip_prefix(&prefix)?;
        match rest.split_once(' ') {
            Some((number, name)) => Some((number.to_string(), name.to_string())),
            None => Some((rest.to_string(), String::new())),
        }
    })
}
