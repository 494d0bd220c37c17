use serde::{Deserialize, Deserializer};

/// Live status of one tuner resource, as reported by `status.json`.
///
/// The whole sequence is replaced on every successful refresh; entries are
/// never merged field by field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct TunerStatus {
    #[serde(rename = "Resource")]
    pub(crate) resource: String,
    #[serde(rename = "VctNumber", default)]
    pub(crate) vct_number: Option<String>,
    #[serde(rename = "VctName", default)]
    pub(crate) vct_name: Option<String>,
    #[serde(rename = "Frequency", default)]
    pub(crate) frequency: Option<u64>,
    #[serde(rename = "TargetIP", default)]
    pub(crate) target_ip: Option<String>,
    #[serde(rename = "SignalStrengthPercent", default)]
    pub(crate) signal_strength_percent: Option<u8>,
    #[serde(rename = "SignalQualityPercent", default)]
    pub(crate) signal_quality_percent: Option<u8>,
    #[serde(rename = "SymbolQualityPercent", default)]
    pub(crate) symbol_quality_percent: Option<u8>,
    #[serde(rename = "NetworkRate", default)]
    pub(crate) network_rate: Option<u64>,
}

impl TunerStatus {
    /// Tuner resource name, e.g. `tuner0`
    pub fn resource(&self) -> String {
        self.resource.clone()
    }

    /// Virtual channel number currently tuned
    pub fn vct_number(&self) -> Option<String> {
        self.vct_number.clone()
    }

    /// Virtual channel name currently tuned
    pub fn vct_name(&self) -> Option<String> {
        self.vct_name.clone()
    }

    pub fn frequency(&self) -> Option<u64> {
        self.frequency
    }

    /// Where the stream is being sent
    pub fn target_ip(&self) -> Option<String> {
        self.target_ip.clone()
    }

    pub fn signal_strength_percent(&self) -> Option<u8> {
        self.signal_strength_percent
    }

    pub fn signal_quality_percent(&self) -> Option<u8> {
        self.signal_quality_percent
    }

    pub fn symbol_quality_percent(&self) -> Option<u8> {
        self.symbol_quality_percent
    }

    pub fn network_rate(&self) -> Option<u64> {
        self.network_rate
    }

    /// Whether the tuner is currently streaming to a target
    pub fn in_use(&self) -> bool {
        self.target_ip.is_some()
    }
}

/// One channel from the device lineup (`lineup.json`).
///
/// Only available for devices reachable over HTTP; UDP-only devices report
/// no lineup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Channel {
    #[serde(rename = "GuideNumber")]
    guide_number: String,
    #[serde(rename = "GuideName")]
    guide_name: String,
    #[serde(rename = "Enabled", default = "default_enabled", deserialize_with = "bool_from_int")]
    enabled: bool,
    #[serde(rename = "Favorite", default, deserialize_with = "bool_from_int")]
    favorite: bool,
    #[serde(rename = "HD", default, deserialize_with = "bool_from_int")]
    hd: bool,
    #[serde(rename = "DRM", default, deserialize_with = "bool_from_int")]
    drm: bool,
    #[serde(rename = "URL", default)]
    url: Option<String>,
}

impl Channel {
    pub fn guide_number(&self) -> String {
        self.guide_number.clone()
    }

    pub fn guide_name(&self) -> String {
        self.guide_name.clone()
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn favorite(&self) -> bool {
        self.favorite
    }

    pub fn hd(&self) -> bool {
        self.hd
    }

    pub fn drm(&self) -> bool {
        self.drm
    }

    pub fn url(&self) -> Option<String> {
        self.url.clone()
    }
}

// The lineup marks flags as 0/1 integers and omits them when unset
fn bool_from_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<u8>::deserialize(deserializer)?;
    Ok(matches!(value, Some(v) if v != 0))
}

// A channel not marked disabled is enabled
fn default_enabled() -> bool {
    true
}

/// Identity and capability metadata from `discover.json`
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct DiscoverJson {
    #[serde(rename = "DeviceID")]
    pub(crate) device_id: Option<String>,
    #[serde(rename = "FriendlyName")]
    pub(crate) friendly_name: Option<String>,
    #[serde(rename = "FirmwareName")]
    pub(crate) firmware_name: Option<String>,
    #[serde(rename = "FirmwareVersion")]
    pub(crate) firmware_version: Option<String>,
    #[serde(rename = "ModelNumber")]
    pub(crate) model_number: Option<String>,
    #[serde(rename = "DeviceAuth")]
    pub(crate) device_auth: Option<String>,
    #[serde(rename = "BaseURL")]
    pub(crate) base_url: Option<String>,
    #[serde(rename = "DiscoverURL")]
    pub(crate) discover_url: Option<String>,
    #[serde(rename = "LineupURL")]
    pub(crate) lineup_url: Option<String>,
    #[serde(rename = "TunerCount")]
    pub(crate) tuner_count: Option<u8>,
    #[serde(rename = "UpgradeAvailable")]
    pub(crate) upgrade_available: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn lineup_flags_parse_as_bools() {
        let json = indoc! {r#"
            [
                {"GuideNumber":"5.1","GuideName":"ABC","HD":1,"Favorite":1,"URL":"http://192.168.0.20:5004/auto/v5.1"},
                {"GuideNumber":"7.2","GuideName":"Retro","Enabled":0}
            ]
        "#};

        let channels: Vec<Channel> = serde_json::from_str(json).unwrap();
        assert_eq!(channels.len(), 2);

        assert_eq!(channels[0].guide_number(), "5.1");
        assert_eq!(channels[0].guide_name(), "ABC");
        assert!(channels[0].enabled());
        assert!(channels[0].favorite());
        assert!(channels[0].hd());
        assert!(!channels[0].drm());

        assert!(!channels[1].enabled());
        assert!(!channels[1].favorite());
    }

    #[test]
    fn tuner_status_parses_idle_and_active() {
        let json = indoc! {r#"
            [
                {"Resource":"tuner0","VctNumber":"5.1","VctName":"ABC","Frequency":177000000,
                 "SignalStrengthPercent":92,"SignalQualityPercent":88,"SymbolQualityPercent":100,
                 "TargetIP":"192.168.0.50","NetworkRate":6892000},
                {"Resource":"tuner1"}
            ]
        "#};

        let status: Vec<TunerStatus> = serde_json::from_str(json).unwrap();
        assert_eq!(status.len(), 2);

        assert_eq!(status[0].resource(), "tuner0");
        assert_eq!(status[0].vct_number().as_deref(), Some("5.1"));
        assert_eq!(status[0].signal_quality_percent(), Some(88));
        assert!(status[0].in_use());

        assert_eq!(status[1].resource(), "tuner1");
        assert_eq!(status[1].signal_strength_percent(), None);
        assert!(!status[1].in_use());
    }
}
