pub const DEFAULT_TIMEOUT: u64 = 3;

pub const DEFAULT_BROADCAST_ADDRESS: &str = "255.255.255.255";
pub const DEFAULT_DISCOVER_TIMEOUT: u64 = 1;
pub const DEFAULT_HTTP_DISCOVER_URL: &str = "https://ipv4-api.hdhomerun.com/discover";

pub const DISCOVER_UDP_PORT: u16 = 65001;
pub const CONTROL_TCP_PORT: u16 = 65001;

pub const TYPE_DISCOVER_REQ: u16 = 0x0002;
pub const TYPE_DISCOVER_RPY: u16 = 0x0003;
pub const TYPE_GETSET_REQ: u16 = 0x0004;
pub const TYPE_GETSET_RPY: u16 = 0x0005;

pub const TAG_DEVICE_TYPE: u8 = 0x01;
pub const TAG_DEVICE_ID: u8 = 0x02;
pub const TAG_GETSET_NAME: u8 = 0x03;
pub const TAG_GETSET_VALUE: u8 = 0x04;
pub const TAG_ERROR_MESSAGE: u8 = 0x05;
pub const TAG_TUNER_COUNT: u8 = 0x10;
pub const TAG_LINEUP_URL: u8 = 0x27;
pub const TAG_BASE_URL: u8 = 0x2A;
pub const TAG_DEVICE_AUTH_STR: u8 = 0x2B;

pub const DEVICE_TYPE_TUNER: u32 = 0x0000_0001;
pub const DEVICE_TYPE_STORAGE: u32 = 0x0000_0005;
pub const DEVICE_TYPE_WILDCARD: u32 = 0xFFFF_FFFF;
pub const DEVICE_ID_WILDCARD: u32 = 0xFFFF_FFFF;

pub const VAR_RESTART: &str = "/sys/restart";
pub const VAR_VERSION: &str = "/sys/version";
pub const VAR_MODEL: &str = "/sys/model";
pub const VAR_HWMODEL: &str = "/sys/hwmodel";

pub const DEF_DISCOVER: &str = "discover.json";
pub const DEF_LINEUP: &str = "lineup.json";
pub const DEF_TUNER_STATUS: &str = "status.json";
