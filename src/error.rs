use std::fmt::{Debug, Display};

/// Result for API calls from this crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// A frame failed checksum or length validation and was rejected whole
    MalformedPacket(String),
    /// Errors from the binary control protocol
    Control(ControlError),
    /// The device firmware predates the requested capability
    OldFirmware(String),
    /// Rediscovery could not relocate a device by its id
    DeviceNotFound(String),
    /// A scheduled refresh failed; the caller retries on its own cadence
    UpdateFailed(String),
    /// Error from http client
    Reqwest(reqwest::Error),
    /// Error from std::io
    Io(std::io::Error),
    /// Error processing json payloads
    Json(serde_json::Error),
    #[doc(hidden)]
    Other(String),
}

impl Error {
    pub fn is_malformed_packet(&self) -> bool {
        matches!(self, Error::MalformedPacket(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Control(ControlError::TransportFailure(_)) | Error::Reqwest(_) | Error::Io(_)
        )
    }

    pub fn is_unknown_variable(&self) -> bool {
        matches!(self, Error::Control(ControlError::UnknownVariable { .. }))
    }

    pub fn is_old_firmware(&self) -> bool {
        matches!(self, Error::OldFirmware(_))
    }

    pub fn is_device_not_found(&self) -> bool {
        matches!(self, Error::DeviceNotFound(_))
    }

    pub fn is_update_failed(&self) -> bool {
        matches!(self, Error::UpdateFailed(_))
    }
}

impl From<ControlError> for Error {
    fn from(e: ControlError) -> Self {
        Error::Control(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Error {
        Error::Reqwest(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::Json(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Io(e)
    }
}

impl From<String> for Error {
    fn from(e: String) -> Error {
        Error::Other(e)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedPacket(e) => write!(f, "Malformed packet: {}", e),
            Self::Control(e) => write!(f, "{}", e),
            Self::OldFirmware(device) => write!(
                f,
                "Device '{}' firmware does not support this operation",
                device
            ),
            Self::DeviceNotFound(id) => write!(f, "Could not find device with id: '{}'", id),
            Self::UpdateFailed(e) => write!(f, "Update failed: {}", e),
            Self::Reqwest(e) => write!(f, "{}", e),
            Self::Io(e) => write!(f, "{}", e),
            Self::Json(e) => write!(f, "{}", e),
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

/// Errors from the TCP control protocol
#[derive(Debug)]
pub enum ControlError {
    /// The device reported the variable name is not recognized.
    ///
    /// This is a normal negative result for get/set, not a transport fault.
    UnknownVariable { name: String, message: String },
    /// The connection failed, timed out, or returned unusable bytes
    TransportFailure(std::io::Error),
}

impl Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownVariable { name, message } => {
                write!(f, "Device rejected variable '{}': {}", name, message)
            }
            Self::TransportFailure(e) => write!(f, "Control transport failure: {}", e),
        }
    }
}

/// Parts of [`gather_details`](crate::Device::gather_details) which may fail
/// independently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPart {
    Discover,
    Lineup,
    TunerStatus,
}

impl Display for FetchPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "discover"),
            Self::Lineup => write!(f, "lineup"),
            Self::TunerStatus => write!(f, "tuner status"),
        }
    }
}

/// One or more optional sub-fetches failed while the mandatory identity
/// fetch succeeded.
///
/// The overall call still returned a usable [`Device`](crate::Device); the
/// fields for the listed parts keep their previous values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFailure {
    failed: Vec<FetchPart>,
}

impl PartialFailure {
    pub(crate) fn new(failed: Vec<FetchPart>) -> Self {
        Self { failed }
    }

    pub fn failed(&self) -> &[FetchPart] {
        &self.failed
    }

    pub fn contains(&self, part: FetchPart) -> bool {
        self.failed.contains(&part)
    }
}

impl Display for PartialFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Partial refresh failure: ")?;
        for (i, part) in self.failed.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}
