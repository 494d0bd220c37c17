use super::super::error::FetchPart;

/// Probe outcome for one optional endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Not probed yet; the call is worth attempting
    Unknown,
    Supported,
    /// The endpoint answered 404/unsupported; not re-probed this session
    Unsupported,
}

impl Default for Capability {
    fn default() -> Self {
        Capability::Unknown
    }
}

/// Which richer HTTP endpoints are safe to call against a device.
///
/// Computed from probe outcomes and cached for the lifetime of the
/// [`Device`](super::Device). Purely advisory: an unsupported capability
/// disables a polling path, it never fails a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    lineup: Capability,
    tuner_status: Capability,
}

impl CapabilitySet {
    pub fn lineup(&self) -> Capability {
        self.lineup
    }

    pub fn tuner_status(&self) -> Capability {
        self.tuner_status
    }

    /// Whether an operation should be attempted: anything not yet known to
    /// be unsupported is fair game.
    pub fn allows(&self, part: FetchPart) -> bool {
        self.get(part) != Capability::Unsupported
    }

    fn get(&self, part: FetchPart) -> Capability {
        match part {
            FetchPart::Lineup => self.lineup,
            // Identity is mandatory and never gated
            FetchPart::Discover => Capability::Supported,
            FetchPart::TunerStatus => self.tuner_status,
        }
    }

    pub(crate) fn record(&mut self, part: FetchPart, supported: bool) {
        let capability = if supported {
            Capability::Supported
        } else {
            Capability::Unsupported
        };
        match part {
            FetchPart::Lineup => self.lineup = capability,
            FetchPart::Discover => {}
            FetchPart::TunerStatus => self.tuner_status = capability,
        }
    }
}
