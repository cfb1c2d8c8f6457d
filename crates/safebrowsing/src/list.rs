//! Identity of a single threat list.

use std::fmt;

/// The identity of one server-side threat list, in enough detail to
/// request updates for it.
///
/// A list is keyed by the triple of threat type, platform type, and
/// threat entry type, each of which is a short ASCII identifier assigned
/// by the service (for example `MALWARE`, `ANY_PLATFORM`, `URL`).
/// Equality and ordering are componentwise, in that order.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ThreatListId {
    /// The kind of threat, e.g. `MALWARE` or `SOCIAL_ENGINEERING`.
    threat_type: String,
    /// The platform the threat targets, e.g. `ANY_PLATFORM`.
    platform_type: String,
    /// The kind of entry on the list, e.g. `URL`.
    threat_entry_type: String,
}

impl ThreatListId {
    /// Construct a list identity from its three components.
    pub fn new(
        threat_type: impl Into<String>,
        platform_type: impl Into<String>,
        threat_entry_type: impl Into<String>,
    ) -> Self {
        ThreatListId {
            threat_type: threat_type.into(),
            platform_type: platform_type.into(),
            threat_entry_type: threat_entry_type.into(),
        }
    }

    /// Return the threat type component.
    pub fn threat_type(&self) -> &str {
        &self.threat_type
    }

    /// Return the platform type component.
    pub fn platform_type(&self) -> &str {
        &self.platform_type
    }

    /// Return the threat entry type component.
    pub fn threat_entry_type(&self) -> &str {
        &self.threat_entry_type
    }
}

impl fmt::Display for ThreatListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.threat_type, self.platform_type, self.threat_entry_type
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ordering_is_componentwise() {
        let a = ThreatListId::new("MALWARE", "ANY_PLATFORM", "URL");
        let b = ThreatListId::new("MALWARE", "LINUX", "URL");
        let c = ThreatListId::new("SOCIAL_ENGINEERING", "ANY_PLATFORM", "URL");
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a, ThreatListId::new("MALWARE", "ANY_PLATFORM", "URL"));
    }

    #[test]
    fn display() {
        let id = ThreatListId::new("MALWARE", "ANY_PLATFORM", "URL");
        assert_eq!(id.to_string(), "MALWARE/ANY_PLATFORM/URL");
    }
}
