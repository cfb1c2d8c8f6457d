//! Configuration for a [`SafeBrowsingClient`](crate::SafeBrowsingClient).

use std::path::PathBuf;
use std::time::Duration;

use crate::list::ThreatListId;

/// The production endpoint base.
const DEFAULT_BASE_URL: &str = "https://safebrowsing.googleapis.com/v4";

/// Configuration for the Safe Browsing client.
///
/// Only the API key and the cache path are required; everything else has
/// a sensible default.
///
/// ```
/// use safebrowsing::SafeBrowsingConfig;
///
/// let mut config = SafeBrowsingConfig::new("my-api-key", "/var/cache/gsb.db");
/// config.platform_types = Some(vec!["ANY_PLATFORM".into(), "LINUX".into()]);
/// ```
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct SafeBrowsingConfig {
    /// Safe Browsing API key.
    pub api_key: String,
    /// Where the sqlite cache lives.
    pub db_path: PathBuf,
    /// Endpoint base URL.  Overridden only in tests.
    pub base_url: String,
    /// `clientId` reported to the service.
    pub client_id: String,
    /// `clientVersion` reported to the service.
    pub client_version: String,
    /// Whether to honor server-requested waits between requests.
    ///
    /// Turning this off violates the API's fair-use policy; it exists
    /// for one-shot testing, and every skipped wait is logged.
    pub enforce_fair_use: bool,
    /// Timeout for each HTTP request.
    pub http_timeout: Duration,
    /// How long to wait for a contended database lock.
    pub db_busy_timeout: Duration,
    /// How long expired full hashes linger before cleanup purges them.
    pub full_hash_grace: Duration,
    /// Track only lists with these threat types, if set.
    pub threat_types: Option<Vec<String>>,
    /// Track only lists with these platform types, if set.
    pub platform_types: Option<Vec<String>>,
}

impl SafeBrowsingConfig {
    /// Construct a configuration with defaults for everything but the
    /// API key and cache location.
    pub fn new(api_key: impl Into<String>, db_path: impl Into<PathBuf>) -> Self {
        SafeBrowsingConfig {
            api_key: api_key.into(),
            db_path: db_path.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            client_id: env!("CARGO_PKG_NAME").to_owned(),
            client_version: env!("CARGO_PKG_VERSION").to_owned(),
            enforce_fair_use: true,
            http_timeout: Duration::from_secs(60),
            db_busy_timeout: Duration::from_secs(10),
            full_hash_grace: Duration::from_secs(12 * 60 * 60),
            threat_types: None,
            platform_types: None,
        }
    }

    /// Whether a list advertised by the server should be tracked under
    /// this configuration.
    pub(crate) fn tracks(&self, id: &ThreatListId) -> bool {
        let type_ok = self
            .threat_types
            .as_ref()
            .is_none_or(|types| types.iter().any(|t| t == id.threat_type()));
        let platform_ok = self
            .platform_types
            .as_ref()
            .is_none_or(|types| types.iter().any(|t| t == id.platform_type()));
        type_ok && platform_ok
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn filters() {
        let mut config = SafeBrowsingConfig::new("key", "/tmp/db");
        let malware = ThreatListId::new("MALWARE", "LINUX", "URL");
        let phishing = ThreatListId::new("SOCIAL_ENGINEERING", "WINDOWS", "URL");

        assert!(config.tracks(&malware));
        assert!(config.tracks(&phishing));

        config.threat_types = Some(vec!["MALWARE".into()]);
        assert!(config.tracks(&malware));
        assert!(!config.tracks(&phishing));

        config.platform_types = Some(vec!["WINDOWS".into()]);
        assert!(!config.tracks(&malware));
    }
}
