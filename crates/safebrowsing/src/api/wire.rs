//! Serde types for the Safe Browsing v4 JSON wire format, and helpers
//! for the odd scalar encodings it uses (base64 byte strings, durations
//! as `"300.5s"`).

use std::time::Duration;

use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};

use crate::list::ThreatListId;
use crate::{Error, Result};

/// Parse an API duration string such as `"300s"` or `"593.44s"`.
///
/// The value is seconds, possibly fractional; consumers round up to
/// whole seconds when persisting.
pub(crate) fn parse_api_duration(s: &str) -> Result<Duration> {
    let secs: f64 = s
        .strip_suffix('s')
        .unwrap_or(s)
        .parse()
        .map_err(|_| Error::MalformedResponse("unparseable duration"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(Error::MalformedResponse("out-of-range duration"));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Decode a base64 field, mapping failure to a malformed-response error.
pub(crate) fn decode_base64(s: &str, what: &'static str) -> Result<Vec<u8>> {
    Base64::decode_vec(s).map_err(|_| Error::MalformedResponse(what))
}

/// Encode bytes the way the wire wants them.
pub(crate) fn encode_base64(bytes: &[u8]) -> String {
    Base64::encode_string(bytes)
}

/// The `client` stanza identifying this library build.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClientInfo {
    /// Client identifier, defaulting to this crate's name.
    pub(crate) client_id: String,
    /// Client version, defaulting to this crate's version.
    pub(crate) client_version: String,
}

/// One list identity as the wire spells it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireListId {
    /// Threat type identifier.
    pub(crate) threat_type: String,
    /// Platform type identifier.
    pub(crate) platform_type: String,
    /// Threat entry type identifier.
    pub(crate) threat_entry_type: String,
}

impl From<WireListId> for ThreatListId {
    fn from(w: WireListId) -> Self {
        ThreatListId::new(w.threat_type, w.platform_type, w.threat_entry_type)
    }
}

/// Response to `threatLists.list`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ThreatListsResponse {
    /// Every list the service offers.
    #[serde(default)]
    pub(crate) threat_lists: Vec<WireListId>,
}

/// Request body for `threatListUpdates.fetch`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FetchRequest {
    /// Who is asking.
    pub(crate) client: ClientInfo,
    /// One entry per tracked list.
    pub(crate) list_update_requests: Vec<ListUpdateRequest>,
}

/// One list's entry in a `threatListUpdates.fetch` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListUpdateRequest {
    /// Threat type identifier.
    pub(crate) threat_type: String,
    /// Platform type identifier.
    pub(crate) platform_type: String,
    /// Threat entry type identifier.
    pub(crate) threat_entry_type: String,
    /// The client state from the previous update, or empty on the first.
    pub(crate) state: String,
    /// Supported encodings; we only ever ask for `RAW`.
    pub(crate) constraints: Constraints,
}

/// Update constraints.  Only the compression list is expressed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Constraints {
    /// Compressions the client can decode.
    pub(crate) supported_compressions: Vec<String>,
}

/// Response body for `threatListUpdates.fetch`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FetchResponse {
    /// Per-list updates.
    #[serde(default)]
    pub(crate) list_update_responses: Vec<ListUpdateResponse>,
    /// Fair-use wait before the next request of any kind.
    pub(crate) minimum_wait_duration: Option<String>,
}

/// One list's update in a `threatListUpdates.fetch` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListUpdateResponse {
    /// Threat type identifier.
    pub(crate) threat_type: String,
    /// Platform type identifier.
    pub(crate) platform_type: String,
    /// Threat entry type identifier.
    pub(crate) threat_entry_type: String,
    /// `FULL_UPDATE` or `PARTIAL_UPDATE`.
    pub(crate) response_type: String,
    /// Prefix batches to add.
    #[serde(default)]
    pub(crate) additions: Vec<ThreatEntrySet>,
    /// Index batches to remove.
    #[serde(default)]
    pub(crate) removals: Vec<ThreatEntrySet>,
    /// Token naming the list version this update produces.
    pub(crate) new_client_state: Option<String>,
    /// Checksum of the full post-update prefix list.
    pub(crate) checksum: Option<Checksum>,
}

/// A set of additions or removals within an update.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ThreatEntrySet {
    /// Raw prefix bytes (additions only).
    pub(crate) raw_hashes: Option<RawHashes>,
    /// Raw indices into the sorted list (removals only).
    pub(crate) raw_indices: Option<RawIndices>,
}

/// Concatenated raw hash prefixes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawHashes {
    /// Bytes per prefix.
    pub(crate) prefix_size: usize,
    /// The prefixes, concatenated and base64-encoded.
    pub(crate) raw_hashes: String,
}

/// Plain removal indices.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawIndices {
    /// 0-based positions into the lexicographically sorted prefix list.
    #[serde(default)]
    pub(crate) indices: Vec<usize>,
}

/// The expected state of a list after an update.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Checksum {
    /// SHA-256 over the sorted, concatenated prefix list, base64.
    pub(crate) sha256: String,
}

/// Request body for `fullHashes.find`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FindRequest {
    /// Who is asking.
    pub(crate) client: ClientInfo,
    /// The client states of every tracked list.
    pub(crate) client_states: Vec<String>,
    /// What we are asking about.
    pub(crate) threat_info: ThreatInfo,
}

/// The threat types, platforms, entry types, and prefixes of a
/// `fullHashes.find` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ThreatInfo {
    /// Union of threat types over the tracked lists.
    pub(crate) threat_types: Vec<String>,
    /// Union of platform types over the tracked lists.
    pub(crate) platform_types: Vec<String>,
    /// Union of threat entry types over the tracked lists.
    pub(crate) threat_entry_types: Vec<String>,
    /// The hash prefixes being asked about.
    pub(crate) threat_entries: Vec<ThreatEntry>,
}

/// A single hash (or prefix) on the wire.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ThreatEntry {
    /// The bytes, base64-encoded.
    pub(crate) hash: String,
}

/// Response body for `fullHashes.find`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FindResponse {
    /// Full hashes matching the queried prefixes.
    #[serde(default)]
    pub(crate) matches: Vec<ThreatMatch>,
    /// Fair-use wait before the next request of any kind.
    pub(crate) minimum_wait_duration: Option<String>,
    /// How long the *absence* of a match may be trusted.
    pub(crate) negative_cache_duration: Option<String>,
}

/// One matching full hash.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ThreatMatch {
    /// Threat type identifier.
    pub(crate) threat_type: String,
    /// Platform type identifier.
    pub(crate) platform_type: String,
    /// Threat entry type identifier.
    pub(crate) threat_entry_type: String,
    /// The full hash.
    pub(crate) threat: ThreatEntry,
    /// How long this match may be trusted.
    pub(crate) cache_duration: Option<String>,
    /// Opaque per-entry metadata.
    pub(crate) threat_entry_metadata: Option<ThreatEntryMetadata>,
}

/// Metadata entries attached to a match.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ThreatEntryMetadata {
    /// Base64 key/value pairs.
    #[serde(default)]
    pub(crate) entries: Vec<MetadataEntry>,
}

/// One base64 key/value metadata pair.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MetadataEntry {
    /// The key, base64-encoded.
    pub(crate) key: String,
    /// The value, base64-encoded.
    pub(crate) value: String,
}

impl ThreatMatch {
    /// Extract the decoded `malware_threat_type` metadata value, if the
    /// server sent one.
    pub(crate) fn malware_threat_type(&self) -> Option<String> {
        let entries = &self.threat_entry_metadata.as_ref()?.entries;
        for entry in entries {
            let Ok(key) = Base64::decode_vec(&entry.key) else {
                continue;
            };
            if key == b"malware_threat_type" {
                let value = Base64::decode_vec(&entry.value).ok()?;
                return String::from_utf8(value).ok();
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_api_duration("300s").unwrap(), Duration::from_secs(300));
        assert_eq!(
            parse_api_duration("593.44s").unwrap(),
            Duration::from_secs_f64(593.44)
        );
        assert_eq!(parse_api_duration("0s").unwrap(), Duration::ZERO);
        // A missing suffix is tolerated.
        assert_eq!(parse_api_duration("10").unwrap(), Duration::from_secs(10));
        assert!(parse_api_duration("-3s").is_err());
        assert!(parse_api_duration("bogus").is_err());
    }

    #[test]
    fn decode_fetch_response() {
        let body = r#"{
          "listUpdateResponses": [{
            "threatType": "MALWARE",
            "platformType": "ANY_PLATFORM",
            "threatEntryType": "URL",
            "responseType": "PARTIAL_UPDATE",
            "additions": [{"rawHashes": {"prefixSize": 4, "rawHashes": "rnGLoQ=="}}],
            "removals": [{"rawIndices": {"indices": [0, 2, 4]}}],
            "newClientState": "Cg0IARAGGAEiAzAwMTABEPDyBhoCGAlTcOVL",
            "checksum": {"sha256": "YSgopA8vKkBBXJ2IjIrlNTTnLk/FPc46+U3Wc2Kcps8="}
          }],
          "minimumWaitDuration": "593.440s"
        }"#;
        let parsed: FetchResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.minimum_wait_duration.as_deref(), Some("593.440s"));
        let update = &parsed.list_update_responses[0];
        assert_eq!(update.response_type, "PARTIAL_UPDATE");
        let raw = update.additions[0].raw_hashes.as_ref().unwrap();
        assert_eq!(raw.prefix_size, 4);
        assert_eq!(decode_base64(&raw.raw_hashes, "x").unwrap().len(), 4);
        let indices = &update.removals[0].raw_indices.as_ref().unwrap().indices;
        assert_eq!(indices, &[0, 2, 4]);
    }

    #[test]
    fn decode_find_response() {
        let body = r#"{
          "matches": [{
            "threatType": "MALWARE",
            "platformType": "ANY_PLATFORM",
            "threatEntryType": "URL",
            "threat": {"hash": "WwuJdQx48jP+4lxr4y2Sj82AWoxUVcIRDSk1PC9Rf+4="},
            "threatEntryMetadata": {
              "entries": [{"key": "bWFsd2FyZV90aHJlYXRfdHlwZQ==", "value": "TEFORElORw=="}]
            },
            "cacheDuration": "300.000s"
          }],
          "minimumWaitDuration": "300.000s",
          "negativeCacheDuration": "300.000s"
        }"#;
        let parsed: FindResponse = serde_json::from_str(body).unwrap();
        let m = &parsed.matches[0];
        assert_eq!(m.malware_threat_type().as_deref(), Some("LANDING"));
        assert_eq!(decode_base64(&m.threat.hash, "x").unwrap().len(), 32);
        assert_eq!(parsed.negative_cache_duration.as_deref(), Some("300.000s"));
    }

    #[test]
    fn empty_responses_decode() {
        let parsed: FetchResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.list_update_responses.is_empty());
        assert!(parsed.minimum_wait_duration.is_none());
        let parsed: FindResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.matches.is_empty());
    }

    #[test]
    fn base64_roundtrip() {
        let bytes = b"\x00\x01\xfeprefix";
        let encoded = encode_base64(bytes);
        assert_eq!(decode_base64(&encoded, "x").unwrap(), bytes);
    }
}
