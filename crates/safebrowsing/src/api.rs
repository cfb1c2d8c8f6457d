//! Typed access to the Safe Browsing v4 endpoints.
//!
//! [`HttpApiClient`] wraps the three REST calls the protocol needs and
//! enforces the client-side politeness rules: every outbound request
//! waits out any server-requested `minimumWaitDuration`, transient
//! failures (HTTP 5xx, rate-limit 429, and socket errors) are retried
//! internally with backoff, and everything else is surfaced to the
//! caller at once.
//!
//! The sync and lookup engines talk to the service through the
//! [`SafeBrowsingApi`] trait, so tests can substitute a scripted
//! implementation.

pub(crate) mod wire;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SafeBrowsingConfig;
use crate::list::ThreatListId;
use crate::retry::{BackoffSchedule, FairUseGate, SOCKET_RETRY_DELAY};
use crate::storage::HashPrefixChunk;
use crate::{Error, Result};

/// A decoded per-list update from `threatListUpdates.fetch`.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ListUpdate {
    /// Which list this update applies to.
    pub id: ThreatListId,
    /// True for `FULL_UPDATE` (drop the local list before applying).
    pub full_update: bool,
    /// Indices to remove, addressing the pre-addition sorted order.
    pub removal_indices: Vec<usize>,
    /// Prefix batches to insert.
    pub additions: Vec<HashPrefixChunk>,
    /// The client state to record once the update verifies.
    pub new_client_state: String,
    /// Expected SHA-256 of the sorted post-update prefix list.
    pub checksum: [u8; 32],
}

/// A decoded response from `fullHashes.find`.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct FullHashLookup {
    /// Full hashes matching the queried prefixes.
    pub matches: Vec<FullHashMatch>,
    /// How long the queried prefixes' negative cache may be extended.
    pub negative_cache: Duration,
}

/// One full-hash match.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct FullHashMatch {
    /// The list the hash is on.
    pub id: ThreatListId,
    /// The full 32-byte hash.
    pub hash: [u8; 32],
    /// How long this match is authoritative.
    pub cache_duration: Duration,
    /// Decoded `malware_threat_type` metadata, when present.
    pub malware_threat_type: Option<String>,
}

/// The queries the sync and lookup engines make of the remote service.
pub trait SafeBrowsingApi {
    /// Ask the service which threat lists it offers.
    fn threat_lists(&mut self) -> Result<Vec<ThreatListId>>;

    /// Fetch incremental updates for the given lists and their client
    /// states (`None` for a list that has never synced).
    fn fetch_list_updates(
        &mut self,
        states: &[(ThreatListId, Option<String>)],
    ) -> Result<Vec<ListUpdate>>;

    /// Ask for the full hashes matching a set of prefixes.
    fn find_full_hashes(
        &mut self,
        prefixes: &[Vec<u8>],
        states: &[(ThreatListId, Option<String>)],
    ) -> Result<FullHashLookup>;
}

/// HTTP implementation of [`SafeBrowsingApi`] over the real service.
pub struct HttpApiClient {
    /// The blocking HTTP agent.
    agent: ureq::Agent,
    /// Endpoint base, `https://safebrowsing.googleapis.com/v4` in
    /// production.
    base_url: String,
    /// API key, sent as the `key` query parameter.
    api_key: String,
    /// Client identity carried in every request body.
    client: wire::ClientInfo,
    /// Fair-use gate shared by all endpoints.
    gate: FairUseGate,
    /// Backoff state for consecutive 5xx failures.
    backoff: BackoffSchedule,
    /// Jitter source for the backoff schedule.
    rng: StdRng,
}

impl HttpApiClient {
    /// Build a transport from the client configuration.
    pub fn new(config: &SafeBrowsingConfig) -> Self {
        let agent_config = ureq::config::Config::builder()
            .http_status_as_error(false)
            .timeout_global(Some(config.http_timeout))
            .build();
        HttpApiClient {
            agent: ureq::Agent::new_with_config(agent_config),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            client: wire::ClientInfo {
                client_id: config.client_id.clone(),
                client_version: config.client_version.clone(),
            },
            gate: FairUseGate::new(config.enforce_fair_use),
            backoff: BackoffSchedule::new(),
            rng: StdRng::from_os_rng(),
        }
    }

    /// Record (or clear) the fair-use wait a response asked for.
    fn note_wait(&mut self, wait: Option<&str>) -> Result<()> {
        let wait = wait.map(wire::parse_api_duration).transpose()?;
        self.gate.note_minimum_wait(wait, SystemTime::now());
        Ok(())
    }

    /// Issue one logical request, sleeping through the fair-use gate and
    /// retrying transient failures until it either succeeds or fails in
    /// a way worth reporting.
    ///
    /// `body` of `None` means GET; otherwise the JSON is POSTed.
    fn transport_call(&mut self, path: &str, body: Option<&serde_json::Value>) -> Result<String> {
        let url = format!("{}/{}?key={}", self.base_url, path, self.api_key);
        loop {
            if let Some(wait) = self.gate.required_wait(SystemTime::now()) {
                info!(
                    "Fair-use throttle: sleeping {:.1}s before contacting the Safe Browsing API",
                    wait.as_secs_f64()
                );
                thread::sleep(wait);
            }

            debug!("Requesting {}", path);
            let attempt = match body {
                Some(json) => self.agent.post(&url).send_json(json),
                None => self.agent.get(&url).call(),
            };

            match attempt {
                Ok(mut response) => {
                    let status = response.status().as_u16();
                    if (200..300).contains(&status) {
                        match response.body_mut().read_to_string() {
                            Ok(text) => {
                                self.backoff.note_success();
                                return Ok(text);
                            }
                            Err(err) => {
                                warn!("Failed reading API response body: {}; retrying", err);
                            }
                        }
                    } else if status >= 500 || status == 429 {
                        let delay = self.backoff.next_delay(&mut self.rng);
                        warn!(
                            "HTTP {} from the Safe Browsing API; retrying in {:.0}s",
                            status,
                            delay.as_secs_f64()
                        );
                        thread::sleep(delay);
                        continue;
                    } else {
                        let message = response.body_mut().read_to_string().unwrap_or_default();
                        return Err(Error::ApiStatus { status, message });
                    }
                }
                Err(err) => {
                    warn!("Connection to the Safe Browsing API failed: {}; retrying", err);
                }
            }
            thread::sleep(SOCKET_RETRY_DELAY);
        }
    }

    /// POST a request body and decode the JSON response.
    fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &mut self,
        path: &str,
        request: &B,
    ) -> Result<T> {
        let body =
            serde_json::to_value(request).map_err(|e| Error::Json(Arc::new(e)))?;
        let text = self.transport_call(path, Some(&body))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// The only compression we advertise; RICE decoding is out of scope.
const RAW_COMPRESSION: &str = "RAW";

/// Build the deduplicated type unions a `fullHashes.find` request needs.
fn threat_info_unions(
    states: &[(ThreatListId, Option<String>)],
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut threat_types = BTreeSet::new();
    let mut platform_types = BTreeSet::new();
    let mut entry_types = BTreeSet::new();
    for (id, _) in states {
        threat_types.insert(id.threat_type().to_owned());
        platform_types.insert(id.platform_type().to_owned());
        entry_types.insert(id.threat_entry_type().to_owned());
    }
    (
        threat_types.into_iter().collect(),
        platform_types.into_iter().collect(),
        entry_types.into_iter().collect(),
    )
}

/// Convert one wire-format list update into its decoded form.
fn decode_list_update(update: wire::ListUpdateResponse) -> Result<ListUpdate> {
    let id = ThreatListId::new(
        update.threat_type,
        update.platform_type,
        update.threat_entry_type,
    );
    let full_update = match update.response_type.as_str() {
        "FULL_UPDATE" => true,
        "PARTIAL_UPDATE" => false,
        _ => return Err(Error::MalformedResponse("unknown responseType")),
    };
    let mut removal_indices = Vec::new();
    for removal in update.removals {
        let indices = removal
            .raw_indices
            .ok_or(Error::MalformedResponse("removal without rawIndices"))?;
        removal_indices.extend(indices.indices);
    }
    let mut additions = Vec::new();
    for addition in update.additions {
        let raw = addition
            .raw_hashes
            .ok_or(Error::MalformedResponse("addition without rawHashes"))?;
        let bytes = wire::decode_base64(&raw.raw_hashes, "undecodable rawHashes")?;
        additions.push(HashPrefixChunk::new(raw.prefix_size, bytes)?);
    }
    let new_client_state = update
        .new_client_state
        .ok_or(Error::MalformedResponse("update without newClientState"))?;
    let checksum = update
        .checksum
        .ok_or(Error::MalformedResponse("update without checksum"))?;
    let checksum: [u8; 32] = wire::decode_base64(&checksum.sha256, "undecodable checksum")?
        .try_into()
        .map_err(|_| Error::MalformedResponse("checksum is not 32 bytes"))?;
    Ok(ListUpdate {
        id,
        full_update,
        removal_indices,
        additions,
        new_client_state,
        checksum,
    })
}

/// Convert one wire-format match into its decoded form.
fn decode_match(m: wire::ThreatMatch) -> Result<FullHashMatch> {
    let malware_threat_type = m.malware_threat_type();
    let hash: [u8; 32] = wire::decode_base64(&m.threat.hash, "undecodable match hash")?
        .try_into()
        .map_err(|_| Error::MalformedResponse("match hash is not 32 bytes"))?;
    let cache_duration = m
        .cache_duration
        .as_deref()
        .map(wire::parse_api_duration)
        .transpose()?
        .unwrap_or(Duration::ZERO);
    Ok(FullHashMatch {
        id: ThreatListId::new(m.threat_type, m.platform_type, m.threat_entry_type),
        hash,
        cache_duration,
        malware_threat_type,
    })
}

impl SafeBrowsingApi for HttpApiClient {
    fn threat_lists(&mut self) -> Result<Vec<ThreatListId>> {
        let text = self.transport_call("threatLists", None)?;
        let response: wire::ThreatListsResponse = serde_json::from_str(&text)?;
        // This endpoint never carries a wait; the gate clears.
        self.note_wait(None)?;
        Ok(response.threat_lists.into_iter().map(Into::into).collect())
    }

    fn fetch_list_updates(
        &mut self,
        states: &[(ThreatListId, Option<String>)],
    ) -> Result<Vec<ListUpdate>> {
        let request = wire::FetchRequest {
            client: self.client.clone(),
            list_update_requests: states
                .iter()
                .map(|(id, state)| wire::ListUpdateRequest {
                    threat_type: id.threat_type().to_owned(),
                    platform_type: id.platform_type().to_owned(),
                    threat_entry_type: id.threat_entry_type().to_owned(),
                    state: state.clone().unwrap_or_default(),
                    constraints: wire::Constraints {
                        supported_compressions: vec![RAW_COMPRESSION.to_owned()],
                    },
                })
                .collect(),
        };
        let response: wire::FetchResponse = self.post_json("threatListUpdates:fetch", &request)?;
        self.note_wait(response.minimum_wait_duration.as_deref())?;
        response
            .list_update_responses
            .into_iter()
            .map(decode_list_update)
            .collect()
    }

    fn find_full_hashes(
        &mut self,
        prefixes: &[Vec<u8>],
        states: &[(ThreatListId, Option<String>)],
    ) -> Result<FullHashLookup> {
        let (threat_types, platform_types, threat_entry_types) = threat_info_unions(states);
        let request = wire::FindRequest {
            client: self.client.clone(),
            client_states: states
                .iter()
                .filter_map(|(_, state)| state.clone())
                .collect(),
            threat_info: wire::ThreatInfo {
                threat_types,
                platform_types,
                threat_entry_types,
                threat_entries: prefixes
                    .iter()
                    .map(|p| wire::ThreatEntry {
                        hash: wire::encode_base64(p),
                    })
                    .collect(),
            },
        };
        let response: wire::FindResponse = self.post_json("fullHashes:find", &request)?;
        self.note_wait(response.minimum_wait_duration.as_deref())?;
        let negative_cache = response
            .negative_cache_duration
            .as_deref()
            .map(wire::parse_api_duration)
            .transpose()?
            .unwrap_or(Duration::ZERO);
        let matches = response
            .matches
            .into_iter()
            .map(decode_match)
            .collect::<Result<Vec<_>>>()?;
        Ok(FullHashLookup {
            matches,
            negative_cache,
        })
    }
}
