//! The client proper: keeps the local cache in sync with the service,
//! and answers lookups from it.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::api::{HttpApiClient, ListUpdate, SafeBrowsingApi};
use crate::canonical::{self, UrlHash};
use crate::config::SafeBrowsingConfig;
use crate::list::ThreatListId;
use crate::storage::sqlite::SqliteStore;
use crate::storage::{DynStore, cue_of};
use crate::{Error, Result};

/// A Safe Browsing client: a local threat-list cache, the machinery to
/// keep it in sync, and URL lookups against it.
///
/// One client is one logical writer on its cache database; do not open
/// several against the same file.
///
/// [`update`](SafeBrowsingClient::update) and
/// [`lookup_url`](SafeBrowsingClient::lookup_url) both block, possibly
/// for a long time when the server asks for a wait; run updates on their
/// own thread if the caller needs responsiveness.
pub struct SafeBrowsingClient<A = HttpApiClient> {
    /// Transport to the remote service.
    api: A,
    /// The persistent cache.
    store: Box<DynStore>,
    /// Configuration this client was built with.
    config: SafeBrowsingConfig,
}

impl SafeBrowsingClient<HttpApiClient> {
    /// Open (or create) the cache named by the configuration and build a
    /// client over the real Safe Browsing service.
    pub fn new(config: SafeBrowsingConfig) -> Result<Self> {
        let api = HttpApiClient::new(&config);
        let store = SqliteStore::open(&config.db_path, config.db_busy_timeout)?;
        Ok(SafeBrowsingClient {
            api,
            store: Box::new(store),
            config,
        })
    }
}

impl<A: SafeBrowsingApi> SafeBrowsingClient<A> {
    /// Build a client from explicit parts.
    ///
    /// Used by tests to substitute a scripted transport and an in-memory
    /// store.
    #[cfg(test)]
    pub(crate) fn from_parts(api: A, store: Box<DynStore>, config: SafeBrowsingConfig) -> Self {
        SafeBrowsingClient { api, store, config }
    }

    /// Run one update pass: groom the full-hash cache, reconcile the set
    /// of tracked lists with the server, and apply each list's
    /// incremental update.
    ///
    /// Each list commits independently once its checksum verifies, so an
    /// interrupted pass leaves every list either fully advanced or
    /// untouched.  A checksum mismatch aborts the rest of the pass and
    /// leaves that list's client state unchanged.
    pub fn update(&mut self) -> Result<()> {
        let result = self.update_inner();
        if result.is_err() {
            let _ignore = self.store.rollback();
        }
        result
    }

    /// The update pass body; the caller rolls back on error.
    fn update_inner(&mut self) -> Result<()> {
        self.store.cleanup_full_hashes(self.config.full_hash_grace)?;
        self.store.commit()?;

        let advertised = self.api.threat_lists()?;
        let wanted: BTreeSet<ThreatListId> = advertised
            .into_iter()
            .filter(|id| self.config.tracks(id))
            .collect();
        let known: BTreeSet<ThreatListId> =
            self.store.get_threat_lists()?.into_iter().collect();
        for id in wanted.difference(&known) {
            info!("Tracking new threat list {}", id);
            self.store.add_threat_list(id)?;
        }
        for id in known.difference(&wanted) {
            info!("Dropping threat list {}", id);
            self.store.delete_threat_list(id)?;
        }
        self.store.commit()?;

        let states = self.client_states()?;
        if states.is_empty() {
            debug!("No threat lists to update");
            return Ok(());
        }
        let updates = self.api.fetch_list_updates(&states)?;

        let tracked: BTreeSet<&ThreatListId> = states.iter().map(|(id, _)| id).collect();
        for update in updates {
            if !tracked.contains(&update.id) {
                warn!("Ignoring update for untracked list {}", update.id);
                continue;
            }
            self.apply_list_update(update)?;
        }
        Ok(())
    }

    /// Apply and commit one list's update.
    ///
    /// Removals address the sorted prefix list as it stands before this
    /// update's additions; the checksum then verifies the final state,
    /// and only a verified state advances the client token.
    fn apply_list_update(&mut self, update: ListUpdate) -> Result<()> {
        if update.full_update {
            debug!("Full update for list {}", update.id);
            self.store.delete_hash_prefix_list(&update.id)?;
        }
        self.store
            .remove_hash_prefix_indices(&update.id, &update.removal_indices)?;
        let mut added = 0;
        for chunk in &update.additions {
            added += chunk.len();
            self.store.populate_hash_prefix_list(&update.id, chunk)?;
        }

        let computed = self.store.hash_prefix_list_checksum(&update.id)?;
        if computed != update.checksum {
            return Err(Error::ChecksumMismatch {
                list: update.id,
                expected: hex::encode(update.checksum),
                computed: hex::encode(computed),
            });
        }

        self.store
            .update_threat_list_client_state(&update.id, &update.new_client_state)?;
        self.store.commit()?;
        info!(
            "List {}: removed {}, added {} prefix(es); checksum verified",
            update.id,
            update.removal_indices.len(),
            added
        );
        Ok(())
    }

    /// Check a URL against the cached threat lists.
    ///
    /// Returns the lists the URL is on, or an empty vector if it is
    /// clean.  Contacts the server only when a prefix matches and
    /// neither the positive nor the negative cache settles the answer;
    /// at most one `fullHashes.find` call is made per lookup.
    pub fn lookup_url(&mut self, url: impl AsRef<[u8]>) -> Result<Vec<ThreatListId>> {
        let url = url.as_ref();
        if url.trim_ascii().is_empty() {
            return Err(Error::EmptyLookupUrl);
        }
        let hashes = canonical::url_hashes(url);
        let result = self.lookup_hashes(&hashes);
        match &result {
            Ok(_) => self.store.commit()?,
            Err(_) => {
                let _ignore = self.store.rollback();
            }
        }
        result
    }

    /// The lookup pipeline over a set of candidate full hashes.
    fn lookup_hashes(&mut self, hashes: &[UrlHash]) -> Result<Vec<ThreatListId>> {
        let cues: Vec<[u8; 4]> = hashes
            .iter()
            .map(|h| cue_of(h))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let rows = self.store.lookup_hash_prefixes(&cues)?;

        // Narrow the cue hits down to true (variable-length) prefix
        // matches, remembering which full hashes they implicate and
        // whether any matching row's negative cache has expired.
        let mut matching_prefixes: BTreeMap<Vec<u8>, bool> = BTreeMap::new();
        let mut matching_hashes: Vec<UrlHash> = Vec::new();
        for (value, any_expired) in rows {
            let mut hit = false;
            for hash in hashes {
                if hash.starts_with(&value) {
                    if !matching_hashes.contains(hash) {
                        matching_hashes.push(*hash);
                    }
                    hit = true;
                }
            }
            if hit {
                *matching_prefixes.entry(value).or_insert(false) |= any_expired;
            }
        }
        if matching_prefixes.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            "{} prefix match(es) over {} URL hash(es)",
            matching_prefixes.len(),
            hashes.len()
        );

        // A fresh positive cache entry is authoritative.
        let cached = self.store.lookup_full_hashes(&matching_hashes)?;
        let fresh = dedup_ids(cached.iter().filter(|(_, expired)| !expired));
        if !fresh.is_empty() {
            return Ok(fresh);
        }

        // No expired full hashes and every matched prefix inside its
        // negative-cache window: the server already told us there is no
        // match here.
        if cached.is_empty() && matching_prefixes.values().all(|expired| !expired) {
            debug!("Negative cache covers all matched prefixes");
            return Ok(Vec::new());
        }

        let prefixes: Vec<Vec<u8>> = matching_prefixes.into_keys().collect();
        self.sync_full_hashes(&prefixes)?;

        let cached = self.store.lookup_full_hashes(&matching_hashes)?;
        Ok(dedup_ids(cached.iter().filter(|(_, expired)| !expired)))
    }

    /// Fetch full hashes for a set of matched prefixes and fold the
    /// result into the cache.
    ///
    /// Every queried prefix gets its negative-cache window extended,
    /// whether or not it matched.
    fn sync_full_hashes(&mut self, prefixes: &[Vec<u8>]) -> Result<()> {
        debug!("Requesting full hashes for {} prefix(es)", prefixes.len());
        let states = self.client_states()?;
        let lookup = self.api.find_full_hashes(prefixes, &states)?;

        let tracked: BTreeSet<&ThreatListId> = states.iter().map(|(id, _)| id).collect();
        for m in &lookup.matches {
            if !tracked.contains(&m.id) {
                warn!("Ignoring full-hash match for untracked list {}", m.id);
                continue;
            }
            self.store.store_full_hash(
                &m.id,
                &m.hash,
                m.cache_duration,
                m.malware_threat_type.as_deref(),
            )?;
        }
        for prefix in prefixes {
            self.store
                .update_hash_prefix_expiration(prefix, lookup.negative_cache)?;
        }
        self.store.commit()?;
        Ok(())
    }

    /// The tracked lists and their client states, in a stable order.
    fn client_states(&mut self) -> Result<Vec<(ThreatListId, Option<String>)>> {
        let mut states: Vec<_> = self.store.get_client_states()?.into_iter().collect();
        states.sort();
        Ok(states)
    }
}

/// Collect distinct list ids, preserving first-seen order.
fn dedup_ids<'a>(rows: impl Iterator<Item = &'a (ThreatListId, bool)>) -> Vec<ThreatListId> {
    let mut out: Vec<ThreatListId> = Vec::new();
    for (id, _) in rows {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}
