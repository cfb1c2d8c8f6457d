//! Persistent cache of threat lists, hash prefixes, and full hashes.
//!
//! The [`Store`] trait captures every operation the sync and lookup
//! engines need from the cache; [`SqliteStore`] is the shipped
//! implementation.  Any backend offering single-writer transactions and
//! an indexed lookup on the 4-byte cue would satisfy the trait.

pub(crate) mod sqlite;

use std::collections::HashMap;
use std::time::Duration;

pub use sqlite::SqliteStore;

use crate::list::ThreatListId;
use crate::{Error, Result};

/// A batch of equal-length hash prefixes for one threat list, as the
/// update wire format carries them: a prefix size and the prefixes
/// concatenated in one byte string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HashPrefixChunk {
    /// Length in bytes of each prefix in `raw`.
    prefix_size: usize,
    /// All prefixes, concatenated.
    raw: Vec<u8>,
}

impl HashPrefixChunk {
    /// Wrap a concatenated prefix buffer, checking its geometry.
    ///
    /// Prefixes are between 4 and 32 bytes, and the buffer must hold a
    /// whole number of them.
    pub fn new(prefix_size: usize, raw: Vec<u8>) -> Result<Self> {
        if !(4..=32).contains(&prefix_size) {
            return Err(Error::BadPrefixList("prefix size out of range"));
        }
        if !raw.len().is_multiple_of(prefix_size) {
            return Err(Error::BadPrefixList(
                "raw hash data is not a whole number of prefixes",
            ));
        }
        Ok(HashPrefixChunk { prefix_size, raw })
    }

    /// How many prefixes this chunk holds.
    pub fn len(&self) -> usize {
        self.raw.len() / self.prefix_size
    }

    /// True if the chunk holds no prefixes.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Iterate over the individual prefixes.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.raw.chunks_exact(self.prefix_size)
    }
}

/// Cue derived from a hash or hash prefix: its first four bytes.
///
/// The cue is the index key for the fast probe of the prefix table.
pub(crate) fn cue_of(value: &[u8]) -> [u8; 4] {
    let mut cue = [0_u8; 4];
    cue.copy_from_slice(&value[..4]);
    cue
}

/// Abstract interface to the persistent cache.
///
/// Mutating operations join an implicit transaction which stays open
/// until [`commit`](Store::commit) or [`rollback`](Store::rollback); the
/// sync engine uses this to make each list's update atomic.
pub trait Store {
    /// Return the identities of every threat list we track.
    fn get_threat_lists(&mut self) -> Result<Vec<ThreatListId>>;

    /// Return the stored client state token for every tracked list.
    ///
    /// `None` means the list has never completed an update.
    fn get_client_states(&mut self) -> Result<HashMap<ThreatListId, Option<String>>>;

    /// Start tracking a list.  Idempotent.
    fn add_threat_list(&mut self, id: &ThreatListId) -> Result<()>;

    /// Stop tracking a list, removing its hash prefixes with it.
    fn delete_threat_list(&mut self, id: &ThreatListId) -> Result<()>;

    /// Record the server-issued client state for a list.
    ///
    /// Must be called in the same transaction as the prefix mutations the
    /// state describes.
    fn update_threat_list_client_state(&mut self, id: &ThreatListId, state: &str) -> Result<()>;

    /// Bulk-insert prefixes for a list.  Their negative-cache expiry is
    /// the moment of insertion, i.e. already expired.
    fn populate_hash_prefix_list(&mut self, id: &ThreatListId, chunk: &HashPrefixChunk)
    -> Result<()>;

    /// Remove every prefix stored for a list.
    fn delete_hash_prefix_list(&mut self, id: &ThreatListId) -> Result<()>;

    /// SHA-256 over the list's prefixes, sorted lexicographically and
    /// concatenated.  This is the digest the server's update checksum is
    /// compared against.
    fn hash_prefix_list_checksum(&mut self, id: &ThreatListId) -> Result<[u8; 32]>;

    /// Remove the prefixes at the given 0-based positions of the list's
    /// lexicographically sorted order.
    fn remove_hash_prefix_indices(&mut self, id: &ThreatListId, indices: &[usize]) -> Result<()>;

    /// Probe the prefix table by cue.
    ///
    /// Returns each distinct matching prefix value, paired with a flag
    /// that is true iff at least one row holding that value has an
    /// expired negative-cache timestamp.
    fn lookup_hash_prefixes(&mut self, cues: &[[u8; 4]]) -> Result<Vec<(Vec<u8>, bool)>>;

    /// Push out the negative-cache expiry of every row with this prefix
    /// value to `ttl` from now.
    fn update_hash_prefix_expiration(&mut self, prefix: &[u8], ttl: Duration) -> Result<()>;

    /// Look up full hashes in the positive cache.
    ///
    /// Returns `(list, has_expired)` for every stored row whose value is
    /// in `hashes`.
    fn lookup_full_hashes(&mut self, hashes: &[[u8; 32]]) -> Result<Vec<(ThreatListId, bool)>>;

    /// Upsert a full hash, valid for `ttl` from now.
    fn store_full_hash(
        &mut self,
        id: &ThreatListId,
        hash: &[u8; 32],
        ttl: Duration,
        malware_threat_type: Option<&str>,
    ) -> Result<()>;

    /// Purge full hashes that expired more than `grace` ago.
    fn cleanup_full_hashes(&mut self, grace: Duration) -> Result<()>;

    /// Commit the open transaction, if any.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction, if any.
    fn rollback(&mut self) -> Result<()>;
}

/// A [`Store`] that can be passed around as a boxed object.
pub(crate) type DynStore = dyn Store + Send;

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn chunk_geometry() {
        let chunk = HashPrefixChunk::new(4, b"aaaabbbbcccc".to_vec()).unwrap();
        assert_eq!(chunk.len(), 3);
        assert!(!chunk.is_empty());
        let prefixes: Vec<&[u8]> = chunk.iter().collect();
        assert_eq!(prefixes, vec![&b"aaaa"[..], b"bbbb", b"cccc"]);
    }

    #[test]
    fn chunk_rejects_bad_geometry() {
        assert!(HashPrefixChunk::new(3, vec![0; 9]).is_err());
        assert!(HashPrefixChunk::new(33, vec![0; 33]).is_err());
        assert!(HashPrefixChunk::new(4, vec![0; 10]).is_err());
        assert!(HashPrefixChunk::new(4, vec![]).unwrap().is_empty());
    }

    #[test]
    fn cue_is_first_four_bytes() {
        let hash = [7_u8; 32];
        assert_eq!(cue_of(&hash), [7, 7, 7, 7]);
        assert_eq!(cue_of(b"abcdef"), *b"abcd");
    }
}
