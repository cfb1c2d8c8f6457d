//! Threat-list cache storage backed by sqlite3.
//!
//! One sqlite database holds everything: the tracked lists and their
//! client-state tokens, the hash prefixes with their negative-cache
//! expiries, the positively-cached full hashes, and a small metadata
//! table used to version the schema.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use rusqlite::{OptionalExtension, params};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::list::ThreatListId;
use crate::storage::{HashPrefixChunk, Store, cue_of};
use crate::Result;

/// Local threat-list cache using a sqlite3 connection.
///
/// A `SqliteStore` is a single logical writer; open one per process.
/// Mutations accumulate in an implicit transaction until
/// [`commit`](Store::commit) or [`rollback`](Store::rollback).
pub struct SqliteStore {
    /// Connection to the sqlite3 database.
    conn: rusqlite::Connection,
}

impl SqliteStore {
    /// Open (or create) a cache database at `path`.
    ///
    /// `busy_timeout` bounds how long we wait for a contended database
    /// lock before surfacing a storage error.
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        debug!("Opening sqlite cache at {:?}", path.as_ref());
        let conn = rusqlite::Connection::open(path)?;
        SqliteStore::from_conn(conn, busy_timeout)
    }

    /// Construct a store over a memory-backed database.
    ///
    /// Used for testing.
    #[cfg(test)]
    pub(crate) fn in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        SqliteStore::from_conn(conn, Duration::from_secs(10))
    }

    /// Construct a store from an open connection.
    fn from_conn(conn: rusqlite::Connection, busy_timeout: Duration) -> Result<Self> {
        conn.busy_timeout(busy_timeout)?;
        // sqlite does not enforce foreign keys unless you set this pragma
        // on the connection; we rely on them for cascading list deletion.
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let mut store = SqliteStore { conn };
        store.check_schema()?;
        Ok(store)
    }

    /// Check whether the database has the schema version we expect, and
    /// install or re-initialize it if not.
    ///
    /// A version mismatch (in either direction) throws the cache away:
    /// the protocol recovers by re-syncing from an empty state, so
    /// migration machinery would buy nothing.
    fn check_schema(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;

        let db_n_tables: u32 = tx.query_row(
            "SELECT COUNT(name) FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            [],
            |row| row.get(0),
        )?;
        if db_n_tables == 0 {
            tx.execute_batch(INSTALL_SCHEMA)?;
            tx.commit()?;
            return Ok(());
        }

        let stored_version: Option<u32> = tx
            .query_row(
                "SELECT value FROM CacheMeta WHERE name = 'schema_version'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .unwrap_or(None)
            .and_then(|v| v.parse().ok());

        if stored_version == Some(SCHEMA_VERSION) {
            // Rolls back the transaction, but nothing was done.
            return Ok(());
        }

        info!(
            "Cache schema is {:?}, we need v{}; re-initializing the cache",
            stored_version, SCHEMA_VERSION
        );
        tx.execute_batch(DROP_SCHEMA)?;
        tx.execute_batch(INSTALL_SCHEMA)?;
        tx.commit()?;
        Ok(())
    }

    /// Open an implicit transaction if none is active.
    ///
    /// Every `Store` operation runs under one, so that a whole update
    /// pass (or lookup) sees and produces a consistent snapshot.
    fn ensure_txn(&mut self) -> Result<()> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN DEFERRED;")?;
        }
        Ok(())
    }

    /// The prefix values of one list in lexicographic order.
    fn sorted_prefixes(&mut self, id: &ThreatListId) -> Result<Vec<Vec<u8>>> {
        let mut stmt = self.conn.prepare_cached(FIND_PREFIXES_SORTED)?;
        let rows = stmt.query_map(
            params![id.threat_type(), id.platform_type(), id.threat_entry_type()],
            |row| row.get::<_, Vec<u8>>(0),
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Round a duration up to whole seconds for persisting, as the fractional
/// cache durations the API sends must not be truncated downward.
fn whole_seconds(d: Duration) -> i64 {
    let mut secs = i64::try_from(d.as_secs()).unwrap_or(i64::MAX);
    if d.subsec_nanos() > 0 {
        secs = secs.saturating_add(1);
    }
    secs
}

impl Store for SqliteStore {
    fn get_threat_lists(&mut self) -> Result<Vec<ThreatListId>> {
        self.ensure_txn()?;
        let mut stmt = self.conn.prepare_cached(FIND_THREAT_LISTS)?;
        let rows = stmt.query_map([], |row| {
            Ok(ThreatListId::new(
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn get_client_states(&mut self) -> Result<HashMap<ThreatListId, Option<String>>> {
        self.ensure_txn()?;
        let mut stmt = self.conn.prepare_cached(FIND_CLIENT_STATES)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                ThreatListId::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ),
                row.get::<_, Option<String>>(3)?,
            ))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (id, state) = row?;
            out.insert(id, state);
        }
        Ok(out)
    }

    fn add_threat_list(&mut self, id: &ThreatListId) -> Result<()> {
        self.ensure_txn()?;
        let now = OffsetDateTime::now_utc();
        self.conn.execute(
            INSERT_THREAT_LIST,
            params![
                id.threat_type(),
                id.platform_type(),
                id.threat_entry_type(),
                now
            ],
        )?;
        Ok(())
    }

    fn delete_threat_list(&mut self, id: &ThreatListId) -> Result<()> {
        self.ensure_txn()?;
        let n = self.conn.execute(
            DELETE_THREAT_LIST,
            params![id.threat_type(), id.platform_type(), id.threat_entry_type()],
        )?;
        debug!("Deleted {} threat list row(s) for {}", n, id);
        Ok(())
    }

    fn update_threat_list_client_state(&mut self, id: &ThreatListId, state: &str) -> Result<()> {
        self.ensure_txn()?;
        let now = OffsetDateTime::now_utc();
        self.conn.execute(
            UPDATE_CLIENT_STATE,
            params![
                state,
                now,
                id.threat_type(),
                id.platform_type(),
                id.threat_entry_type()
            ],
        )?;
        Ok(())
    }

    fn populate_hash_prefix_list(
        &mut self,
        id: &ThreatListId,
        chunk: &HashPrefixChunk,
    ) -> Result<()> {
        self.ensure_txn()?;
        let now = OffsetDateTime::now_utc();
        let mut stmt = self.conn.prepare_cached(INSERT_PREFIX)?;
        for prefix in chunk.iter() {
            stmt.execute(params![
                prefix,
                &cue_of(prefix)[..],
                id.threat_type(),
                id.platform_type(),
                id.threat_entry_type(),
                now
            ])?;
        }
        Ok(())
    }

    fn delete_hash_prefix_list(&mut self, id: &ThreatListId) -> Result<()> {
        self.ensure_txn()?;
        let n = self.conn.execute(
            DELETE_PREFIX_LIST,
            params![id.threat_type(), id.platform_type(), id.threat_entry_type()],
        )?;
        debug!("Dropped {} hash prefix(es) of list {}", n, id);
        Ok(())
    }

    fn hash_prefix_list_checksum(&mut self, id: &ThreatListId) -> Result<[u8; 32]> {
        self.ensure_txn()?;
        let mut digest = Sha256::new();
        for prefix in self.sorted_prefixes(id)? {
            digest.update(&prefix);
        }
        Ok(digest.finalize().into())
    }

    fn remove_hash_prefix_indices(&mut self, id: &ThreatListId, indices: &[usize]) -> Result<()> {
        if indices.is_empty() {
            return Ok(());
        }
        self.ensure_txn()?;
        let doomed: HashSet<usize> = indices.iter().copied().collect();
        let values: Vec<Vec<u8>> = self
            .sorted_prefixes(id)?
            .into_iter()
            .enumerate()
            .filter(|(i, _)| doomed.contains(i))
            .map(|(_, v)| v)
            .collect();
        let mut stmt = self.conn.prepare_cached(DELETE_PREFIX_BY_VALUE)?;
        for value in &values {
            stmt.execute(params![
                value,
                id.threat_type(),
                id.platform_type(),
                id.threat_entry_type()
            ])?;
        }
        debug!("Removed {} prefix(es) from list {} by index", values.len(), id);
        Ok(())
    }

    fn lookup_hash_prefixes(&mut self, cues: &[[u8; 4]]) -> Result<Vec<(Vec<u8>, bool)>> {
        self.ensure_txn()?;
        let now = OffsetDateTime::now_utc();
        let mut stmt = self.conn.prepare_cached(FIND_PREFIXES_BY_CUE)?;
        let mut out = Vec::new();
        for cue in cues {
            let rows = stmt.query_map(params![now, &cue[..]], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, bool>(1)?))
            })?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    }

    fn update_hash_prefix_expiration(&mut self, prefix: &[u8], ttl: Duration) -> Result<()> {
        self.ensure_txn()?;
        let expires = OffsetDateTime::now_utc() + time::Duration::seconds(whole_seconds(ttl));
        self.conn
            .execute(UPDATE_PREFIX_EXPIRATION, params![expires, prefix])?;
        Ok(())
    }

    fn lookup_full_hashes(&mut self, hashes: &[[u8; 32]]) -> Result<Vec<(ThreatListId, bool)>> {
        self.ensure_txn()?;
        let now = OffsetDateTime::now_utc();
        let mut stmt = self.conn.prepare_cached(FIND_FULL_HASHES)?;
        let mut out = Vec::new();
        for hash in hashes {
            let rows = stmt.query_map(params![now, &hash[..]], |row| {
                Ok((
                    ThreatListId::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ),
                    row.get::<_, bool>(3)?,
                ))
            })?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    }

    fn store_full_hash(
        &mut self,
        id: &ThreatListId,
        hash: &[u8; 32],
        ttl: Duration,
        malware_threat_type: Option<&str>,
    ) -> Result<()> {
        self.ensure_txn()?;
        let now = OffsetDateTime::now_utc();
        let expires = now + time::Duration::seconds(whole_seconds(ttl));
        self.conn.execute(
            INSERT_FULL_HASH,
            params![
                &hash[..],
                id.threat_type(),
                id.platform_type(),
                id.threat_entry_type(),
                now,
                expires,
                malware_threat_type
            ],
        )?;
        Ok(())
    }

    fn cleanup_full_hashes(&mut self, grace: Duration) -> Result<()> {
        self.ensure_txn()?;
        let cutoff = OffsetDateTime::now_utc() - time::Duration::seconds(whole_seconds(grace));
        let n = self.conn.execute(DELETE_EXPIRED_FULL_HASHES, params![cutoff])?;
        debug!("Purged {} stale full hash(es)", n);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT;")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK;")?;
        }
        Ok(())
    }
}

/// Version number of the cache schema below.
const SCHEMA_VERSION: u32 = 1;

/// Set up the cache schema in an empty database.
const INSTALL_SCHEMA: &str = "
  -- Key/value metadata; currently only the schema version, which we
  -- use to throw the cache away rather than migrate it.
  CREATE TABLE CacheMeta (
    name TEXT NOT NULL PRIMARY KEY,
    value TEXT NOT NULL
  );

  INSERT INTO CacheMeta (name, value) VALUES ('schema_version', '1');

  -- Every threat list we track, with the opaque server token naming the
  -- version of the list we hold.
  CREATE TABLE ThreatLists (
    threat_type TEXT NOT NULL,
    platform_type TEXT NOT NULL,
    threat_entry_type TEXT NOT NULL,
    client_state TEXT,
    updated_at DATE NOT NULL,
    PRIMARY KEY (threat_type, platform_type, threat_entry_type)
  );

  -- The hash prefixes of each list.  'cue' is the first four bytes of
  -- 'value', the probe key for lookups.
  CREATE TABLE HashPrefixes (
    value BLOB NOT NULL,
    cue BLOB NOT NULL,
    threat_type TEXT NOT NULL,
    platform_type TEXT NOT NULL,
    threat_entry_type TEXT NOT NULL,
    negative_expires_at DATE NOT NULL,
    PRIMARY KEY (value, threat_type, platform_type, threat_entry_type),
    FOREIGN KEY (threat_type, platform_type, threat_entry_type)
      REFERENCES ThreatLists (threat_type, platform_type, threat_entry_type)
      ON DELETE CASCADE
  );
  CREATE INDEX HashPrefixes_cue ON HashPrefixes (cue);

  -- Positively-cached full hashes.
  CREATE TABLE FullHashes (
    value BLOB NOT NULL,
    threat_type TEXT NOT NULL,
    platform_type TEXT NOT NULL,
    threat_entry_type TEXT NOT NULL,
    downloaded_at DATE NOT NULL,
    expires_at DATE NOT NULL,
    malware_threat_type TEXT,
    PRIMARY KEY (value, threat_type, platform_type, threat_entry_type)
  );
  CREATE INDEX FullHashes_expires_at ON FullHashes (expires_at);
";

/// Tear the schema down for re-initialization.
const DROP_SCHEMA: &str = "
  DROP TABLE IF EXISTS FullHashes;
  DROP TABLE IF EXISTS HashPrefixes;
  DROP TABLE IF EXISTS ThreatLists;
  DROP TABLE IF EXISTS CacheMeta;
";

/// Query: every tracked threat list.
const FIND_THREAT_LISTS: &str = "
  SELECT threat_type, platform_type, threat_entry_type
  FROM ThreatLists
  ORDER BY threat_type, platform_type, threat_entry_type;
";

/// Query: every tracked threat list with its client state.
const FIND_CLIENT_STATES: &str = "
  SELECT threat_type, platform_type, threat_entry_type, client_state
  FROM ThreatLists;
";

/// Query: start tracking a list, unless already present.
const INSERT_THREAT_LIST: &str = "
  INSERT OR IGNORE INTO ThreatLists
    ( threat_type, platform_type, threat_entry_type, client_state, updated_at )
  VALUES ( ?, ?, ?, NULL, ? );
";

/// Query: stop tracking a list.  Prefixes cascade.
const DELETE_THREAT_LIST: &str = "
  DELETE FROM ThreatLists
  WHERE threat_type = ? AND platform_type = ? AND threat_entry_type = ?;
";

/// Query: record a new client state for a list.
const UPDATE_CLIENT_STATE: &str = "
  UPDATE ThreatLists SET client_state = ?, updated_at = ?
  WHERE threat_type = ? AND platform_type = ? AND threat_entry_type = ?;
";

/// Query: add one hash prefix to a list.
const INSERT_PREFIX: &str = "
  INSERT INTO HashPrefixes
    ( value, cue, threat_type, platform_type, threat_entry_type, negative_expires_at )
  VALUES ( ?, ?, ?, ?, ?, ? );
";

/// Query: drop all prefixes of a list.
const DELETE_PREFIX_LIST: &str = "
  DELETE FROM HashPrefixes
  WHERE threat_type = ? AND platform_type = ? AND threat_entry_type = ?;
";

/// Query: one list's prefix values in lexicographic order.
///
/// Index removals and the update checksum are both defined over this
/// ordering.
const FIND_PREFIXES_SORTED: &str = "
  SELECT value FROM HashPrefixes
  WHERE threat_type = ? AND platform_type = ? AND threat_entry_type = ?
  ORDER BY value;
";

/// Query: remove one prefix value from a list.
const DELETE_PREFIX_BY_VALUE: &str = "
  DELETE FROM HashPrefixes
  WHERE value = ? AND threat_type = ? AND platform_type = ? AND threat_entry_type = ?;
";

/// Query: distinct prefix values under a cue, each with whether any row
/// holding it has an expired negative-cache timestamp.
const FIND_PREFIXES_BY_CUE: &str = "
  SELECT value, MAX(negative_expires_at < ?)
  FROM HashPrefixes
  WHERE cue = ?
  GROUP BY value;
";

/// Query: push out the negative-cache expiry of a prefix value, across
/// all lists carrying it.
const UPDATE_PREFIX_EXPIRATION: &str = "
  UPDATE HashPrefixes SET negative_expires_at = ?
  WHERE value = ?;
";

/// Query: the lists holding a full hash, with its expiry status.
const FIND_FULL_HASHES: &str = "
  SELECT threat_type, platform_type, threat_entry_type, expires_at < ?
  FROM FullHashes
  WHERE value = ?;
";

/// Query: upsert one full hash.
const INSERT_FULL_HASH: &str = "
  INSERT OR REPLACE INTO FullHashes
    ( value, threat_type, platform_type, threat_entry_type,
      downloaded_at, expires_at, malware_threat_type )
  VALUES ( ?, ?, ?, ?, ?, ?, ? );
";

/// Query: purge full hashes whose expiry is older than the grace cutoff.
const DELETE_EXPIRED_FULL_HASHES: &str = "
  DELETE FROM FullHashes WHERE expires_at < ?;
";

#[cfg(test)]
pub(crate) mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;

    /// A store over a fresh in-memory database, plus a list it tracks.
    pub(crate) fn store_with_list() -> (SqliteStore, ThreatListId) {
        let mut store = SqliteStore::in_memory().unwrap();
        let id = ThreatListId::new("MALWARE", "ANY_PLATFORM", "URL");
        store.add_threat_list(&id).unwrap();
        store.commit().unwrap();
        (store, id)
    }

    /// A 4-byte prefix chunk from a list of values.
    pub(crate) fn chunk(prefixes: &[&[u8; 4]]) -> HashPrefixChunk {
        let mut raw = Vec::new();
        for p in prefixes {
            raw.extend_from_slice(&p[..]);
        }
        HashPrefixChunk::new(4, raw).unwrap()
    }

    #[test]
    fn install_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let timeout = Duration::from_secs(10);
        {
            let _store = SqliteStore::open(&path, timeout).unwrap();
        }
        // Second open: schema is current, nothing is reinitialized.
        {
            let mut store = SqliteStore::open(&path, timeout).unwrap();
            let id = ThreatListId::new("MALWARE", "ANY_PLATFORM", "URL");
            store.add_threat_list(&id).unwrap();
            store.commit().unwrap();
        }
        // Tamper with the schema version: the cache must be thrown away.
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch("UPDATE CacheMeta SET value = '999' WHERE name = 'schema_version';")
                .unwrap();
        }
        {
            let mut store = SqliteStore::open(&path, timeout).unwrap();
            assert!(store.get_threat_lists().unwrap().is_empty());
        }
    }

    #[test]
    fn threat_list_roundtrip() {
        let (mut store, id) = store_with_list();
        // Idempotent insert.
        store.add_threat_list(&id).unwrap();
        let other = ThreatListId::new("SOCIAL_ENGINEERING", "ANY_PLATFORM", "URL");
        store.add_threat_list(&other).unwrap();
        store.commit().unwrap();

        assert_eq!(store.get_threat_lists().unwrap(), vec![id.clone(), other.clone()]);
        let states = store.get_client_states().unwrap();
        assert_eq!(states[&id], None);

        store.update_threat_list_client_state(&id, "state-1").unwrap();
        store.commit().unwrap();
        let states = store.get_client_states().unwrap();
        assert_eq!(states[&id], Some("state-1".to_owned()));

        store.delete_threat_list(&other).unwrap();
        store.commit().unwrap();
        assert_eq!(store.get_threat_lists().unwrap(), vec![id]);
    }

    #[test]
    fn checksum_over_sorted_prefixes() {
        let (mut store, id) = store_with_list();
        // Deliberately unsorted input.
        store
            .populate_hash_prefix_list(&id, &chunk(&[b"ccc1", b"aaa1", b"bbb1"]))
            .unwrap();
        store.commit().unwrap();

        let mut expected = Sha256::new();
        expected.update(b"aaa1bbb1ccc1");
        let expected: [u8; 32] = expected.finalize().into();
        assert_eq!(store.hash_prefix_list_checksum(&id).unwrap(), expected);
    }

    #[test]
    fn remove_by_sorted_index() {
        let (mut store, id) = store_with_list();
        store
            .populate_hash_prefix_list(&id, &chunk(&[b"ccc1", b"aaa1", b"bbb1"]))
            .unwrap();
        store.commit().unwrap();

        // Index 1 of the sorted order is "bbb1".
        store.remove_hash_prefix_indices(&id, &[1]).unwrap();
        store.commit().unwrap();

        assert_eq!(
            store.sorted_prefixes(&id).unwrap(),
            vec![b"aaa1".to_vec(), b"ccc1".to_vec()]
        );

        // Out-of-range indices are ignored.
        store.remove_hash_prefix_indices(&id, &[7]).unwrap();
        assert_eq!(store.sorted_prefixes(&id).unwrap().len(), 2);
    }

    #[test]
    fn deleting_a_list_cascades_to_prefixes() {
        let (mut store, id) = store_with_list();
        store
            .populate_hash_prefix_list(&id, &chunk(&[b"aaa1"]))
            .unwrap();
        store.commit().unwrap();

        store.delete_threat_list(&id).unwrap();
        store.commit().unwrap();
        assert!(store.lookup_hash_prefixes(&[*b"aaa1"]).unwrap().is_empty());
    }

    #[test]
    fn prefix_lookup_and_negative_cache() {
        let (mut store, id) = store_with_list();
        store
            .populate_hash_prefix_list(&id, &chunk(&[b"aaa1", b"bbb1"]))
            .unwrap();
        store.commit().unwrap();
        // Insertion timestamps must be strictly in the past first.
        std::thread::sleep(Duration::from_millis(10));

        // Fresh inserts are born expired: a lookup must re-verify.
        let rows = store.lookup_hash_prefixes(&[*b"aaa1"]).unwrap();
        assert_eq!(rows, vec![(b"aaa1".to_vec(), true)]);

        // Extending the expiry makes the negative cache authoritative.
        store
            .update_hash_prefix_expiration(b"aaa1", Duration::from_secs(300))
            .unwrap();
        store.commit().unwrap();
        let rows = store.lookup_hash_prefixes(&[*b"aaa1"]).unwrap();
        assert_eq!(rows, vec![(b"aaa1".to_vec(), false)]);

        // Unknown cues match nothing.
        assert!(store.lookup_hash_prefixes(&[*b"zzzz"]).unwrap().is_empty());
    }

    #[test]
    fn longer_prefixes_share_the_cue_index() {
        let (mut store, id) = store_with_list();
        let mut raw = Vec::new();
        raw.extend_from_slice(b"aaa1bbbb");
        let chunk8 = HashPrefixChunk::new(8, raw).unwrap();
        store.populate_hash_prefix_list(&id, &chunk8).unwrap();
        store.commit().unwrap();
        std::thread::sleep(Duration::from_millis(10));

        let rows = store.lookup_hash_prefixes(&[*b"aaa1"]).unwrap();
        assert_eq!(rows, vec![(b"aaa1bbbb".to_vec(), true)]);
    }

    #[test]
    fn full_hash_cache() {
        let (mut store, id) = store_with_list();
        let hash = [0xab_u8; 32];

        store
            .store_full_hash(&id, &hash, Duration::from_secs(300), Some("LANDING"))
            .unwrap();
        store.commit().unwrap();
        assert_eq!(
            store.lookup_full_hashes(&[hash]).unwrap(),
            vec![(id.clone(), false)]
        );

        // Upsert with a zero TTL: the row is now expired but present.
        store.store_full_hash(&id, &hash, Duration::ZERO, None).unwrap();
        store.commit().unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(
            store.lookup_full_hashes(&[hash]).unwrap(),
            vec![(id.clone(), true)]
        );

        // Still within the grace period: cleanup keeps it.
        store
            .cleanup_full_hashes(Duration::from_secs(12 * 3600))
            .unwrap();
        store.commit().unwrap();
        assert_eq!(store.lookup_full_hashes(&[hash]).unwrap().len(), 1);

        // With no grace, the expired row goes away.
        store.cleanup_full_hashes(Duration::ZERO).unwrap();
        store.commit().unwrap();
        assert!(store.lookup_full_hashes(&[hash]).unwrap().is_empty());
    }

    #[test]
    fn rollback_discards_mutations() {
        let (mut store, id) = store_with_list();
        store
            .populate_hash_prefix_list(&id, &chunk(&[b"aaa1"]))
            .unwrap();
        store.rollback().unwrap();
        assert!(store.lookup_hash_prefixes(&[*b"aaa1"]).unwrap().is_empty());

        // Commit and rollback on an idle store are harmless.
        store.commit().unwrap();
        store.commit().unwrap();
        store.rollback().unwrap();
    }

    #[test]
    fn round_up_to_whole_seconds() {
        assert_eq!(whole_seconds(Duration::from_secs(300)), 300);
        assert_eq!(whole_seconds(Duration::from_secs_f64(300.5)), 301);
        assert_eq!(whole_seconds(Duration::ZERO), 0);
    }
}
