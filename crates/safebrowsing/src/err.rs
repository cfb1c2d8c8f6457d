//! Declare an error type for the safebrowsing crate.

use std::sync::Arc;

use thiserror::Error;

use crate::list::ThreatListId;

/// An error originated by the Safe Browsing client code.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// An empty string was given to a lookup operation.
    #[error("Cannot look up an empty URL")]
    EmptyLookupUrl,
    /// rusqlite gave us an error.
    #[error("Error from sqlite database")]
    Sqlite(#[source] Arc<rusqlite::Error>),
    /// A hash prefix list with an impossible geometry.
    #[error("Invalid hash prefix list: {0}")]
    BadPrefixList(&'static str),
    /// The local prefix list disagrees with the checksum the server sent.
    ///
    /// The client state for the list was not advanced, so the next update
    /// pass will re-request the same delta; if this error persists, delete
    /// the cache database and re-sync from scratch.
    #[error(
        "Checksum mismatch for list {list}: server says {expected}, computed {computed}; \
         delete the cache to re-sync from scratch"
    )]
    ChecksumMismatch {
        /// Which list failed verification.
        list: ThreatListId,
        /// The checksum from the server's update response, hex-encoded.
        expected: String,
        /// The checksum of the local prefix list, hex-encoded.
        computed: String,
    },
    /// The server replied with a non-retriable HTTP status.
    #[error("Safe Browsing API returned HTTP status {status}: {message}")]
    ApiStatus {
        /// The HTTP status code.
        status: u16,
        /// The response body, as far as we could read it.
        message: String,
    },
    /// A response decoded as JSON but did not have the shape we need.
    #[error("Malformed Safe Browsing API response: {0}")]
    MalformedResponse(&'static str),
    /// A response body was not the JSON we asked for.
    #[error("Could not decode Safe Browsing API response")]
    Json(#[source] Arc<serde_json::Error>),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Sqlite(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(Arc::new(err))
    }
}

/// A `Result` whose error is [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
