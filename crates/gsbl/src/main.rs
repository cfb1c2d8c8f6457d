//! Command-line client for the Google Safe Browsing v4 Update API.
//!
//! `gsbl` keeps a local sqlite cache of threat-list hash prefixes in sync
//! with the Safe Browsing service, and can answer whether a URL appears
//! on any of the lists.
//!
//! Accessing the API requires a key; see
//! <https://developers.google.com/safe-browsing/v4/get-started>.
//!
//! Two modes:
//!
//! * `gsbl --api-key KEY --check-url URL` looks the URL up against the
//!   local cache (fetching full hashes on demand), prints the verdict,
//!   and exits.
//! * `gsbl --api-key KEY` runs update passes forever, sleeping as the
//!   service's fair-use policy demands.  `--onetime` instead runs a
//!   single pass with the fair-use delays discarded, which is only
//!   acceptable for ad-hoc testing.

#![warn(missing_docs)]
#![warn(noop_method_call)]
#![deny(unreachable_pub)]
#![warn(clippy::all)]
#![deny(clippy::cast_lossless)]
#![deny(clippy::checked_conversions)]
#![warn(clippy::cognitive_complexity)]
#![deny(clippy::exhaustive_enums)]
#![deny(clippy::exhaustive_structs)]
#![deny(clippy::missing_docs_in_private_items)]
#![warn(clippy::needless_borrow)]
#![allow(clippy::print_stderr)] // Allowed in this crate only.
#![allow(clippy::print_stdout)] // Allowed in this crate only.
#![warn(clippy::semicolon_if_nothing_returned)]
#![deny(clippy::unwrap_used)]

mod logging;

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use safebrowsing::{SafeBrowsingClient, SafeBrowsingConfig};
use tracing::{error, info, warn};

/// How long to pause the sync loop after a failed update pass.
const FAILURE_PAUSE: Duration = Duration::from_secs(3);

/// Keep a local Google Safe Browsing cache in sync, and check URLs
/// against it.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Safe Browsing API key.
    #[arg(long, value_name = "KEY")]
    api_key: String,

    /// Path to the sqlite cache database.
    #[arg(long, value_name = "FILE", default_value = "/tmp/gsb_v4.db")]
    db_path: PathBuf,

    /// Check whether this URL is blacklisted, print the answer, and
    /// exit.
    #[arg(long, value_name = "URL")]
    check_url: Option<String>,

    /// Run the blacklist sync once with reduced delays, then exit.
    #[arg(long)]
    onetime: bool,

    /// Show debug output.
    #[arg(long)]
    debug: bool,

    /// Path to a log file; by default we log to stderr.
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Database lock timeout in seconds.  Increase it if you see
    /// occasional "database is locked" errors.
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    timeout: u64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = logging::setup(args.debug, args.log.as_deref())?;

    let mut config = SafeBrowsingConfig::new(args.api_key.as_str(), &args.db_path);
    config.db_busy_timeout = Duration::from_secs(args.timeout);
    if args.onetime {
        warn!("Fair-use throttling disabled for this one-time sync");
        config.enforce_fair_use = false;
    }

    let mut client = SafeBrowsingClient::new(config).context("Could not set up the client")?;

    if let Some(url) = args.check_url {
        let lists = client
            .lookup_url(&url)
            .with_context(|| format!("Lookup of {:?} failed", url))?;
        if lists.is_empty() {
            println!("{} is not blacklisted", url);
        } else {
            let names: Vec<String> = lists.iter().map(ToString::to_string).collect();
            println!("{} is blacklisted in {}", url, names.join(", "));
        }
        return Ok(());
    }

    if args.onetime {
        client.update().context("Synchronization failed")?;
        return Ok(());
    }

    info!("Starting the blacklist sync loop");
    loop {
        if let Err(err) = client.update() {
            error!("Failed to synchronize with the Safe Browsing service: {}", err);
            thread::sleep(FAILURE_PAUSE);
        }
    }
}
