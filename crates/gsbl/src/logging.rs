//! Configure the tracing subscriber for the command line tool.

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::Context;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;

/// Install the global tracing subscriber.
///
/// Events go to stderr, or to `log_file` when one is given.  The
/// returned guard must stay alive for the life of the process, or
/// buffered file output is lost.
pub(crate) fn setup(debug: bool, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Could not open log file {:?}", path))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}
