//! Core application runner (business logic) for `mijia-listener`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit codes
//! so it can be tested deterministically.

use crate::alias::{self, Alias, AliasMap};
use crate::daemon::{DaemonError, MijiaDaemon, ObserverError};
use crate::output::{self, Format};
use crate::scanner::{Backend, Scanner};
use crate::tag::SensorTag;
use clap::Parser;
use log::warn;
use std::future::Future;
use std::io;
use std::io::Write;
use thiserror::Error;
use tokio::sync::mpsc;

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Output format
    #[arg(long, default_value_t, value_enum)]
    pub format: Format,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "mijia_measurement")]
    pub influxdb_measurement: String,

    /// Specify human-readable alias for a tag.
    /// Format: --alias 4C:65:A8:D0:1E:0F=Bedroom
    #[arg(long = "alias", value_parser = alias::parse_alias, value_name = "ALIAS")]
    pub aliases: Vec<Alias>,

    /// Verbose output, log dropped advertisements
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Scan actively instead of passively (hci backend only)
    #[arg(long)]
    pub active: bool,
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Daemon(#[from] DaemonError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Run discovery until the scanner ends or `shutdown` resolves, writing one
/// formatted line per tag update to `out`.
///
/// Updates are handed from the scan task to this loop over a channel, so a
/// slow `out` never blocks scanning. A write error stops the daemon and is
/// returned once it has exited.
pub async fn run_with_io<S, F>(
    options: Options,
    scanner: S,
    out: &mut dyn Write,
    shutdown: F,
) -> Result<(), RunError>
where
    S: Scanner + 'static,
    F: Future<Output = ()>,
{
    let aliases: AliasMap = alias::to_map(&options.aliases);
    let formatter = output::formatter_for(options.format, &options.influxdb_measurement);

    let (tx, mut updates) = mpsc::unbounded_channel::<(SensorTag, bool)>();
    let observer = move |tag: &SensorTag, is_new: bool| -> Result<(), ObserverError> {
        tx.send((tag.clone(), is_new))
            .map_err(|_| "output loop has exited".into())
    };

    let handle = MijiaDaemon::new(scanner, observer)
        .passive(!options.active)
        .start();
    let stop = handle.stop_signal();

    tokio::pin!(shutdown);
    let mut write_error = None;
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some((tag, is_new)) = update else {
                    break;
                };
                let name = alias::resolve_name(&tag.address(), &aliases);
                let line = formatter.format(&tag, is_new, &name);
                if let Err(e) = writeln!(out, "{line}") {
                    warn!("Failed to write output, stopping: {e}");
                    stop.stop();
                    write_error = Some(e);
                    break;
                }
            }
            _ = &mut shutdown, if !stop.is_stopped() => stop.stop(),
        }
    }

    // Keep the receiver alive until the daemon is gone so late updates are
    // not reported as observer failures.
    let joined = handle.join().await;
    drop(updates);

    joined?;
    match write_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
