use clap::Parser;
use log::{LevelFilter, error};
use mijia_listener::app::{Options, run_with_io};
use mijia_listener::scanner::scanner_for;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

/// Resolves on Ctrl-C. If the signal handler cannot be installed the
/// program runs until the scanner ends.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let options = Options::parse();

    // RUST_LOG overrides the level picked by --verbose
    env_logger::Builder::new()
        .filter_level(if options.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    let scanner = scanner_for(options.backend);
    let mut stdout = std::io::stdout().lock();

    match run_with_io(options, scanner, &mut stdout, ctrl_c()).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            error!("{why}");
            std::process::exit(EXIT_ERROR);
        }
    }
}
