//! Discovery daemon: turns raw advertisements into tag updates.
//!
//! [`Discovery`] is the synchronous core. It filters advertisements, decodes
//! them, merges the result into the [`TagTable`] and notifies an
//! [`Observer`]. [`MijiaDaemon`] wraps it in a scan loop running on its own
//! tokio task, controlled through a [`DaemonHandle`].

use crate::clock::{Clock, SystemClock};
use crate::decoder;
use crate::scanner::{
    Advertisement, AdvertisementResult, MIJIA_SERVICE_SIGNATURE, SERVICE_DATA_AD_TYPE, ScanError,
    Scanner,
};
use crate::tag::{SensorTag, TagTable};
use log::{debug, error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

/// How long the scan loop waits for an advertisement before checking for a
/// stop request.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Error returned by an observer. Logged and otherwise ignored.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every tag update, on the scan task, after it has been committed.
pub trait Observer: Send {
    fn notify(&mut self, tag: &SensorTag, is_new: bool) -> Result<(), ObserverError>;
}

impl<F> Observer for F
where
    F: FnMut(&SensorTag, bool) -> Result<(), ObserverError> + Send,
{
    fn notify(&mut self, tag: &SensorTag, is_new: bool) -> Result<(), ObserverError> {
        self(tag, is_new)
    }
}

/// Tag table shared between the scan task and external readers.
pub type SharedTags = Arc<RwLock<TagTable>>;

/// Errors that end a daemon run.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("discovery task failed: {0}")]
    Task(#[from] JoinError),
}

/// Lifecycle of a started daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Scanning,
    Stopping,
    Idle,
}

/// Whether a service data field belongs to a Mijia tag.
fn carries_signature(data: &[u8]) -> bool {
    data.windows(MIJIA_SERVICE_SIGNATURE.len())
        .any(|w| w == MIJIA_SERVICE_SIGNATURE)
}

/// Filter, decode, merge and notify, one advertisement at a time.
pub struct Discovery<O, C> {
    tags: SharedTags,
    observer: O,
    clock: C,
}

impl<O: Observer, C: Clock> Discovery<O, C> {
    pub fn new(observer: O, clock: C) -> Self {
        Self {
            tags: SharedTags::default(),
            observer,
            clock,
        }
    }

    pub fn tags(&self) -> SharedTags {
        Arc::clone(&self.tags)
    }

    /// Handle one advertisement.
    ///
    /// Advertisements without Mijia service data are ignored, and ones that
    /// fail to decode are dropped. Otherwise the addressed tag is created or
    /// updated and the observer is called once.
    pub fn on_advertisement(&mut self, adv: &Advertisement) {
        let Some(data) = adv.value(SERVICE_DATA_AD_TYPE) else {
            return;
        };
        if !carries_signature(data) {
            return;
        }

        let reading = match decoder::decode(adv.address, data) {
            Ok(reading) => reading,
            Err(e) => {
                debug!("Dropping advertisement from {}: {e}", adv.address);
                return;
            }
        };

        let now = self.clock.now();
        let (is_new, tag) = {
            let mut table = self.tags.write().unwrap_or_else(PoisonError::into_inner);
            let (is_new, tag) = table.apply(&reading, now);
            (is_new, tag.clone())
        };

        if is_new {
            info!("Discovered Mijia tag {}", tag.address());
        }
        self.notify(&tag, is_new);
    }

    /// Call the observer, containing both errors and panics.
    fn notify(&mut self, tag: &SensorTag, is_new: bool) {
        let observer = &mut self.observer;
        match panic::catch_unwind(AssertUnwindSafe(|| observer.notify(tag, is_new))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Observer failed for {}: {e}", tag.address()),
            Err(_) => error!("Observer panicked for {}", tag.address()),
        }
    }
}

/// A daemon that has not been started yet.
pub struct MijiaDaemon<S, O, C = SystemClock> {
    scanner: S,
    discovery: Discovery<O, C>,
    passive: bool,
}

impl<S, O> MijiaDaemon<S, O, SystemClock>
where
    S: Scanner + 'static,
    O: Observer + 'static,
{
    pub fn new(scanner: S, observer: O) -> Self {
        Self::with_clock(scanner, observer, SystemClock)
    }
}

impl<S, O, C> MijiaDaemon<S, O, C>
where
    S: Scanner + 'static,
    O: Observer + 'static,
    C: Clock + 'static,
{
    pub fn with_clock(scanner: S, observer: O, clock: C) -> Self {
        Self {
            scanner,
            discovery: Discovery::new(observer, clock),
            passive: true,
        }
    }

    /// Request an active scan instead of the default passive one.
    pub fn passive(mut self, passive: bool) -> Self {
        self.passive = passive;
        self
    }

    /// Spawn the scan loop on the current tokio runtime.
    ///
    /// Consumes the daemon, so a running daemon cannot be started again.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn start(self) -> DaemonHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let tags = self.discovery.tags();
        let task = tokio::spawn(run(
            self.scanner,
            self.discovery,
            self.passive,
            Arc::clone(&stop),
        ));
        DaemonHandle { stop, tags, task }
    }
}

/// Cloneable stop request for a running daemon.
#[derive(Debug, Clone)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Ask the scan loop to exit at its next poll boundary. Idempotent.
    pub fn stop(&self) {
        if !self.0.swap(true, Ordering::AcqRel) {
            info!("Stopping Mijia discovery");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Control over a started daemon.
#[derive(Debug)]
pub struct DaemonHandle {
    stop: Arc<AtomicBool>,
    tags: SharedTags,
    task: JoinHandle<Result<(), ScanError>>,
}

impl DaemonHandle {
    pub fn stop(&self) {
        self.stop_signal().stop();
    }

    pub fn stop_signal(&self) -> StopSignal {
        StopSignal(Arc::clone(&self.stop))
    }

    pub fn state(&self) -> DaemonState {
        if self.task.is_finished() {
            DaemonState::Idle
        } else if self.stop.load(Ordering::Acquire) {
            DaemonState::Stopping
        } else {
            DaemonState::Scanning
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Snapshot of every known tag, ordered by address.
    pub fn tags(&self) -> Vec<SensorTag> {
        self.tags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Wait for the scan loop to exit and return why it did.
    pub async fn join(self) -> Result<(), DaemonError> {
        self.task.await??;
        Ok(())
    }
}

async fn run<S, O, C>(
    mut scanner: S,
    mut discovery: Discovery<O, C>,
    passive: bool,
    stop: Arc<AtomicBool>,
) -> Result<(), ScanError>
where
    S: Scanner,
    O: Observer,
    C: Clock,
{
    let mut advertisements = scanner.start(passive).await?;
    info!(
        "Scanning for Mijia tags ({})",
        if passive { "passive" } else { "active" }
    );

    let result = scan_loop(&mut advertisements, &mut discovery, &stop).await;
    drop(advertisements);

    let stopped = scanner.stop().await;
    info!("Mijia discovery stopped");
    match (result, stopped) {
        (Err(e), Err(stop_err)) => {
            warn!("Failed to stop scanner: {stop_err}");
            Err(e)
        }
        (result, stopped) => result.and(stopped),
    }
}

async fn scan_loop<O: Observer, C: Clock>(
    advertisements: &mut mpsc::Receiver<AdvertisementResult>,
    discovery: &mut Discovery<O, C>,
    stop: &AtomicBool,
) -> Result<(), ScanError> {
    while !stop.load(Ordering::Acquire) {
        match tokio::time::timeout(POLL_INTERVAL, advertisements.recv()).await {
            Ok(Some(Ok(adv))) => discovery.on_advertisement(&adv),
            Ok(Some(Err(e))) => return Err(e),
            Ok(None) => {
                debug!("Advertisement stream closed");
                break;
            }
            Err(_elapsed) => {}
        }
    }
    Ok(())
}
