//! BLE scanner abstraction for Mijia tags.
//!
//! Backends deliver raw advertisements through a channel. They do not decode
//! anything; filtering and decoding happen in [`crate::daemon`].

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::mac_address::MacAddress;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;

/// Bluetooth "Service Data - 16-bit UUID" AD type.
pub const SERVICE_DATA_AD_TYPE: u8 = 0x16;

/// Xiaomi service UUID 0xFE95, as it appears on air (little-endian).
///
/// Every Mijia service data field starts with these two bytes.
pub const MIJIA_SERVICE_SIGNATURE: [u8; 2] = [0x95, 0xFE];

/// Channel buffer size for advertisements.
pub const ADVERTISEMENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Backend not available (not compiled in)
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// One received advertisement: the advertiser address plus its AD structures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: MacAddress,
    /// `(ad_type, data)` pairs in the order they were received
    pub fields: Vec<(u8, Vec<u8>)>,
}

impl Advertisement {
    pub fn new(address: MacAddress) -> Self {
        Self {
            address,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, ad_type: u8, data: impl Into<Vec<u8>>) -> Self {
        self.fields.push((ad_type, data.into()));
        self
    }

    /// Data of the first AD structure of the given type.
    pub fn value(&self, ad_type: u8) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(t, _)| *t == ad_type)
            .map(|(_, data)| data.as_slice())
    }

    /// Same as [`Advertisement::value`], rendered as lower-case hex.
    pub fn value_text(&self, ad_type: u8) -> Option<String> {
        self.value(ad_type)
            .map(|data| data.iter().map(|b| format!("{b:02x}")).collect())
    }
}

/// Convenience alias for advertisements or a fatal scanner failure.
pub type AdvertisementResult = Result<Advertisement, ScanError>;

/// Future returned by [`Scanner`] operations.
pub type ScanFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ScanError>> + Send + 'a>>;

/// A source of raw BLE advertisements.
///
/// `start` begins scanning and returns the receiving end of the advertisement
/// stream. An `Err` item on the stream is fatal; a closed stream means the
/// scan ended. `stop` ends scanning and releases the radio.
pub trait Scanner: Send {
    fn start(&mut self, passive: bool) -> ScanFuture<'_, mpsc::Receiver<AdvertisementResult>>;

    fn stop(&mut self) -> ScanFuture<'_, ()>;
}

impl<S: Scanner + ?Sized> Scanner for Box<S> {
    fn start(&mut self, passive: bool) -> ScanFuture<'_, mpsc::Receiver<AdvertisementResult>> {
        (**self).start(passive)
    }

    fn stop(&mut self) -> ScanFuture<'_, ()> {
        (**self).stop()
    }
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(ScanError::BackendNotAvailable(s.to_string())),
        }
    }
}

/// Create the scanner for a compiled-in backend.
pub fn scanner_for(backend: Backend) -> Box<dyn Scanner> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => Box::new(bluer::BluerScanner::default()),
        #[cfg(feature = "hci")]
        Backend::Hci => Box::new(hci::HciScanner::new(0)),
    }
}
