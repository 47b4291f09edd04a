use crate::mac_address::MacAddress;
use crate::scanner::{
    Advertisement, AdvertisementResult, SERVICE_DATA_AD_TYPE, ScanError, ScanFuture, Scanner,
};
use crate::tag::PartialReading;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Header shared by both record layouts, with `reading_type` and `len` filled in.
fn header(reading_type: u16, len: u8) -> Vec<u8> {
    let mut bytes = vec![
        0x95, 0xFE, // service uuid
        0x50, 0x20, // flags
        0xAA, 0x01, // frame id
        0x17, // sequence index
    ];
    let mut mac = TEST_MAC.octets();
    mac.reverse();
    bytes.extend_from_slice(&mac);
    bytes.extend_from_slice(&reading_type.to_le_bytes());
    bytes.push(len);
    bytes
}

/// A 20-byte temperature + humidity record with raw tenths values.
pub fn climate_payload(temperature: i16, humidity: i16) -> Vec<u8> {
    let mut bytes = header(0x100D, 4);
    bytes.extend_from_slice(&temperature.to_le_bytes());
    bytes.extend_from_slice(&humidity.to_le_bytes());
    bytes
}

/// A 17-byte battery record.
pub fn battery_payload(level: u8) -> Vec<u8> {
    let mut bytes = header(0x100A, 1);
    bytes.push(level);
    bytes
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn climate(address: MacAddress, temperature: f64, humidity: f64) -> PartialReading {
    PartialReading::Climate {
        address,
        temperature,
        humidity,
    }
}

pub fn battery(address: MacAddress, battery_level: f64) -> PartialReading {
    PartialReading::Battery {
        address,
        battery_level,
    }
}

/// An advertisement carrying `payload` as service data, next to a flags field.
pub fn mijia(address: MacAddress, payload: Vec<u8>) -> Advertisement {
    Advertisement::new(address)
        .with_field(0x01, [0x06])
        .with_field(SERVICE_DATA_AD_TYPE, payload)
}

/// Scanner replaying a fixed list of results.
pub struct FakeScanner {
    pub results: Vec<AdvertisementResult>,
    /// Keep the stream open after replaying, like a radio with no traffic.
    pub keep_open: bool,
    pub fail_start: bool,
    pub stopped: Arc<AtomicBool>,
    sender: Option<mpsc::Sender<AdvertisementResult>>,
}

impl FakeScanner {
    pub fn new(results: Vec<AdvertisementResult>) -> Self {
        Self {
            results,
            keep_open: false,
            fail_start: false,
            stopped: Arc::new(AtomicBool::new(false)),
            sender: None,
        }
    }

    /// A scanner that never delivers anything and never closes on its own.
    pub fn silent() -> Self {
        let mut scanner = Self::new(Vec::new());
        scanner.keep_open = true;
        scanner
    }
}

impl Scanner for FakeScanner {
    fn start(&mut self, _passive: bool) -> ScanFuture<'_, mpsc::Receiver<AdvertisementResult>> {
        Box::pin(async move {
            if self.fail_start {
                return Err(ScanError::Bluetooth("no adapter".into()));
            }
            let (tx, rx) = mpsc::channel(self.results.len().max(1));
            for result in self.results.drain(..) {
                let _ = tx.send(result).await;
            }
            if self.keep_open {
                self.sender = Some(tx);
            }
            Ok(rx)
        })
    }

    fn stop(&mut self) -> ScanFuture<'_, ()> {
        Box::pin(async move {
            self.sender = None;
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}
