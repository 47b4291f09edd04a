//! `mijia-listener` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing and process exit codes.
//! Decoding lives in [`crate::decoder`], the tag table and scan loop in
//! [`crate::daemon`]; [`crate::app`] ties them to output and can be tested
//! deterministically with an injected scanner and output stream.

pub mod alias;
pub mod app;
pub mod clock;
pub mod daemon;
pub mod decoder;
pub mod mac_address;
pub mod output;
pub mod scanner;
pub mod tag;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use alias::{Alias, AliasMap, parse_alias, resolve_name, to_map};
pub use clock::{Clock, SystemClock};
pub use daemon::{
    DaemonError, DaemonHandle, DaemonState, Discovery, MijiaDaemon, Observer, ObserverError,
    StopSignal,
};
pub use decoder::{DecodeError, decode, decode_hex};
pub use mac_address::MacAddress;
pub use output::OutputFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use scanner::{Advertisement, AdvertisementResult, Backend, ScanError, Scanner};
pub use tag::{PartialReading, SensorTag, TagTable};
