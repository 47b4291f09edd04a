//! Per-device state for discovered Mijia tags.
//!
//! A [`SensorTag`] accumulates readings from two kinds of advertisement:
//! climate packets (temperature + humidity) and battery packets. Each decoded
//! packet is a [`PartialReading`] that only carries the fields its layout
//! provides, so merging never clears a value that is already known.

use crate::mac_address::MacAddress;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Latest known state of one physical tag.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorTag {
    address: MacAddress,
    /// Temperature in Celsius
    pub temperature: Option<f64>,
    /// Relative humidity in percent (0-100)
    pub humidity: Option<f64>,
    /// Battery level in percent (0-100)
    pub battery_level: Option<f64>,
    /// Time of the last climate reading. Battery reports do not count.
    pub last_seen: Option<SystemTime>,
}

impl SensorTag {
    /// A tag with every reading unknown.
    pub fn new(address: MacAddress) -> Self {
        Self {
            address,
            temperature: None,
            humidity: None,
            battery_level: None,
            last_seen: None,
        }
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    /// Merge the fields carried by `reading` into this tag.
    ///
    /// `last_seen` advances only when the reading itself is a climate
    /// reading; it is never inferred from what the tag already holds.
    pub fn merge(&mut self, reading: &PartialReading, now: SystemTime) {
        match *reading {
            PartialReading::Climate {
                temperature,
                humidity,
                ..
            } => {
                self.temperature = Some(temperature);
                self.humidity = Some(humidity);
                self.last_seen = Some(now);
            }
            PartialReading::Battery { battery_level, .. } => {
                self.battery_level = Some(battery_level);
            }
        }
    }

    /// Whether the tag has not delivered a climate reading within `max_age`.
    ///
    /// Tags that never delivered one are always stale.
    pub fn is_stale(&self, now: SystemTime, max_age: Duration) -> bool {
        match self.last_seen {
            Some(seen) => now
                .duration_since(seen)
                .map(|age| age > max_age)
                .unwrap_or(false),
            None => true,
        }
    }
}

fn fmt_reading(f: &mut fmt::Formatter<'_>, value: Option<f64>, precision: usize) -> fmt::Result {
    match value {
        Some(v) => write!(f, "{v:.precision$}"),
        None => write!(f, "?"),
    }
}

impl fmt::Display for SensorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Mijia {} ", self.address)?;
        fmt_reading(f, self.temperature, 2)?;
        write!(f, "c, ")?;
        fmt_reading(f, self.humidity, 2)?;
        write!(f, "%, ")?;
        fmt_reading(f, self.battery_level, 0)?;
        write!(f, "%, ")?;
        match self.last_seen {
            Some(seen) => {
                let stamp = OffsetDateTime::from(seen)
                    .format(&Rfc3339)
                    .map_err(|_| fmt::Error)?;
                write!(f, "{stamp}>")
            }
            None => write!(f, "never>"),
        }
    }
}

/// One decoded advertisement. Each variant holds exactly the fields its
/// payload layout carries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PartialReading {
    /// Temperature and humidity (160-bit layout)
    Climate {
        address: MacAddress,
        temperature: f64,
        humidity: f64,
    },
    /// Battery level (136-bit layout)
    Battery {
        address: MacAddress,
        battery_level: f64,
    },
}

impl PartialReading {
    pub fn address(&self) -> MacAddress {
        match *self {
            PartialReading::Climate { address, .. } | PartialReading::Battery { address, .. } => {
                address
            }
        }
    }

    pub fn temperature(&self) -> Option<f64> {
        match *self {
            PartialReading::Climate { temperature, .. } => Some(temperature),
            PartialReading::Battery { .. } => None,
        }
    }

    pub fn carries_climate(&self) -> bool {
        matches!(self, PartialReading::Climate { .. })
    }
}

/// All tags seen during this run, keyed by address.
#[derive(Debug, Default)]
pub struct TagTable {
    tags: HashMap<MacAddress, SensorTag>,
}

impl TagTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the addressed tag if unseen, then merge `reading` into it.
    ///
    /// Returns whether the tag was created by this call, together with the
    /// merged state.
    pub fn apply(&mut self, reading: &PartialReading, now: SystemTime) -> (bool, &SensorTag) {
        let address = reading.address();
        let (is_new, tag) = match self.tags.entry(address) {
            Entry::Occupied(entry) => (false, entry.into_mut()),
            Entry::Vacant(entry) => (true, entry.insert(SensorTag::new(address))),
        };
        tag.merge(reading, now);
        (is_new, tag)
    }

    pub fn get(&self, address: &MacAddress) -> Option<&SensorTag> {
        self.tags.get(address)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorTag> {
        self.tags.values()
    }

    /// Copy of every tag, ordered by address.
    pub fn snapshot(&self) -> Vec<SensorTag> {
        let mut tags: Vec<SensorTag> = self.tags.values().cloned().collect();
        tags.sort_by_key(SensorTag::address);
        tags
    }
}
