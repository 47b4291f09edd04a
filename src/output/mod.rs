//! Output formatters for tag updates.
//!
//! This module provides a trait for formatting tag updates and its
//! implementations: a human-readable text line and InfluxDB line protocol.

pub mod influxdb;
pub mod text;

use crate::tag::SensorTag;

/// Trait for formatting tag updates into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format one tag update.
    ///
    /// # Arguments
    /// * `tag` - Merged state of the tag after the update
    /// * `is_new` - Whether this update discovered the tag
    /// * `name` - Display name of the tag (alias or MAC address)
    fn format(&self, tag: &SensorTag, is_new: bool, name: &str) -> String;
}

/// Selectable output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Format {
    /// One `<Mijia ...>` line per update
    #[default]
    Text,
    /// InfluxDB line protocol, for Telegraf execd inputs
    Influxdb,
}

/// Build the formatter for `format`.
pub fn formatter_for(format: Format, influxdb_measurement: &str) -> Box<dyn OutputFormatter> {
    match format {
        Format::Text => Box::new(text::TextFormatter),
        Format::Influxdb => Box::new(influxdb::InfluxDbFormatter::new(
            influxdb_measurement.to_string(),
        )),
    }
}
