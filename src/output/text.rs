//! Plain text output, one line per update.

use crate::output::OutputFormatter;
use crate::tag::SensorTag;

/// Prints the tag the way it displays, prefixed by whether it is new.
///
/// The name column is only added when it differs from the address.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFormatter;

impl OutputFormatter for TextFormatter {
    fn format(&self, tag: &SensorTag, is_new: bool, name: &str) -> String {
        let marker = if is_new { "new" } else { "upd" };
        if name == tag.address().to_string() {
            format!("{marker} {tag}")
        } else {
            format!("{marker} {tag} {name}")
        }
    }
}
