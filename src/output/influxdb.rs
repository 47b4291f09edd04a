//! InfluxDB line protocol output formatter.

use crate::output::OutputFormatter;
use crate::tag::SensorTag;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<&'static str, String>,
    pub field_set: BTreeMap<&'static str, f64>,
    pub timestamp: Option<SystemTime>,
}

/// Escape commas, equals signs and spaces in tag values.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        for (key, value) in &self.tag_set {
            write!(fmt, ",{key}={}", escape_tag(value))?;
        }

        let mut separator = " ";
        for (key, value) in &self.field_set {
            write!(fmt, "{separator}{key}={value}")?;
            separator = ",";
        }

        // Pre-epoch timestamps are left to the server clock
        if let Some(nanos) = self
            .timestamp
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
        {
            write!(fmt, " {nanos}")?;
        }
        Ok(())
    }
}

/// InfluxDB line protocol formatter.
///
/// Tags are `mac` and `name`; fields are the readings the tag currently
/// knows. The point is stamped with the tag's `last_seen` when it has one.
pub struct InfluxDbFormatter {
    measurement_name: String,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn to_data_point(&self, tag: &SensorTag, name: &str) -> DataPoint {
        let mut tag_set = BTreeMap::new();
        tag_set.insert("mac", tag.address().to_string());
        tag_set.insert("name", name.to_string());

        let mut field_set = BTreeMap::new();
        let readings = [
            ("temperature", tag.temperature),
            ("humidity", tag.humidity),
            ("battery_level", tag.battery_level),
        ];
        for (key, value) in readings {
            if let Some(v) = value {
                field_set.insert(key, v);
            }
        }

        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set,
            field_set,
            timestamp: tag.last_seen,
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, tag: &SensorTag, _is_new: bool, name: &str) -> String {
        self.to_data_point(tag, name).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_MAC, battery, climate};
    use std::time::Duration;

    fn formatter() -> InfluxDbFormatter {
        InfluxDbFormatter::new("mijia".to_string())
    }

    #[test]
    fn formats_known_readings_with_timestamp() {
        let mut tag = SensorTag::new(TEST_MAC);
        let seen = SystemTime::UNIX_EPOCH + Duration::from_secs(1);
        tag.merge(&climate(TEST_MAC, 21.5, 61.2), seen);
        tag.merge(&battery(TEST_MAC, 77.0), seen + Duration::from_secs(5));

        assert_eq!(
            formatter().format(&tag, false, "Sauna"),
            "mijia,mac=AA:BB:CC:DD:EE:FF,name=Sauna \
             battery_level=77,humidity=61.2,temperature=21.5 1000000000"
        );
    }

    #[test]
    fn battery_only_tag_has_no_timestamp() {
        let mut tag = SensorTag::new(TEST_MAC);
        tag.merge(&battery(TEST_MAC, 9.0), SystemTime::UNIX_EPOCH);

        assert_eq!(
            formatter().format(&tag, true, "AA:BB:CC:DD:EE:FF"),
            "mijia,mac=AA:BB:CC:DD:EE:FF,name=AA:BB:CC:DD:EE:FF battery_level=9"
        );
    }

    #[test]
    fn escapes_tag_values() {
        let mut tag = SensorTag::new(TEST_MAC);
        tag.merge(&battery(TEST_MAC, 50.0), SystemTime::UNIX_EPOCH);

        let line = formatter().format(&tag, false, "Living Room,1=2");
        assert!(line.contains(",name=Living\\ Room\\,1\\=2 "));
    }
}
