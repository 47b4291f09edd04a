//! Decoder for Mijia service data payloads.
//!
//! The service data field (AD type 0x16) of a Mijia thermometer carries one
//! of two fixed little-endian records. Both share a 16-byte header:
//!
//! | bytes | field                          |
//! |-------|--------------------------------|
//! | 0-1   | service uuid (`95 fe`)         |
//! | 2-3   | frame control flags            |
//! | 4-5   | product/frame id               |
//! | 6     | frame sequence index           |
//! | 7-12  | device MAC, little-endian      |
//! | 13-14 | reading type                   |
//! | 15    | reading length                 |
//!
//! followed by either temperature and humidity (two `i16`, tenths) for a
//! 20-byte record, or a single battery percentage byte for a 17-byte record.
//! The record kind is chosen by total length alone.

use crate::mac_address::MacAddress;
use crate::tag::PartialReading;
use thiserror::Error;

/// Length of the header shared by both layouts.
pub const HEADER_LEN: usize = 16;

/// Total length of a temperature + humidity record (160 bits).
pub const CLIMATE_RECORD_LEN: usize = 20;

/// Total length of a battery record (136 bits).
pub const BATTERY_RECORD_LEN: usize = 17;

/// Error types for decoding Mijia service data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Not valid hex, or too short to hold the common header
    #[error("Malformed input: {0}")]
    MalformedInput(String),
    /// Length matches neither known record layout
    #[error("Unrecognized layout: {0} bytes")]
    UnrecognizedLayout(usize),
}

/// Little-endian cursor over a record whose length was checked up front.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let (head, rest) = self
            .data
            .split_first_chunk::<N>()
            .ok_or_else(|| DecodeError::MalformedInput("record ends early".into()))?;
        self.data = rest;
        Ok(*head)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        self.take::<1>().map(|[b]| b)
    }

    fn u16_le(&mut self) -> Result<u16, DecodeError> {
        self.take::<2>().map(u16::from_le_bytes)
    }

    fn i16_le(&mut self) -> Result<i16, DecodeError> {
        self.take::<2>().map(i16::from_le_bytes)
    }
}

/// Header fields. Parsed to keep offsets honest, not part of the output.
#[allow(dead_code)]
struct Header {
    uuid: u16,
    flags: u16,
    frame_id: u16,
    index: u8,
    mac: MacAddress,
    reading_type: u16,
    reading_len: u8,
}

impl Header {
    fn read(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Header {
            uuid: reader.u16_le()?,
            flags: reader.u16_le()?,
            frame_id: reader.u16_le()?,
            index: reader.u8()?,
            mac: MacAddress::from_le_bytes(reader.take::<6>()?),
            reading_type: reader.u16_le()?,
            reading_len: reader.u8()?,
        })
    }
}

/// Decode a Mijia service data record.
///
/// # Arguments
/// * `address` - The advertiser's address; the reading is attributed to it
/// * `data` - The complete service data field, starting with the `95 fe` uuid
///
/// # Returns
/// A climate reading for 20-byte records, a battery reading for 17-byte
/// records, and an error for anything else.
pub fn decode(address: MacAddress, data: &[u8]) -> Result<PartialReading, DecodeError> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError::MalformedInput(format!(
            "{} bytes is shorter than the {HEADER_LEN} byte header",
            data.len()
        )));
    }

    let mut reader = Reader { data };
    match data.len() {
        CLIMATE_RECORD_LEN => {
            Header::read(&mut reader)?;
            let temperature = reader.i16_le()?;
            let humidity = reader.i16_le()?;
            Ok(PartialReading::Climate {
                address,
                temperature: f64::from(temperature) / 10.0,
                humidity: f64::from(humidity) / 10.0,
            })
        }
        BATTERY_RECORD_LEN => {
            Header::read(&mut reader)?;
            let battery = reader.u8()?;
            Ok(PartialReading::Battery {
                address,
                battery_level: f64::from(battery),
            })
        }
        other => Err(DecodeError::UnrecognizedLayout(other)),
    }
}

/// Decode a record given as hex text, e.g. `"95fe5020aa01..."`.
pub fn decode_hex(address: MacAddress, text: &str) -> Result<PartialReading, DecodeError> {
    decode(address, &parse_hex(text)?)
}

fn parse_hex(text: &str) -> Result<Vec<u8>, DecodeError> {
    let text = text.trim();
    if text.len() % 2 != 0 {
        return Err(DecodeError::MalformedInput(format!(
            "odd number of hex digits ({})",
            text.len()
        )));
    }

    text.as_bytes()
        .chunks_exact(2)
        .map(|pair| match pair {
            [hi, lo] if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                Ok((hex_value(*hi) << 4) | hex_value(*lo))
            }
            _ => Err(DecodeError::MalformedInput(format!(
                "'{}' is not a hex byte",
                String::from_utf8_lossy(pair)
            ))),
        })
        .collect()
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_MAC, battery_payload, climate_payload, to_hex};

    #[test]
    fn decodes_climate_record() {
        let reading = decode(TEST_MAC, &climate_payload(215, 612)).unwrap();
        assert_eq!(
            reading,
            PartialReading::Climate {
                address: TEST_MAC,
                temperature: 21.5,
                humidity: 61.2,
            }
        );
    }

    #[test]
    fn decodes_negative_temperature() {
        // 0xFF9C little-endian is -100
        let payload = climate_payload(-100, 300);
        assert_eq!(&payload[16..18], &[0x9C, 0xFF]);

        let reading = decode(TEST_MAC, &payload).unwrap();
        assert_eq!(reading.temperature(), Some(-10.0));
    }

    #[test]
    fn decodes_battery_record() {
        let reading = decode(TEST_MAC, &battery_payload(77)).unwrap();
        assert_eq!(
            reading,
            PartialReading::Battery {
                address: TEST_MAC,
                battery_level: 77.0,
            }
        );
        assert!(!reading.carries_climate());
    }

    #[test]
    fn decodes_hex_text() {
        let hex = to_hex(&climate_payload(215, 612));
        assert_eq!(hex.len(), 40);
        let reading = decode_hex(TEST_MAC, &hex).unwrap();
        assert_eq!(reading.temperature(), Some(21.5));

        let upper = to_hex(&battery_payload(100)).to_uppercase();
        assert_eq!(
            decode_hex(TEST_MAC, &upper).unwrap(),
            PartialReading::Battery {
                address: TEST_MAC,
                battery_level: 100.0,
            }
        );
    }

    #[test]
    fn rejects_short_input_as_malformed() {
        assert!(matches!(
            decode(TEST_MAC, &[]),
            Err(DecodeError::MalformedInput(_))
        ));
        assert!(matches!(
            decode(TEST_MAC, &battery_payload(1)[..15]),
            Err(DecodeError::MalformedInput(_))
        ));
    }

    #[test]
    fn rejects_other_lengths() {
        let mut long = climate_payload(1, 2);
        long.push(0);
        assert_eq!(
            decode(TEST_MAC, &long),
            Err(DecodeError::UnrecognizedLayout(21))
        );
        assert_eq!(
            decode(TEST_MAC, &climate_payload(1, 2)[..18]),
            Err(DecodeError::UnrecognizedLayout(18))
        );
        assert_eq!(
            decode(TEST_MAC, &[0u8; 16]),
            Err(DecodeError::UnrecognizedLayout(16))
        );
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(matches!(
            decode_hex(TEST_MAC, "95f"),
            Err(DecodeError::MalformedInput(_))
        ));
        assert!(matches!(
            decode_hex(TEST_MAC, "zz"),
            Err(DecodeError::MalformedInput(_))
        ));
        assert!(matches!(
            decode_hex(TEST_MAC, "+1"),
            Err(DecodeError::MalformedInput(_))
        ));
    }

    #[test]
    fn decoding_is_deterministic() {
        let payload = climate_payload(-55, 999);
        assert_eq!(decode(TEST_MAC, &payload), decode(TEST_MAC, &payload));
    }

    #[test]
    fn test_decode_error_display() {
        assert_eq!(
            DecodeError::MalformedInput("zz".into()).to_string(),
            "Malformed input: zz"
        );
        assert_eq!(
            DecodeError::UnrecognizedLayout(3).to_string(),
            "Unrecognized layout: 3 bytes"
        );
    }
}
