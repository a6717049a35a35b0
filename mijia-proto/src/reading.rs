//! Payload decoding for Mijia sensor characteristics

use crate::ble::KIND_BATTERY;

/// A decoded measurement.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Reading {
    /// Battery charge percentage.
    Battery(u8),
    /// One temperature (degrees Celsius) and relative humidity (percent)
    /// sample.
    Values { temperature: f32, humidity: u8 },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,
    #[error("values payload too short: {0} bytes, need 3")]
    TooShort(usize),
}

/// Decode a raw characteristic payload according to its channel kind.
///
/// `"battery"` payloads are the whole buffer read big-endian as an unsigned
/// percentage. Every other kind is the thermometer value frame: bytes 0-1 are
/// the little-endian temperature in hundredths of a degree, byte 2 is the
/// humidity percentage. A temperature word with high nibble `f` is negative;
/// its magnitude is `0xffff` minus the word, the convention the firmware
/// uses.
pub fn decode(raw: &[u8], kind: &str) -> Result<Reading, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::Empty);
    }
    if kind == KIND_BATTERY {
        let pct = raw.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        return Ok(Reading::Battery(pct as u8));
    }
    if raw.len() < 3 {
        return Err(DecodeError::TooShort(raw.len()));
    }
    let word = u16::from_le_bytes([raw[0], raw[1]]);
    let (sign, magnitude) = if word >> 12 == 0xf {
        (-1.0, 0xffff - word)
    } else {
        (1.0, word)
    };
    Ok(Reading::Values {
        temperature: sign * f32::from(magnitude) / 100.0,
        humidity: raw[2],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::KIND_VALUES;

    #[test]
    fn battery_full_range() {
        for pct in 0..=u8::MAX {
            assert_eq!(decode(&[pct], KIND_BATTERY), Ok(Reading::Battery(pct)));
        }
    }

    #[test]
    fn battery_rejects_empty_payload() {
        assert_eq!(decode(&[], KIND_BATTERY), Err(DecodeError::Empty));
    }

    #[test]
    fn values_positive_temperature() {
        // 0x0835 = 2101 hundredths -> 21.01 C, humidity 0x37 = 55 %
        assert_eq!(
            decode(&[0x35, 0x08, 0x37], KIND_VALUES),
            Ok(Reading::Values {
                temperature: 21.01,
                humidity: 55
            })
        );
    }

    #[test]
    fn values_negative_temperature() {
        // 0xff38 carries the sign nibble; magnitude 0xffff - 0xff38 = 199
        assert_eq!(
            decode(&[0x38, 0xff, 0x28], KIND_VALUES),
            Ok(Reading::Values {
                temperature: -1.99,
                humidity: 40
            })
        );
    }

    #[test]
    fn values_zero() {
        assert_eq!(
            decode(&[0x00, 0x00, 0x00], KIND_VALUES),
            Ok(Reading::Values {
                temperature: 0.0,
                humidity: 0
            })
        );
    }

    #[test]
    fn values_sign_boundary() {
        // 0xf000 is the lowest word with the sign nibble set
        assert_eq!(
            decode(&[0x00, 0xf0, 0x10], KIND_VALUES),
            Ok(Reading::Values {
                temperature: -40.95,
                humidity: 16
            })
        );
        // 0xefff just below it decodes positive
        assert_eq!(
            decode(&[0xff, 0xef, 0x10], KIND_VALUES),
            Ok(Reading::Values {
                temperature: 614.39,
                humidity: 16
            })
        );
    }

    #[test]
    fn values_rejects_short_payload() {
        assert_eq!(decode(&[0x35, 0x08], KIND_VALUES), Err(DecodeError::TooShort(2)));
        assert_eq!(decode(&[], KIND_VALUES), Err(DecodeError::Empty));
    }

    #[test]
    fn unknown_kinds_decode_as_value_frames() {
        assert_eq!(
            decode(&[0x35, 0x08, 0x37], "greenhouse"),
            Ok(Reading::Values {
                temperature: 21.01,
                humidity: 55
            })
        );
    }
}
