//! Heart Rate Service definitions and measurement frame codec
//!
//! Frames follow the standard Heart Rate Measurement characteristic
//! (0x2A37), little-endian:
//!
//! ```text
//! flags (1) | bpm (1 or 2) | energy expended (2, optional) | rr (2 each, optional)
//! ```
//!
//! RR intervals are carried in 1/1024 second ticks.

use thiserror::Error;
use uuid::Uuid;

use crate::types::heartrate::{bpm_for_interval, interval_for_bpm};

/// Bluetooth SIG base UUID `00000000-0000-1000-8000-00805f9b34fb`.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Expand a 16-bit assigned number into a full 128-bit UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Heart Rate service.
pub const HEART_RATE_SERVICE_UUID: Uuid = uuid_from_u16(0x180D);

/// Heart Rate Measurement characteristic (notify).
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = uuid_from_u16(0x2A37);

pub const FLAG_BPM_U16: u8 = 0x01;
pub const FLAG_CONTACT_DETECTED: u8 = 0x02;
pub const FLAG_CONTACT_SUPPORTED: u8 = 0x04;
pub const FLAG_ENERGY_EXPENDED: u8 = 0x08;
pub const FLAG_RR_INTERVALS: u8 = 0x10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Empty measurement frame")]
    Empty,

    #[error("Frame truncated reading {field} ({len} bytes)")]
    Truncated { field: &'static str, len: usize },

    #[error("Frame carries neither a heart rate nor an RR interval")]
    ZeroHeartRate,
}

/// A decoded Heart Rate Measurement value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeartRateMeasurement {
    pub bpm: u16,
    /// `None` when the sensor does not report skin contact.
    pub sensor_contact: Option<bool>,
    /// Cumulative kilojoules, when present.
    pub energy_expended: Option<u16>,
    /// RR intervals converted to milliseconds, oldest first.
    pub rr_intervals_ms: Vec<u32>,
}

impl HeartRateMeasurement {
    /// The `(bpm, rr_interval_ms)` pair a beat source emits for this frame.
    ///
    /// Uses the most recent RR interval when the frame carries any,
    /// otherwise derives the interval from the heart rate.
    pub fn beat(&self) -> (f32, u32) {
        match self.rr_intervals_ms.last() {
            Some(&rr) if self.bpm == 0 => (bpm_for_interval(rr), rr),
            Some(&rr) => (self.bpm as f32, rr),
            None => (self.bpm as f32, interval_for_bpm(self.bpm as f32)),
        }
    }
}

fn read_u16(frame: &[u8], offset: usize, field: &'static str) -> Result<u16, FrameError> {
    match frame.get(offset..offset + 2) {
        Some(bytes) => Ok(u16::from_le_bytes([bytes[0], bytes[1]])),
        None => Err(FrameError::Truncated {
            field,
            len: frame.len(),
        }),
    }
}

/// Convert 1/1024 s ticks to milliseconds, rounded to nearest.
pub fn rr_ticks_to_ms(ticks: u16) -> u32 {
    (ticks as u32 * 1000 + 512) / 1024
}

/// Convert milliseconds to 1/1024 s ticks, rounded to nearest.
pub fn rr_ms_to_ticks(ms: u32) -> u16 {
    ((ms as u64 * 1024 + 500) / 1000).min(u16::MAX as u64) as u16
}

/// Decode one Heart Rate Measurement characteristic value.
///
/// Pure: the same bytes always decode to the same measurement.
pub fn parse_heart_rate_measurement(frame: &[u8]) -> Result<HeartRateMeasurement, FrameError> {
    let flags = *frame.first().ok_or(FrameError::Empty)?;
    let mut offset = 1;

    let bpm = if flags & FLAG_BPM_U16 != 0 {
        let value = read_u16(frame, offset, "bpm")?;
        offset += 2;
        value
    } else {
        let value = *frame.get(offset).ok_or(FrameError::Truncated {
            field: "bpm",
            len: frame.len(),
        })?;
        offset += 1;
        value as u16
    };

    let sensor_contact = if flags & FLAG_CONTACT_SUPPORTED != 0 {
        Some(flags & FLAG_CONTACT_DETECTED != 0)
    } else {
        None
    };

    let energy_expended = if flags & FLAG_ENERGY_EXPENDED != 0 {
        let value = read_u16(frame, offset, "energy expended")?;
        offset += 2;
        Some(value)
    } else {
        None
    };

    let mut rr_intervals_ms = Vec::new();
    if flags & FLAG_RR_INTERVALS != 0 {
        let rr_bytes = &frame[offset..];
        if rr_bytes.len() < 2 {
            return Err(FrameError::Truncated {
                field: "rr interval",
                len: frame.len(),
            });
        }
        // A dangling odd byte is ignored; complete fields still count.
        for chunk in rr_bytes.chunks_exact(2) {
            rr_intervals_ms.push(rr_ticks_to_ms(u16::from_le_bytes([chunk[0], chunk[1]])));
        }
    }

    if bpm == 0 && rr_intervals_ms.is_empty() {
        return Err(FrameError::ZeroHeartRate);
    }

    Ok(HeartRateMeasurement {
        bpm,
        sensor_contact,
        energy_expended,
        rr_intervals_ms,
    })
}

/// Build a measurement frame. Used by simulated sensors.
pub fn encode_heart_rate_measurement(bpm: u16, rr_intervals_ms: &[u32]) -> Vec<u8> {
    let mut flags = 0u8;
    if bpm > u8::MAX as u16 {
        flags |= FLAG_BPM_U16;
    }
    if !rr_intervals_ms.is_empty() {
        flags |= FLAG_RR_INTERVALS;
    }

    let mut frame = vec![flags];
    if flags & FLAG_BPM_U16 != 0 {
        frame.extend_from_slice(&bpm.to_le_bytes());
    } else {
        frame.push(bpm as u8);
    }
    for &rr in rr_intervals_ms {
        frame.extend_from_slice(&rr_ms_to_ticks(rr).to_le_bytes());
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_uuids() {
        assert_eq!(
            HEART_RATE_SERVICE_UUID.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            HEART_RATE_MEASUREMENT_UUID.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_parse_u8_bpm_without_rr() {
        let m = parse_heart_rate_measurement(&[0x00, 72]).unwrap();
        assert_eq!(m.bpm, 72);
        assert!(m.rr_intervals_ms.is_empty());
        assert_eq!(m.sensor_contact, None);
        // 60000 / 72 = 833.3
        assert_eq!(m.beat(), (72.0, 833));
    }

    #[test]
    fn test_parse_u16_bpm() {
        let m = parse_heart_rate_measurement(&[0x01, 0x2C, 0x01]).unwrap();
        assert_eq!(m.bpm, 300);
    }

    #[test]
    fn test_parse_rr_intervals_uses_latest() {
        // 1024 ticks = 1000 ms, 819 ticks = 799.8 ms
        let frame = [0x10, 75, 0x00, 0x04, 0x33, 0x03];
        let m = parse_heart_rate_measurement(&frame).unwrap();
        assert_eq!(m.rr_intervals_ms, vec![1000, 800]);
        assert_eq!(m.beat(), (75.0, 800));
    }

    #[test]
    fn test_energy_field_is_skipped_before_rr() {
        let frame = [0x18 | 0x06, 60, 0x10, 0x00, 0x00, 0x04];
        let m = parse_heart_rate_measurement(&frame).unwrap();
        assert_eq!(m.energy_expended, Some(16));
        assert_eq!(m.sensor_contact, Some(true));
        assert_eq!(m.rr_intervals_ms, vec![1000]);
    }

    #[test]
    fn test_parsing_is_deterministic() {
        let frame = [0x11, 0x48, 0x00, 0x52, 0x03];
        let first = parse_heart_rate_measurement(&frame).unwrap();
        for _ in 0..100 {
            assert_eq!(parse_heart_rate_measurement(&frame).unwrap(), first);
        }
    }

    #[test]
    fn test_malformed_frames() {
        assert_eq!(parse_heart_rate_measurement(&[]), Err(FrameError::Empty));
        assert!(matches!(
            parse_heart_rate_measurement(&[0x00]),
            Err(FrameError::Truncated { field: "bpm", .. })
        ));
        assert!(matches!(
            parse_heart_rate_measurement(&[0x01, 0x48]),
            Err(FrameError::Truncated { field: "bpm", .. })
        ));
        assert!(matches!(
            parse_heart_rate_measurement(&[0x10, 70, 0x01]),
            Err(FrameError::Truncated { field: "rr interval", .. })
        ));
        assert_eq!(
            parse_heart_rate_measurement(&[0x00, 0]),
            Err(FrameError::ZeroHeartRate)
        );
    }

    #[test]
    fn test_zero_bpm_with_rr_derives_rate() {
        let frame = encode_heart_rate_measurement(0, &[750]);
        let m = parse_heart_rate_measurement(&frame).unwrap();
        assert_eq!(m.beat(), (80.0, 750));
    }

    #[test]
    fn test_encoder_produces_standard_layout() {
        assert_eq!(encode_heart_rate_measurement(72, &[]), vec![0x00, 72]);
        assert_eq!(
            encode_heart_rate_measurement(260, &[1000]),
            vec![0x11, 0x04, 0x01, 0x00, 0x04]
        );
    }
}
