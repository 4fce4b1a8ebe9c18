//! Compact device-telemetry format
//!
//! Sent by the remote sensor node to save bandwidth: one source byte followed
//! by fixed 6-byte sample groups with no tags.
//!
//! ```text
//! ┌────────┬──────────┬──────────┬──────────┬──────────┬─────
//! │ source │ ir u16   │ red u16  │ spo2 u16 │ ir u16   │ ...
//! │ u8     │ BE       │ BE       │ BE       │ BE       │
//! └────────┴──────────┴──────────┴──────────┴──────────┴─────
//! ```
//!
//! Samples carry no timestamp. The device samples at a fixed rate, so sample
//! `n` (1-based) is stamped `n / COMPACT_SAMPLE_RATE_HZ` seconds after the
//! frame was received.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::FormatError;
use crate::types::{Field, Frame, Reading, SourceType};

/// Bytes per sample group.
pub const GROUP_SIZE: usize = 6;

/// Device sampling rate used to space sample timestamps.
pub const COMPACT_SAMPLE_RATE_HZ: i64 = 64;

const SAMPLE_INTERVAL_MICROS: i64 = 1_000_000 / COMPACT_SAMPLE_RATE_HZ;

/// Decode a compact frame into its source identifier and readings.
pub fn decode(frame: &Frame) -> Result<(Option<u8>, Vec<Reading>), FormatError> {
    let mut buf = frame.data().clone();
    if !buf.has_remaining() {
        return Ok((None, Vec::new()));
    }

    let source_id = buf.get_u8();
    let partial = buf.remaining() % GROUP_SIZE;
    if partial != 0 {
        return Err(FormatError::CompactTruncated { remaining: partial });
    }

    let source = SourceType::from_byte(source_id);
    let received_micros = frame.timestamp_micros();
    let count = buf.remaining() / GROUP_SIZE;
    let mut readings = Vec::with_capacity(count);

    for n in 1..=count as i64 {
        let ir = buf.get_u16();
        let red = buf.get_u16();
        let spo2 = buf.get_u16();

        let timestamp_ms = (received_micros + n * SAMPLE_INTERVAL_MICROS) / 1_000;
        readings.push(
            Reading::new(timestamp_ms, source)
                .with(Field::IrLed, f64::from(ir))
                .with(Field::RedLed, f64::from(red))
                .with(Field::Spo2, f64::from(spo2)),
        );
    }

    Ok((Some(source_id), readings))
}

/// Encode readings into a compact frame.
///
/// Absent measurements are sent as 0 and values saturate into `u16`.
pub fn encode(source_id: u8, readings: &[Reading]) -> Result<Frame, FormatError> {
    let mut buf = BytesMut::with_capacity(1 + readings.len() * GROUP_SIZE);
    buf.put_u8(source_id);

    for reading in readings {
        for field in [Field::IrLed, Field::RedLed, Field::Spo2] {
            // `as` saturates and maps NaN to 0
            buf.put_u16(reading.get(field).unwrap_or(0.0) as u16);
        }
    }

    Frame::new(buf.freeze())
}
