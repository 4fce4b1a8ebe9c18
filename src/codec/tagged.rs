//! Tagged, self-describing reading format
//!
//! Each reading is a run of `tag, value` pairs. The timestamp tag is mandatory,
//! always first, and marks the start of a new reading. All other fields are
//! emitted only when present.
//!
//! ```text
//! ┌──────┬───────────────┬──────┬────────┬──────┬───────────────┬─────
//! │ 0x01 │ timestamp i64 │ 0x02 │ source │ 0x08 │ spo2 f64      │ 0x01 ...
//! │      │ LE, ms        │      │ u8     │      │ LE            │
//! └──────┴───────────────┴──────┴────────┴──────┴───────────────┴─────
//! ```
//!
//! Integers and doubles are little-endian.

use bytes::{Buf, BufMut, BytesMut};
use tracing::trace;

use crate::error::FormatError;
use crate::types::{Field, Frame, Reading, SourceType};

/// Encoded size of one reading in bytes.
pub fn encoded_len(reading: &Reading) -> usize {
    let header = 1 + Field::Timestamp.width();
    let source = if reading.source == SourceType::Unknown {
        0
    } else {
        1 + Field::SourceType.width()
    };
    header + source + reading.measurement_count() * (1 + 8)
}

/// Encode readings into a single frame.
pub fn encode(readings: &[Reading]) -> Result<Frame, FormatError> {
    let size: usize = readings.iter().map(encoded_len).sum();
    if size > crate::MAX_FRAME_SIZE {
        return Err(FormatError::FrameTooLarge { size, max: crate::MAX_FRAME_SIZE });
    }

    let mut buf = BytesMut::with_capacity(size);
    for (index, reading) in readings.iter().enumerate() {
        if !reading.has_measurements() {
            return Err(FormatError::EmptyReading { index });
        }
        put_reading(&mut buf, reading);
    }

    Frame::new(buf.freeze())
}

/// Encode readings into as few frames as fit `max_frame_size` each.
///
/// Readings are never split across frames.
pub fn encode_chunked(
    readings: &[Reading],
    max_frame_size: usize,
) -> Result<Vec<Frame>, FormatError> {
    let max_frame_size = max_frame_size.min(crate::MAX_FRAME_SIZE);
    let mut frames = Vec::new();
    let mut start = 0;
    let mut size = 0;

    for (index, reading) in readings.iter().enumerate() {
        let len = encoded_len(reading);
        if len > max_frame_size {
            return Err(FormatError::FrameTooLarge { size: len, max: max_frame_size });
        }
        if size + len > max_frame_size {
            frames.push(encode(&readings[start..index])?);
            start = index;
            size = 0;
        }
        size += len;
    }

    if start < readings.len() {
        frames.push(encode(&readings[start..])?);
    }

    Ok(frames)
}

fn put_reading(buf: &mut BytesMut, reading: &Reading) {
    buf.put_u8(Field::Timestamp.tag());
    buf.put_i64_le(reading.timestamp_ms);

    if reading.source != SourceType::Unknown {
        buf.put_u8(Field::SourceType.tag());
        buf.put_u8(reading.source.as_byte());
    }

    for measurement in reading.measurements() {
        buf.put_u8(measurement.field.tag());
        buf.put_f64_le(measurement.value);
    }
}

/// Decode a frame into readings.
///
/// An empty frame decodes to no readings. Any unknown tag, truncated value,
/// field before the first timestamp or reading without measurements rejects the
/// whole frame.
pub fn decode(frame: &Frame) -> Result<Vec<Reading>, FormatError> {
    let total = frame.len();
    let mut buf = frame.data().clone();
    let mut readings = Vec::new();
    let mut current: Option<Reading> = None;

    while buf.has_remaining() {
        let offset = total - buf.remaining();
        let tag = buf.get_u8();
        let field = Field::from_tag(tag).ok_or(FormatError::UnknownTag { tag, offset })?;

        if buf.remaining() < field.width() {
            return Err(FormatError::Truncated {
                field,
                offset,
                needed: field.width(),
                remaining: buf.remaining(),
            });
        }

        match field {
            Field::Timestamp => {
                if let Some(done) = current.take() {
                    finish(done, &mut readings)?;
                }
                current = Some(Reading::new(buf.get_i64_le(), SourceType::Unknown));
            }
            Field::SourceType => {
                let reading =
                    current.as_mut().ok_or(FormatError::MissingTimestamp { field, offset })?;
                reading.source = SourceType::from_byte(buf.get_u8());
            }
            measurement => {
                let reading = current
                    .as_mut()
                    .ok_or(FormatError::MissingTimestamp { field: measurement, offset })?;
                reading.set(measurement, Some(buf.get_f64_le()));
            }
        }
    }

    if let Some(done) = current.take() {
        finish(done, &mut readings)?;
    }

    trace!("Decoded {} readings from {} byte frame", readings.len(), total);
    Ok(readings)
}

fn finish(reading: Reading, readings: &mut Vec<Reading>) -> Result<(), FormatError> {
    if !reading.has_measurements() {
        return Err(FormatError::EmptyReading { index: readings.len() });
    }
    readings.push(reading);
    Ok(())
}
