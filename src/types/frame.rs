//! Timestamped link-layer frames

use bytes::Bytes;
use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::FormatError;

/// One timestamped byte buffer exchanged over the link.
///
/// This is the unit of transport. The payload is reference counted, so
/// cloning a frame never copies the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// When the frame was created or received
    timestamp: SystemTime,

    /// Frame payload (zero-copy via Bytes)
    data: Bytes,
}

impl Frame {
    /// Create a frame stamped with the current time.
    pub fn new(data: impl Into<Bytes>) -> Result<Self, FormatError> {
        Self::with_timestamp(SystemTime::now(), data)
    }

    /// Create a frame with an explicit timestamp.
    pub fn with_timestamp(
        timestamp: SystemTime,
        data: impl Into<Bytes>,
    ) -> Result<Self, FormatError> {
        let data = data.into();
        if data.len() > crate::MAX_FRAME_SIZE {
            return Err(FormatError::FrameTooLarge {
                size: data.len(),
                max: crate::MAX_FRAME_SIZE,
            });
        }
        Ok(Self { timestamp, data })
    }

    /// Time the frame was created or received.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Microseconds since the Unix epoch (0 for pre-epoch clocks).
    pub fn timestamp_micros(&self) -> i64 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX))
    }

    /// Frame payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume the frame, returning the payload.
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Render the payload as a hex + ASCII dump, eight bytes per row.
    pub fn hex_dump(&self) -> String {
        let mut out = String::with_capacity(self.data.len() * 4 + 64);
        let _ = writeln!(out, "frame: {} bytes at {}us", self.data.len(), self.timestamp_micros());

        for row in self.data.chunks(8) {
            for byte in row {
                let _ = write!(out, "{:02x} ", byte);
            }
            for _ in row.len()..8 {
                out.push_str("   ");
            }
            out.push_str("| ");
            for &byte in row {
                // Printable ASCII only, matching the device's debug output
                out.push(if (33..=126).contains(&byte) { byte as char } else { '.' });
            }
            out.push('\n');
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rejects_oversized_payloads() {
        let data = vec![0u8; crate::MAX_FRAME_SIZE + 1];
        let err = Frame::new(data).unwrap_err();
        assert_eq!(
            err,
            FormatError::FrameTooLarge {
                size: crate::MAX_FRAME_SIZE + 1,
                max: crate::MAX_FRAME_SIZE
            }
        );

        assert!(Frame::new(vec![0u8; crate::MAX_FRAME_SIZE]).is_ok());
    }

    #[test]
    fn clone_shares_payload() {
        let frame = Frame::new(vec![1u8, 2, 3]).unwrap();
        let copy = frame.clone();
        assert_eq!(frame.data().as_ptr(), copy.data().as_ptr());
        assert_eq!(copy.len(), 3);
    }

    #[test]
    fn timestamp_micros_from_explicit_time() {
        let at = UNIX_EPOCH + Duration::from_millis(1_500);
        let frame = Frame::with_timestamp(at, Bytes::new()).unwrap();
        assert_eq!(frame.timestamp_micros(), 1_500_000);
        assert!(frame.is_empty());
    }

    #[test]
    fn hex_dump_pads_last_row() {
        let frame = Frame::with_timestamp(UNIX_EPOCH, b"AB\x00\x01CDEFGH".to_vec()).unwrap();
        let dump = frame.hex_dump();
        let rows: Vec<&str> = dump.lines().collect();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], "41 42 00 01 43 44 45 46 | AB..CDEF");
        assert_eq!(rows[2], "47 48                   | GH");
    }
}
