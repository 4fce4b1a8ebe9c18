//! Frame codecs for sensor readings.
//!
//! Two incompatible wire formats coexist on the link:
//!
//! - [`tagged`]: self-describing `tag, value` pairs, one run per reading. Used
//!   for everything the ingest host sends and for rich readings from the
//!   sensor node.
//! - [`compact`]: a source byte followed by fixed 6-byte sample groups, used by
//!   the sensor node for raw optical telemetry.
//!
//! A link carries exactly one of them, selected with [`WireFormat`]. Frames are
//! never sniffed: a compact frame fed to the tagged decoder fails with a
//! [`FormatError`](crate::FormatError) rather than being misread.
//!
//! ## Usage Example
//!
//! ```rust
//! use phms::codec::{self, WireFormat};
//! use phms::types::{Field, Reading, SourceType};
//!
//! let reading = Reading::new(1_000, SourceType::BtDataSensor).with(Field::Spo2, 97.5);
//! let frame = codec::tagged::encode(&[reading]).unwrap();
//!
//! let decoded = codec::decode(&frame, WireFormat::Tagged).unwrap();
//! assert_eq!(decoded.readings, vec![reading]);
//! assert_eq!(decoded.source_id, None);
//! ```

pub mod compact;
pub mod tagged;

use serde::{Deserialize, Serialize};

use crate::error::FormatError;
use crate::types::{Frame, Reading};

/// Wire format carried by a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Tagged,
    Compact,
}

/// Result of decoding one frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedFrame {
    /// Leading source identifier (compact format only)
    pub source_id: Option<u8>,

    /// Completed readings in frame order
    pub readings: Vec<Reading>,
}

impl DecodedFrame {
    /// Whether the frame held no readings.
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Decode a frame in the given wire format.
pub fn decode(frame: &Frame, format: WireFormat) -> Result<DecodedFrame, FormatError> {
    match format {
        WireFormat::Tagged => {
            Ok(DecodedFrame { source_id: None, readings: tagged::decode(frame)? })
        }
        WireFormat::Compact => {
            let (source_id, readings) = compact::decode(frame)?;
            Ok(DecodedFrame { source_id, readings })
        }
    }
}
