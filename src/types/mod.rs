//! Core types for sensor data representation.
//!
//! - [`Frame`] is a timestamped, length-bounded byte buffer: the unit of transport
//! - [`Reading`] is one decoded set of optional measurements
//! - [`Field`] maps each measurement to its wire tag, width and unit
//!
//! ## Usage Example
//!
//! ```rust
//! use phms::types::{Field, Reading, SourceType, Unit};
//!
//! let reading = Reading::new(1_000, SourceType::BtDataSensor)
//!     .with(Field::Spo2, 97.5)
//!     .with(Field::Temperature, 36.8);
//!
//! assert_eq!(reading.measurement_count(), 2);
//! let temperature = reading.measurement(Field::Temperature).unwrap();
//! assert_eq!(temperature.unit, Unit::Celsius);
//! ```

mod frame;
mod reading;

pub use frame::Frame;
pub use reading::{Field, Measurement, PilotState, Reading, SourceType, Unit};
