//! Decoded sensor readings and their wire field identifiers

use serde::{Deserialize, Serialize};

/// What produced a reading.
///
/// Carried as a single byte on the wire. Bytes outside the known range decode
/// to [`SourceType::Unknown`] rather than failing the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SourceType {
    /// MAX30100 pulse oximeter on the local I2C bus
    Max30100 = 0,
    /// External analog front end
    EceBlackBox = 1,
    /// Remote wireless sensor node
    BtDataSensor = 2,
    #[default]
    Unknown = 3,
}

impl SourceType {
    /// Map a wire byte to a source type.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => SourceType::Max30100,
            1 => SourceType::EceBlackBox,
            2 => SourceType::BtDataSensor,
            _ => SourceType::Unknown,
        }
    }

    /// Wire byte for this source type.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Unit tag attached to a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Unit {
    Celsius,
    #[default]
    None,
}

/// Classifier output carried in the pilot-state field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PilotState {
    Unstressed = 0,
    Stressed = 1,
}

impl PilotState {
    /// Value sent in the pilot-state measurement.
    pub fn as_value(self) -> f64 {
        match self {
            PilotState::Unstressed => 0.0,
            PilotState::Stressed => 1.0,
        }
    }

    /// Interpret a pilot-state measurement; any non-zero value is stressed.
    pub fn from_value(value: f64) -> Self {
        if value == 0.0 { PilotState::Unstressed } else { PilotState::Stressed }
    }
}

/// Field identifiers of the tagged wire format.
///
/// The discriminant is the tag byte, and declaration order is the order in
/// which fields are emitted for each reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Field {
    Timestamp = 0x01,
    SourceType = 0x02,
    IrLed = 0x03,
    RedLed = 0x04,
    Temperature = 0x05,
    HeartRate = 0x06,
    AvgHeartRate = 0x07,
    Spo2 = 0x08,
    PilotState = 0x09,
}

impl Field {
    /// Measurement fields in wire order.
    pub const MEASUREMENTS: [Field; 7] = [
        Field::IrLed,
        Field::RedLed,
        Field::Temperature,
        Field::HeartRate,
        Field::AvgHeartRate,
        Field::Spo2,
        Field::PilotState,
    ];

    /// Look up a field by its tag byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Field::Timestamp),
            0x02 => Some(Field::SourceType),
            0x03 => Some(Field::IrLed),
            0x04 => Some(Field::RedLed),
            0x05 => Some(Field::Temperature),
            0x06 => Some(Field::HeartRate),
            0x07 => Some(Field::AvgHeartRate),
            0x08 => Some(Field::Spo2),
            0x09 => Some(Field::PilotState),
            _ => None,
        }
    }

    /// Tag byte for this field.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Encoded width of the value following the tag.
    pub fn width(self) -> usize {
        match self {
            Field::SourceType => 1,
            // i64 timestamp or f64 measurement
            _ => 8,
        }
    }

    /// Whether this field is a numeric measurement.
    pub fn is_measurement(self) -> bool {
        !matches!(self, Field::Timestamp | Field::SourceType)
    }

    /// Unit tag of the measurement carried in this field.
    pub fn unit(self) -> Unit {
        match self {
            Field::Temperature => Unit::Celsius,
            _ => Unit::None,
        }
    }
}

/// A single measurement with its unit tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub field: Field,
    pub value: f64,
    pub unit: Unit,
}

/// One decoded, timestamped set of optional sensor measurements.
///
/// `None` means the measurement does not exist and is not transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Reading {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    pub source: SourceType,
    pub ir_led: Option<f64>,
    pub red_led: Option<f64>,
    pub temperature: Option<f64>,
    pub heart_rate: Option<f64>,
    pub avg_heart_rate: Option<f64>,
    pub spo2: Option<f64>,
    pub pilot_state: Option<f64>,
}

impl Reading {
    /// Create a reading with no measurements.
    pub fn new(timestamp_ms: i64, source: SourceType) -> Self {
        Self { timestamp_ms, source, ..Self::default() }
    }

    /// Builder-style setter for one measurement.
    ///
    /// Non-measurement fields are ignored.
    pub fn with(mut self, field: Field, value: f64) -> Self {
        self.set(field, Some(value));
        self
    }

    /// Raw value of a measurement field.
    pub fn get(&self, field: Field) -> Option<f64> {
        match field {
            Field::IrLed => self.ir_led,
            Field::RedLed => self.red_led,
            Field::Temperature => self.temperature,
            Field::HeartRate => self.heart_rate,
            Field::AvgHeartRate => self.avg_heart_rate,
            Field::Spo2 => self.spo2,
            Field::PilotState => self.pilot_state,
            Field::Timestamp | Field::SourceType => None,
        }
    }

    /// Set or clear a measurement field.
    pub fn set(&mut self, field: Field, value: Option<f64>) {
        let slot = match field {
            Field::IrLed => &mut self.ir_led,
            Field::RedLed => &mut self.red_led,
            Field::Temperature => &mut self.temperature,
            Field::HeartRate => &mut self.heart_rate,
            Field::AvgHeartRate => &mut self.avg_heart_rate,
            Field::Spo2 => &mut self.spo2,
            Field::PilotState => &mut self.pilot_state,
            Field::Timestamp | Field::SourceType => return,
        };
        *slot = value;
    }

    /// A measurement together with its unit tag.
    pub fn measurement(&self, field: Field) -> Option<Measurement> {
        self.get(field).map(|value| Measurement { field, value, unit: field.unit() })
    }

    /// All present measurements in wire order.
    pub fn measurements(&self) -> impl Iterator<Item = Measurement> + '_ {
        Field::MEASUREMENTS.into_iter().filter_map(|field| self.measurement(field))
    }

    /// Number of present measurements.
    pub fn measurement_count(&self) -> usize {
        Field::MEASUREMENTS.iter().filter(|field| self.get(**field).is_some()).count()
    }

    /// Whether at least one measurement is present.
    pub fn has_measurements(&self) -> bool {
        Field::MEASUREMENTS.iter().any(|field| self.get(*field).is_some())
    }

    /// Classifier state, if the reading carries one.
    pub fn pilot_state(&self) -> Option<PilotState> {
        self.pilot_state.map(PilotState::from_value)
    }
}
