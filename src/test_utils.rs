//! Test utilities shared by unit tests and benchmarks
//!
//! Fixtures are generated in code, so no test data files are needed.

#![cfg(any(test, feature = "benchmark"))]

/// Reading fixtures
pub mod readings {
    use crate::types::{Field, Reading, SourceType};

    /// A remote-sensor reading carrying only an oxygen estimate.
    pub fn spo2_reading(timestamp_ms: i64, spo2: f64) -> Reading {
        Reading::new(timestamp_ms, SourceType::BtDataSensor).with(Field::Spo2, spo2)
    }

    /// A reading with every measurement present.
    pub fn full_reading(timestamp_ms: i64) -> Reading {
        Reading::new(timestamp_ms, SourceType::Max30100)
            .with(Field::IrLed, 14_000.0)
            .with(Field::RedLed, 9_000.0)
            .with(Field::Temperature, 36.6)
            .with(Field::HeartRate, 72.0)
            .with(Field::AvgHeartRate, 70.5)
            .with(Field::Spo2, 97.5)
            .with(Field::PilotState, 0.0)
    }

    /// `count` readings with consecutive timestamps starting at `start`.
    ///
    /// The oxygen value cycles so consecutive readings differ.
    pub fn sequence(start: i64, count: usize) -> Vec<Reading> {
        (0..count as i64)
            .map(|i| spo2_reading(start + i, 90.0 + ((start + i) % 10) as f64))
            .collect()
    }

    /// Optical samples as the remote node sends them.
    pub fn optical_sequence(start: i64, count: usize) -> Vec<Reading> {
        (0..count as i64)
            .map(|i| {
                Reading::new(start + i, SourceType::BtDataSensor)
                    .with(Field::IrLed, 14_000.0 + i as f64)
                    .with(Field::RedLed, 9_000.0 + i as f64)
                    .with(Field::Spo2, 97.0)
            })
            .collect()
    }
}

/// Frame fixtures
pub mod frames {
    use super::readings;
    use crate::codec::{compact, tagged};
    use crate::types::Frame;

    /// Tagged frames holding `count` full readings in total.
    pub fn tagged_frames(count: usize) -> Vec<Frame> {
        let batch: Vec<_> = (0..count as i64).map(readings::full_reading).collect();
        tagged::encode_chunked(&batch, crate::MAX_FRAME_SIZE).unwrap_or_default()
    }

    /// A compact frame holding `count` optical samples.
    pub fn compact_frame(count: usize) -> Option<Frame> {
        compact::encode(2, &readings::optical_sequence(0, count)).ok()
    }
}
