//! Provider implementations

mod channel;
mod link;

pub use channel::{ChannelProvider, SensorSink, sensor_channel};
pub use link::LinkProvider;
