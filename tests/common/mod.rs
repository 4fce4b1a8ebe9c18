//! Helpers shared by the integration tests

#![allow(dead_code)]

use std::net::TcpListener as StdTcpListener;
use std::time::Duration;

use phms::LinkConfig;
use phms::types::{Field, Reading, SourceType};

/// Install a test log subscriber once; `RUST_LOG` controls the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `count` readings whose timestamps equal their store positions.
pub fn sequence(start: i64, count: usize) -> Vec<Reading> {
    (0..count as i64)
        .map(|i| {
            Reading::new(start + i, SourceType::BtDataSensor)
                .with(Field::HeartRate, 60.0 + ((start + i) % 40) as f64)
        })
        .collect()
}

/// Loopback link with short timeouts, listening on a free port.
pub fn fast_link() -> LinkConfig {
    LinkConfig {
        accept_timeout_ms: 200,
        reconnect_backoff_ms: 20,
        poll_interval_ms: 5,
        ..LinkConfig::loopback(0, 0)
    }
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local address").port()
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
