//! Provider trait for reading sources

use crate::Result;
use crate::types::Reading;

/// Trait for sources of sensor readings
///
/// Providers abstract over where readings come from (a network link, the
/// local sensor driver, a test fixture) and handle their own pacing. The
/// ingest loop owns the provider and calls it in a loop.
#[async_trait::async_trait]
pub trait Provider: Send + 'static {
    /// Wait for the next batch of readings
    ///
    /// Returns:
    /// - `Ok(Some(batch))` - Readings available (may be empty)
    /// - `Ok(None)` - Source ended (normal termination)
    /// - `Err(e)` - Error occurred; `IngestError::Format` means one bad frame
    ///   was dropped and the next call continues with the following frame
    async fn next_batch(&mut self) -> Result<Option<Vec<Reading>>>;

    /// Short name used in log output
    fn name(&self) -> &str;
}
