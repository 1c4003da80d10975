//! Test and helper mocks for bms_core

use bms_traits::CellSample;

/// A cell bus that always errors on poll; useful when scans are delivered
/// externally via `step_with_scan`.
pub struct NoopBus;

impl bms_traits::CellBus for NoopBus {
    fn poll(
        &mut self,
        _timeout: std::time::Duration,
    ) -> Result<Vec<CellSample>, Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(std::io::Error::other("noop bus")))
    }
}
