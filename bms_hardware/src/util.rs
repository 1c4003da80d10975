use std::time::{Duration, Instant};

use crate::error::{HwError, Result};

/// Read a discrete line repeatedly until it reports the same level
/// `required_consecutive` times in a row, or the timeout expires. Sleeps
/// between polls to avoid CPU spinning. Returns the settled level.
pub fn stable_level_with_timeout(
    mut read: impl FnMut() -> bool,
    required_consecutive: u8,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    let needed = required_consecutive.max(1);
    let mut level = read();
    let mut run: u8 = 1;
    while run < needed {
        if Instant::now() >= deadline {
            return Err(HwError::Timeout);
        }
        std::thread::sleep(poll_interval);
        let next = read();
        if next == level {
            run += 1;
        } else {
            level = next;
            run = 1;
        }
    }
    Ok(level)
}
