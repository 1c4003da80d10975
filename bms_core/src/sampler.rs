//! Background cell-bus sampling.
//!
//! Spawns a thread that owns the `CellBus`, pushes the latest scan through a
//! bounded channel, and paces itself at a configured rate. Freshness tracking
//! lives in the monitor, which timestamps scans as they are ingested.
//!
//! Safety: each `Sampler` spawns exactly one thread that is shut down when
//! the `Sampler` is dropped, preventing thread leaks.
use bms_traits::{CellBus, CellSample};
use bms_traits::clock::Clock;
use crossbeam_channel as xch;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub struct Sampler {
    // Taken in Drop so a producer blocked in send() sees the disconnect
    rx: Option<xch::Receiver<Vec<CellSample>>>,
    /// Shutdown flag for immediate response (atomic for lock-free check)
    shutdown: Arc<AtomicBool>,
    /// Join handle for graceful thread cleanup
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Sampler {
    pub fn spawn<B: CellBus + Send + 'static, C: Clock + Send + Sync + 'static>(
        mut bus: B,
        hz: u32,
        timeout: Duration,
        clock: C,
    ) -> Self {
        let (tx, rx) = xch::bounded(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let period = Duration::from_micros(crate::util::period_us(hz));

        let join_handle = std::thread::spawn(move || {
            loop {
                // Immediate shutdown check (lock-free atomic)
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("sampler thread received shutdown signal");
                    break;
                }

                match bus.poll(timeout) {
                    Ok(scan) => {
                        // If send fails, consumer is gone; exit gracefully
                        if tx.send(scan).is_err() {
                            tracing::debug!("sampler consumer disconnected, exiting thread");
                            break;
                        }
                    }
                    Err(e) => {
                        // Transient poll errors are the monitor's problem: a
                        // pack with no fresh scan degrades to Fault on its own.
                        tracing::trace!(error = %e, "cell bus poll failed");
                    }
                }

                // Check shutdown before sleep to avoid unnecessary delay
                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                clock.sleep(period);
            }
            tracing::trace!("sampler thread exiting cleanly");
        });

        Self {
            rx: Some(rx),
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Most recent scan, draining anything queued behind it.
    pub fn latest(&self) -> Option<Vec<CellSample>> {
        self.rx.as_ref().and_then(|rx| rx.try_iter().last())
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        // Signal shutdown immediately (atomic store is very fast, <10ns)
        self.shutdown.store(true, Ordering::Relaxed);

        // Disconnect the channel first. A producer mid-send unblocks with an
        // error; one mid-poll exits after the bus timeout, ~150ms worst case.
        drop(self.rx.take());

        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => {
                    tracing::trace!("sampler thread joined successfully");
                }
                Err(e) => {
                    // Thread panicked; log but don't propagate (we're in Drop)
                    tracing::warn!(?e, "sampler thread panicked during shutdown");
                }
            }
        }
    }
}
