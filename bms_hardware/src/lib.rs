//! Hardware endpoints for the battery interlock controller.
//!
//! The default build ships the simulated bench (`Charger` and its
//! `SignalSource` / `CellBus` / `InhibitBank` halves). The `hardware`
//! feature adds GPIO-backed line endpoints for the real vehicle harness.

pub mod bench;
pub mod error;
pub mod util;

#[cfg(feature = "hardware")]
pub mod gpio;

pub use bench::{BenchBus, BenchOutputs, BenchSignals, Charger, OutputLevels};
pub use error::HwError;
