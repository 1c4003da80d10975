pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Levels of the six discrete control lines, captured together in one read.
///
/// A snapshot is taken once at the top of a control cycle; everything that
/// cycle works from the copy and never re-reads a line mid-cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalSnapshot {
    pub ignition: bool,
    pub charge_enable: bool,
    pub batt1_inhibit: bool,
    pub batt2_inhibit: bool,
    pub charger_inhibit: bool,
    pub heater_enable: bool,
}

/// One raw cell measurement as delivered by the monitoring bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellSample {
    pub pack: u8,
    pub cell: u16,
    pub millivolts: i32,
    /// Tenths of a degree Celsius.
    pub temp_dc: i16,
}

pub trait SignalSource {
    fn capture(&mut self) -> Result<SignalSnapshot, Box<dyn std::error::Error + Send + Sync>>;
}

pub trait CellBus {
    fn poll(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Vec<CellSample>, Box<dyn std::error::Error + Send + Sync>>;
}

pub trait InhibitBank {
    fn set_drive_inhibit(
        &mut self,
        active: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn set_charge_inhibit(
        &mut self,
        active: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn set_heater(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn set_pack_inhibit(
        &mut self,
        pack: u8,
        active: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

// Boxed endpoints are first-class: the engine's dynamic facade stores
// Box<dyn ...> in the same generic core as statically dispatched builds.

impl<T: SignalSource + ?Sized> SignalSource for Box<T> {
    fn capture(&mut self) -> Result<SignalSnapshot, Box<dyn std::error::Error + Send + Sync>> {
        (**self).capture()
    }
}

impl<T: CellBus + ?Sized> CellBus for Box<T> {
    fn poll(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Vec<CellSample>, Box<dyn std::error::Error + Send + Sync>> {
        (**self).poll(timeout)
    }
}

impl<T: InhibitBank + ?Sized> InhibitBank for Box<T> {
    fn set_drive_inhibit(
        &mut self,
        active: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).set_drive_inhibit(active)
    }
    fn set_charge_inhibit(
        &mut self,
        active: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).set_charge_inhibit(active)
    }
    fn set_heater(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).set_heater(on)
    }
    fn set_pack_inhibit(
        &mut self,
        pack: u8,
        active: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).set_pack_inhibit(pack, active)
    }
}
