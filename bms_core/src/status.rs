//! Interlock state, its reporting projection, and packed telemetry bytes.

use crate::monitor::BatteryStatus;
use bms_traits::SignalSnapshot;

/// The two persistent inhibit outputs. Updated in place every cycle; never
/// rebuilt from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterlockState {
    pub drive_inhibit: bool,
    pub charge_inhibit: bool,
}

/// Projection of `InterlockState` for dispatch and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterlockKind {
    #[default]
    Armed,
    DriveInhibited,
    ChargeInhibited,
    BothInhibited,
}

impl InterlockState {
    #[inline]
    #[must_use]
    pub fn kind(self) -> InterlockKind {
        match (self.drive_inhibit, self.charge_inhibit) {
            (false, false) => InterlockKind::Armed,
            (true, false) => InterlockKind::DriveInhibited,
            (false, true) => InterlockKind::ChargeInhibited,
            (true, true) => InterlockKind::BothInhibited,
        }
    }
}

impl core::fmt::Display for InterlockKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Armed => "armed",
            Self::DriveInhibited => "drive-inhibited",
            Self::ChargeInhibited => "charge-inhibited",
            Self::BothInhibited => "both-inhibited",
        };
        f.write_str(s)
    }
}

/// Pack the externally published status byte.
///
/// Bit layout: 0 charge inhibit, 1 drive inhibit, 2 heater, 3 ignition,
/// 4 charge enable.
#[inline]
#[must_use]
pub fn status_byte(state: InterlockState, heater_on: bool, snap: SignalSnapshot) -> u8 {
    u8::from(state.charge_inhibit)
        | u8::from(state.drive_inhibit) << 1
        | u8::from(heater_on) << 2
        | u8::from(snap.ignition) << 3
        | u8::from(snap.charge_enable) << 4
}

/// Pack the fault byte published alongside the status byte.
///
/// Bit layout: 0 tripped, 1 packs imbalanced, 2 cell bus stale.
#[inline]
#[must_use]
pub fn error_byte(tripped: bool, imbalanced: bool, bus_stale: bool) -> u8 {
    u8::from(tripped) | u8::from(imbalanced) << 1 | u8::from(bus_stale) << 2
}

/// Snapshot of one evaluated cycle for logging and the CLI.
#[derive(Debug, Clone, Copy)]
pub struct CycleReport {
    pub cycle: u64,
    pub state: InterlockState,
    pub kind: InterlockKind,
    pub snapshot: SignalSnapshot,
    pub battery: BatteryStatus,
    pub heater_on: bool,
    /// Bit per pack, LSB = pack 0.
    pub pack_inhibit_mask: u8,
    /// Allowed charge current in deciamps; 0 while charging is thermally barred.
    pub charge_limit_da: u16,
    /// True when this cycle evaluated on the safe-default snapshot.
    pub signal_fault: bool,
    pub status_byte: u8,
    pub error_byte: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_projects_the_two_booleans() {
        let mut s = InterlockState::default();
        assert_eq!(s.kind(), InterlockKind::Armed);
        s.drive_inhibit = true;
        assert_eq!(s.kind(), InterlockKind::DriveInhibited);
        s.charge_inhibit = true;
        assert_eq!(s.kind(), InterlockKind::BothInhibited);
        s.drive_inhibit = false;
        assert_eq!(s.kind(), InterlockKind::ChargeInhibited);
    }

    #[test]
    fn status_byte_layout() {
        let snap = SignalSnapshot {
            ignition: true,
            charge_enable: true,
            ..SignalSnapshot::default()
        };
        let state = InterlockState {
            drive_inhibit: true,
            charge_inhibit: false,
        };
        // drive<<1 | ignition<<3 | charge_enable<<4
        assert_eq!(status_byte(state, false, snap), 0b1_1010);

        let state = InterlockState {
            drive_inhibit: false,
            charge_inhibit: true,
        };
        assert_eq!(status_byte(state, true, SignalSnapshot::default()), 0b101);
    }

    #[test]
    fn error_byte_layout() {
        assert_eq!(error_byte(false, false, false), 0);
        assert_eq!(error_byte(true, false, false), 0b001);
        assert_eq!(error_byte(false, true, false), 0b010);
        assert_eq!(error_byte(false, false, true), 0b100);
        assert_eq!(error_byte(true, true, true), 0b111);
    }
}
