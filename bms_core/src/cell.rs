//! Cell classification against voltage limits.
//!
//! Thresholds are strict inequalities: a cell sitting exactly on the empty or
//! full threshold is still Normal. Readings outside the sensor's plausible
//! window classify as Fault regardless of the charge thresholds.

/// Classification of a single cell reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStatus {
    Normal,
    Empty,
    Full,
    Fault,
}

impl CellStatus {
    /// Severity used for worst-case folding: Fault > Empty/Full > Normal.
    #[inline]
    #[must_use]
    pub fn severity(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Empty | Self::Full => 1,
            Self::Fault => 2,
        }
    }

    /// The more severe of two statuses; `self` wins severity ties.
    #[inline]
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

/// Voltage classification limits in millivolts, quantized at the API edge.
#[derive(Debug, Clone, Copy)]
pub struct CellLimits {
    pub empty_mv: i32,
    pub full_mv: i32,
    pub fault_floor_mv: i32,
    pub fault_ceil_mv: i32,
}

/// A classified cell reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellReading {
    pub pack: u8,
    pub cell: u16,
    pub millivolts: i32,
    pub temp_dc: i16,
    pub status: CellStatus,
}

/// Classify one voltage reading.
#[inline]
#[must_use]
pub fn classify_mv(mv: i32, limits: &CellLimits) -> CellStatus {
    if mv < limits.fault_floor_mv || mv > limits.fault_ceil_mv {
        CellStatus::Fault
    } else if mv < limits.empty_mv {
        CellStatus::Empty
    } else if mv > limits.full_mv {
        CellStatus::Full
    } else {
        CellStatus::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> CellLimits {
        CellLimits {
            empty_mv: 2_900,
            full_mv: 4_000,
            fault_floor_mv: 500,
            fault_ceil_mv: 5_000,
        }
    }

    #[test]
    fn thresholds_are_strict() {
        // Exactly on a threshold is still Normal.
        assert_eq!(classify_mv(2_900, &limits()), CellStatus::Normal);
        assert_eq!(classify_mv(4_000, &limits()), CellStatus::Normal);
        assert_eq!(classify_mv(2_899, &limits()), CellStatus::Empty);
        assert_eq!(classify_mv(4_001, &limits()), CellStatus::Full);
    }

    #[test]
    fn implausible_readings_are_faults() {
        assert_eq!(classify_mv(0, &limits()), CellStatus::Fault);
        assert_eq!(classify_mv(499, &limits()), CellStatus::Fault);
        assert_eq!(classify_mv(5_001, &limits()), CellStatus::Fault);
        // Edge of the plausible window is classified normally.
        assert_eq!(classify_mv(500, &limits()), CellStatus::Empty);
        assert_eq!(classify_mv(5_000, &limits()), CellStatus::Full);
    }

    #[test]
    fn worst_orders_fault_over_empty_full_over_normal() {
        use CellStatus::*;
        assert_eq!(Normal.worst(Empty), Empty);
        assert_eq!(Empty.worst(Fault), Fault);
        assert_eq!(Full.worst(Normal), Full);
        assert_eq!(Fault.worst(Full), Fault);
        // Ties keep the left-hand side.
        assert_eq!(Empty.worst(Full), Empty);
        assert_eq!(Full.worst(Empty), Full);
    }
}
