pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};

/// One epoch of dead-reckoning and GNSS readings.
///
/// The cycle reads every field and then corrects the PDR fields in place:
/// after `run_cycle` the PDR side holds the fused trajectory, the GNSS side
/// is untouched input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NavSample {
    /// Millisecond epoch counter, wraps at 2^32.
    pub epoch_ms: u32,
    /// Dead-reckoned latitude [deg].
    pub pdr_latitude: f64,
    /// Dead-reckoned longitude [deg].
    pub pdr_longitude: f64,
    /// Dead-reckoned heading [rad], in (-pi, pi].
    pub pdr_heading: f64,
    /// Current step length estimate [m].
    pub pdr_step_length: f64,
    /// Step cadence [Hz].
    pub pdr_step_frequency: f64,
    /// GNSS latitude fix [deg].
    pub gnss_latitude: f64,
    /// GNSS longitude fix [deg].
    pub gnss_longitude: f64,
    /// GNSS course over ground [rad].
    pub gnss_heading: f64,
}

/// Which corrections were actually fed back into the trajectory this cycle.
///
/// Flags combine with `|`; a value equal to `NO_FIX` means both the position
/// and heading gates rejected their corrections. Step length has no gate, so
/// `LENGTH_FIX` is present after every normal cycle.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FusionStatus(u8);

impl FusionStatus {
    pub const NO_FIX: FusionStatus = FusionStatus(0);
    pub const POS_FIX: FusionStatus = FusionStatus(1 << 0);
    pub const LENGTH_FIX: FusionStatus = FusionStatus(1 << 1);
    pub const HEADING_FIX: FusionStatus = FusionStatus(1 << 2);

    /// True if every flag in `other` is set in `self`.
    pub fn contains(self, other: FusionStatus) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if no correction was fed back at all.
    pub fn is_no_fix(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for FusionStatus {
    type Output = FusionStatus;

    fn bitor(self, rhs: FusionStatus) -> FusionStatus {
        FusionStatus(self.0 | rhs.0)
    }
}

impl BitOrAssign for FusionStatus {
    fn bitor_assign(&mut self, rhs: FusionStatus) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_combining() {
        let mut status = FusionStatus::NO_FIX;
        assert!(status.is_no_fix());

        status |= FusionStatus::LENGTH_FIX;
        status |= FusionStatus::POS_FIX;

        assert!(status.contains(FusionStatus::LENGTH_FIX));
        assert!(status.contains(FusionStatus::POS_FIX));
        assert!(!status.contains(FusionStatus::HEADING_FIX));
        assert!(!status.is_no_fix());
    }

    #[test]
    fn test_status_contains_union() {
        let status = FusionStatus::POS_FIX | FusionStatus::HEADING_FIX;
        assert!(status.contains(FusionStatus::POS_FIX | FusionStatus::HEADING_FIX));
        assert!(!status.contains(FusionStatus::POS_FIX | FusionStatus::LENGTH_FIX));
    }
}
