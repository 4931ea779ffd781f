pub mod flushing;
pub mod position;
pub mod range_check;

use crate::sensor_value::{RoutineFlag, SensorValue};
use crate::sensor_values_list::SensorValuesList;

pub use flushing::{apply_flushing, is_flushing};
pub use position::{apply_position_to_values, position_qc, PositionList, PositionLists};
pub use range_check::{Bounds, RangeCheck};

/// An automatic QC check run against individual sensor values.
pub trait AutoQcRoutine {
    fn name(&self) -> &'static str;

    /// `None` when the value passes.
    fn check(&self, value: &SensorValue) -> Option<RoutineFlag>;
}

/// Re-runs `routines` over every value in `list`, replacing earlier auto-QC
/// results. Returns the number of values that were flagged.
pub fn run_routines(list: &mut SensorValuesList, routines: &[&dyn AutoQcRoutine]) -> usize {
    let mut flagged = 0;
    for value in list.iter_mut() {
        value.clear_auto_qc();
        let mut raised = false;
        for routine in routines {
            if let Some(flag) = routine.check(value) {
                value.add_auto_qc(flag);
                raised = true;
            }
        }
        if raised {
            flagged += 1;
        }
    }
    flagged
}
