use chrono::{DateTime, Utc};

use crate::flags::{combine_outcomes, QcOutcome};
use crate::sensor_offsets::{SensorOffsets, SensorOffsetsError};
use crate::sensor_values_list::{ListValue, SensorValuesList};

/// Combined QC of the longitude and latitude values for one time. `None` when
/// neither is available.
pub fn position_qc(longitude: Option<&ListValue>, latitude: Option<&ListValue>) -> Option<QcOutcome> {
    let outcomes: Vec<&QcOutcome> = [longitude, latitude]
        .into_iter()
        .flatten()
        .map(|value| &value.qc)
        .collect();

    if outcomes.is_empty() {
        None
    } else {
        Some(combine_outcomes(outcomes))
    }
}

/// A position list together with the sensor group whose clock it runs on.
#[derive(Debug, Clone)]
pub struct PositionList {
    pub group: String,
    pub list: SensorValuesList,
}

/// Longitude and latitude series used to derive positional QC.
#[derive(Debug, Clone, Default)]
pub struct PositionLists {
    pub longitude: Option<PositionList>,
    pub latitude: Option<PositionList>,
}

impl PositionLists {
    pub fn is_empty(&self) -> bool {
        self.longitude.is_none() && self.latitude.is_none()
    }

    /// Position QC at `time`, which is read on `group`'s clock.
    pub fn position_at(
        &self,
        time: DateTime<Utc>,
        group: &str,
        offsets: &SensorOffsets,
    ) -> Result<Option<QcOutcome>, SensorOffsetsError> {
        let lookup = |position: &Option<PositionList>| -> Result<Option<ListValue>, SensorOffsetsError> {
            match position {
                Some(position) => {
                    let local = offsets.get_offset_time(time, group, &position.group)?;
                    Ok(position.list.value_at(local))
                }
                None => Ok(None),
            }
        };

        let longitude = lookup(&self.longitude)?;
        let latitude = lookup(&self.latitude)?;
        Ok(position_qc(longitude.as_ref(), latitude.as_ref()))
    }
}

/// Pushes positional QC down onto the values of `target`. `position_at` gives
/// the position outcome for a value's time, `None` where no position is known.
/// Returns the number of values whose QC changed.
pub fn apply_position_to_values<F>(target: &mut SensorValuesList, mut position_at: F) -> usize
where
    F: FnMut(DateTime<Utc>) -> Option<QcOutcome>,
{
    let mut changed = 0;
    for value in target.iter_mut() {
        if let Some(position) = position_at(value.time()) {
            if value.apply_position_qc(&position) {
                changed += 1;
            }
        }
    }
    changed
}
