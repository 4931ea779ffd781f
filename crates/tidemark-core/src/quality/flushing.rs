use chrono::{DateTime, Duration, Utc};

use crate::run_types::RunTypePeriods;
use crate::sensor_values_list::SensorValuesList;
use crate::time_range::TimeRange;

/// True when `time` falls within `flushing` of the start of its run-type period.
pub fn is_flushing(periods: &RunTypePeriods, time: DateTime<Utc>, flushing: Duration) -> bool {
    if flushing <= Duration::zero() {
        return false;
    }
    periods
        .period_at(time)
        .is_some_and(|period| time - period.start() < flushing)
}

/// Marks every value recorded during a flushing window. `to_period_time` moves a
/// value's time onto the run-type clock; values it cannot place are left alone.
/// Returns the number of values newly marked.
pub fn apply_flushing<F>(
    list: &mut SensorValuesList,
    periods: &RunTypePeriods,
    flushing: Duration,
    to_period_time: F,
) -> usize
where
    F: Fn(DateTime<Utc>) -> Option<DateTime<Utc>>,
{
    if flushing <= Duration::zero() || periods.is_empty() {
        return 0;
    }

    let mut marked = 0;
    for value in list.iter_mut() {
        let Some(time) = to_period_time(value.time()) else {
            continue;
        };
        if is_flushing(periods, time, flushing) && value.is_usable() && value.set_flushing() {
            marked += 1;
        }
    }
    marked
}
