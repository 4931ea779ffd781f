use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Synthetic end used for open-ended ranges.
pub const END_OF_TIME: DateTime<Utc> = DateTime::<Utc>::MAX_UTC;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeRangeError {
    #[error("time range end {end} is before its start {start}")]
    EndBeforeStart {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// A half-open interval `[start, end)`.
pub trait TimeRange {
    fn start(&self) -> DateTime<Utc>;

    fn end(&self) -> DateTime<Utc>;

    fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.start() && time < self.end()
    }

    fn duration(&self) -> Duration {
        self.end() - self.start()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleTimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl SimpleTimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TimeRangeError> {
        if end < start {
            return Err(TimeRangeError::EndBeforeStart { start, end });
        }
        Ok(Self { start, end })
    }
}

impl TimeRange for SimpleTimeRange {
    fn start(&self) -> DateTime<Utc> {
        self.start
    }

    fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

/// Latest start across `ranges`, pushed later by `buffer`. `None` for an empty set.
pub fn latest_start<'a, R, I>(ranges: I, buffer: Duration) -> Option<DateTime<Utc>>
where
    R: TimeRange + ?Sized + 'a,
    I: IntoIterator<Item = &'a R>,
{
    ranges
        .into_iter()
        .map(|range| range.start())
        .max()
        .map(|start| start.checked_add_signed(buffer).unwrap_or(END_OF_TIME))
}

/// Earliest end across `ranges`, pulled earlier by `buffer`. `None` for an empty set.
pub fn earliest_end<'a, R, I>(ranges: I, buffer: Duration) -> Option<DateTime<Utc>>
where
    R: TimeRange + ?Sized + 'a,
    I: IntoIterator<Item = &'a R>,
{
    ranges
        .into_iter()
        .map(|range| range.end())
        .min()
        .map(|end| {
            end.checked_sub_signed(buffer)
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        })
}

/// The window shared by every range after trimming `buffer` from both sides.
pub fn overlap<'a, R>(ranges: &'a [R], buffer: Duration) -> Option<SimpleTimeRange>
where
    R: TimeRange + 'a,
{
    let start = latest_start(ranges.iter(), buffer)?;
    let end = earliest_end(ranges.iter(), buffer)?;
    if start < end {
        Some(SimpleTimeRange { start, end })
    } else {
        None
    }
}
