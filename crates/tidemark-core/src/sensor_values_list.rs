use std::ops::Range;

use chrono::{DateTime, Duration, Utc};
use once_cell::unsync::OnceCell;
use thiserror::Error;
use tracing::debug;

use crate::flags::{combine_outcomes, QcOutcome};
use crate::sensor_value::SensorValue;
use crate::time_range::{SimpleTimeRange, TimeRange, END_OF_TIME};

/// Gap below which consecutive readings count as one continuous run.
pub const DEFAULT_CONTINUOUS_LIMIT_SECONDS: i64 = 75;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SensorValuesListError {
    #[error("invalid search range: start {start} is not before end {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("a value already exists at {time} (column {column_id})")]
    DuplicateTime {
        column_id: i64,
        time: DateTime<Utc>,
    },
    #[error("column {column_id} does not belong to this list")]
    UnexpectedColumn { column_id: i64 },
}

/// Time-ordered values for one or more equivalent columns, unique by time.
#[derive(Debug, Clone, Default)]
pub struct SearchableSensorValuesList {
    columns: Vec<i64>,
    values: Vec<SensorValue>,
}

impl SearchableSensorValuesList {
    pub fn new(columns: impl IntoIterator<Item = i64>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
            values: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[i64] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorValue> {
        self.values.iter()
    }

    /// Mutable access for QC updates. Times are not mutable through this path,
    /// so ordering is preserved.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SensorValue> {
        self.values.iter_mut()
    }

    pub fn as_slice(&self) -> &[SensorValue] {
        &self.values
    }

    pub fn first(&self) -> Option<&SensorValue> {
        self.values.first()
    }

    pub fn last(&self) -> Option<&SensorValue> {
        self.values.last()
    }

    /// Inserts in time order regardless of the order values arrive in.
    pub fn add(&mut self, value: SensorValue) -> Result<(), SensorValuesListError> {
        if !self.columns.is_empty() && !self.columns.contains(&value.column_id()) {
            return Err(SensorValuesListError::UnexpectedColumn {
                column_id: value.column_id(),
            });
        }

        match self.position(value.time()) {
            Ok(_) => Err(SensorValuesListError::DuplicateTime {
                column_id: value.column_id(),
                time: value.time(),
            }),
            Err(index) => {
                self.values.insert(index, value);
                Ok(())
            }
        }
    }

    pub fn get(&self, time: DateTime<Utc>) -> Option<&SensorValue> {
        self.position(time).ok().map(|index| &self.values[index])
    }

    pub fn get_mut(&mut self, time: DateTime<Utc>) -> Option<&mut SensorValue> {
        match self.position(time) {
            Ok(index) => Some(&mut self.values[index]),
            Err(_) => None,
        }
    }

    /// Values with `start <= time < end`.
    pub fn range_search(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<&[SensorValue], SensorValuesListError> {
        if start >= end {
            return Err(SensorValuesListError::InvalidRange { start, end });
        }
        let from = self.values.partition_point(|value| value.time() < start);
        let to = self.values.partition_point(|value| value.time() < end);
        Ok(&self.values[from..to.max(from)])
    }

    /// One value when `time` is exactly on an entry or outside the series
    /// (clamped to the boundary), otherwise the two entries bracketing it.
    pub fn get_closest(&self, time: DateTime<Utc>) -> Vec<&SensorValue> {
        if self.values.is_empty() {
            return Vec::new();
        }

        match self.position(time) {
            Ok(index) => vec![&self.values[index]],
            Err(0) => vec![&self.values[0]],
            Err(index) if index == self.values.len() => vec![&self.values[index - 1]],
            Err(index) => vec![&self.values[index - 1], &self.values[index]],
        }
    }

    /// The single nearest entry. An exact tie goes to the earlier entry.
    pub fn nearest(&self, time: DateTime<Utc>) -> Option<&SensorValue> {
        let index = match self.position(time) {
            Ok(index) => index,
            Err(0) => 0,
            Err(index) if index >= self.values.len() => index.checked_sub(1)?,
            Err(index) => {
                let (before, after) = (&self.values[index - 1], &self.values[index]);
                if after.time() - time < time - before.time() {
                    index
                } else {
                    index - 1
                }
            }
        };
        self.values.get(index)
    }

    pub fn coverage(&self) -> Option<SimpleTimeRange> {
        let first = self.values.first()?;
        let last = self.values.last()?;
        let end = last
            .time()
            .checked_add_signed(Duration::milliseconds(1))
            .unwrap_or(END_OF_TIME);
        SimpleTimeRange::new(first.time(), end).ok()
    }

    fn position(&self, time: DateTime<Utc>) -> Result<usize, usize> {
        self.values.binary_search_by_key(&time, SensorValue::time)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementMode {
    Continuous,
    Periodic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListSettings {
    pub continuous_limit: Duration,
    pub max_interpolation_gap: Option<Duration>,
}

impl Default for ListSettings {
    fn default() -> Self {
        Self {
            continuous_limit: Duration::seconds(DEFAULT_CONTINUOUS_LIMIT_SECONDS),
            max_interpolation_gap: None,
        }
    }
}

/// A value synthesised from one or more sensor values.
#[derive(Debug, Clone, PartialEq)]
pub struct ListValue {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub nominal: DateTime<Utc>,
    pub value: f64,
    pub qc: QcOutcome,
    pub sources: Vec<i64>,
    pub interpolated: bool,
}

impl TimeRange for ListValue {
    fn start(&self) -> DateTime<Utc> {
        self.start
    }

    fn end(&self) -> DateTime<Utc> {
        self.end
    }

    fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.start && time <= self.end
    }
}

#[derive(Debug, Clone)]
struct Layout {
    mode: MeasurementMode,
    groups: Vec<Range<usize>>,
}

/// Query and synthesis layer over a [`SearchableSensorValuesList`].
#[derive(Debug, Clone, Default)]
pub struct SensorValuesList {
    values: SearchableSensorValuesList,
    settings: ListSettings,
    layout: OnceCell<Layout>,
}

impl SensorValuesList {
    pub fn new(columns: impl IntoIterator<Item = i64>, settings: ListSettings) -> Self {
        Self {
            values: SearchableSensorValuesList::new(columns),
            settings,
            layout: OnceCell::new(),
        }
    }

    /// Builds a list from several equivalent columns. When two columns carry a
    /// value at the same time, the column listed first wins.
    pub fn from_values<I>(columns: &[i64], values: I, settings: ListSettings) -> Self
    where
        I: IntoIterator<Item = SensorValue>,
    {
        let mut ranked: Vec<(usize, SensorValue)> = values
            .into_iter()
            .filter_map(|value| {
                columns
                    .iter()
                    .position(|column| *column == value.column_id())
                    .map(|rank| (rank, value))
            })
            .collect();
        ranked.sort_by_key(|(rank, value)| (value.time(), *rank));

        let mut list = Self::new(columns.iter().copied(), settings);
        for (_, value) in ranked {
            let column_id = value.column_id();
            let time = value.time();
            if list.values.add(value).is_err() {
                debug!(column_id, %time, "dropping duplicate-time value from merged column");
            }
        }
        list
    }

    pub fn settings(&self) -> &ListSettings {
        &self.settings
    }

    pub fn columns(&self) -> &[i64] {
        self.values.columns()
    }

    pub fn searchable(&self) -> &SearchableSensorValuesList {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorValue> {
        self.values.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SensorValue> {
        self.values.iter_mut()
    }

    pub fn add(&mut self, value: SensorValue) -> Result<(), SensorValuesListError> {
        self.values.add(value)?;
        self.layout.take();
        Ok(())
    }

    pub fn get(&self, time: DateTime<Utc>) -> Option<&SensorValue> {
        self.values.get(time)
    }

    pub fn get_mut(&mut self, time: DateTime<Utc>) -> Option<&mut SensorValue> {
        self.values.get_mut(time)
    }

    pub fn range_search(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<&[SensorValue], SensorValuesListError> {
        self.values.range_search(start, end)
    }

    pub fn get_closest(&self, time: DateTime<Utc>) -> Vec<&SensorValue> {
        self.values.get_closest(time)
    }

    pub fn nearest(&self, time: DateTime<Utc>) -> Option<&SensorValue> {
        self.values.nearest(time)
    }

    pub fn coverage(&self) -> Option<SimpleTimeRange> {
        self.values.coverage()
    }

    pub fn measurement_mode(&self) -> MeasurementMode {
        self.layout().mode
    }

    /// Point-mode value at `time`.
    ///
    /// Returns `None` instead of extrapolating when `time` lies outside the
    /// series or when the usable neighbours are further apart than the
    /// configured maximum gap.
    pub fn value_at(&self, time: DateTime<Utc>) -> Option<ListValue> {
        let values = self.values.as_slice();
        let (first, last) = (values.first()?, values.last()?);
        if time < first.time() || time > last.time() {
            return None;
        }

        match self.layout().mode {
            MeasurementMode::Continuous => self.continuous_value(time),
            MeasurementMode::Periodic => self.periodic_value(time),
        }
    }

    /// Range-mode value: the average of usable values with `start <= time < end`.
    pub fn value_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        nominal: DateTime<Utc>,
    ) -> Result<Option<ListValue>, SensorValuesListError> {
        if start >= end {
            return Err(SensorValuesListError::InvalidRange { start, end });
        }
        let values = self.values.as_slice();
        let from = values.partition_point(|value| value.time() < start);
        let to = values.partition_point(|value| value.time() < end);
        Ok(summarise(&values[from..to.max(from)], nominal))
    }

    fn continuous_value(&self, time: DateTime<Utc>) -> Option<ListValue> {
        let values = self.values.as_slice();
        let split = match self.values.position(time) {
            Ok(index) => {
                if values[index].is_usable() {
                    return summarise(&values[index..=index], time);
                }
                index
            }
            Err(index) => index,
        };

        let prior = values[..split].iter().rev().find(|value| value.is_usable())?;
        let next = values[split..]
            .iter()
            .find(|value| value.is_usable() && value.time() > time)?;

        let prior = summarise(std::slice::from_ref(prior), prior.time())?;
        let next = summarise(std::slice::from_ref(next), next.time())?;
        self.interpolate(&prior, &next, time)
    }

    fn periodic_value(&self, time: DateTime<Utc>) -> Option<ListValue> {
        let values = self.values.as_slice();
        let groups = &self.layout().groups;

        let containing = groups.iter().position(|group| {
            values[group.start].time() <= time && time <= values[group.end - 1].time()
        });

        if let Some(index) = containing {
            if let Some(value) = summarise(&values[groups[index].clone()], time) {
                return Some(value);
            }
        }

        let split = groups.partition_point(|group| values[group.start].time() <= time);
        let before = match containing {
            Some(index) => &groups[..index],
            None => &groups[..split],
        };
        let after = match containing {
            Some(index) => &groups[index + 1..],
            None => &groups[split..],
        };

        let prior = before
            .iter()
            .rev()
            .find_map(|group| group_summary(values, group))?;
        let next = after
            .iter()
            .find_map(|group| group_summary(values, group))?;
        self.interpolate(&prior, &next, time)
    }

    fn interpolate(
        &self,
        prior: &ListValue,
        next: &ListValue,
        time: DateTime<Utc>,
    ) -> Option<ListValue> {
        if let Some(max_gap) = self.settings.max_interpolation_gap {
            if next.start - prior.end > max_gap {
                return None;
            }
        }

        let span = (next.nominal - prior.nominal).num_milliseconds();
        let fraction = if span == 0 {
            0.0
        } else {
            (time - prior.nominal).num_milliseconds() as f64 / span as f64
        };

        let mut sources = prior.sources.clone();
        for source in &next.sources {
            if !sources.contains(source) {
                sources.push(*source);
            }
        }

        Some(ListValue {
            start: prior.start,
            end: next.end,
            nominal: time,
            value: prior.value + (next.value - prior.value) * fraction,
            qc: combine_outcomes([&prior.qc, &next.qc]),
            sources,
            interpolated: true,
        })
    }

    fn layout(&self) -> &Layout {
        self.layout
            .get_or_init(|| compute_layout(self.values.as_slice(), self.settings.continuous_limit))
    }
}

fn compute_layout(values: &[SensorValue], limit: Duration) -> Layout {
    let mut groups = Vec::new();
    let mut continuous_gaps = 0usize;
    let mut group_start = 0usize;

    for index in 1..values.len() {
        let gap = values[index].time() - values[index - 1].time();
        if gap <= limit {
            continuous_gaps += 1;
        } else {
            groups.push(group_start..index);
            group_start = index;
        }
    }
    if !values.is_empty() {
        groups.push(group_start..values.len());
    }

    let total_gaps = values.len().saturating_sub(1);
    let mode = if continuous_gaps * 2 >= total_gaps {
        MeasurementMode::Continuous
    } else {
        MeasurementMode::Periodic
    };

    Layout { mode, groups }
}

/// Average of a group, stamped at the midpoint of its contributing values.
fn group_summary(values: &[SensorValue], group: &Range<usize>) -> Option<ListValue> {
    let members = &values[group.clone()];
    let usable: Vec<&SensorValue> = members.iter().filter(|value| value.is_usable()).collect();
    let first = usable.first()?.time();
    let last = usable.last()?.time();
    let midpoint = first + (last - first) / 2;
    summarise(members, midpoint)
}

/// Zero usable values give `None`; one is passed through; several are averaged
/// with their flags combined.
fn summarise(values: &[SensorValue], nominal: DateTime<Utc>) -> Option<ListValue> {
    let usable: Vec<(&SensorValue, f64)> = values
        .iter()
        .filter(|value| value.is_usable())
        .filter_map(|value| value.double_value().map(|number| (value, number)))
        .collect();

    let (first, _) = usable.first()?;
    let (last, _) = usable.last()?;
    let mean = usable.iter().map(|(_, number)| number).sum::<f64>() / usable.len() as f64;
    let outcomes: Vec<QcOutcome> = usable.iter().map(|(value, _)| value.qc()).collect();

    Some(ListValue {
        start: first.time(),
        end: last.time(),
        nominal,
        value: mean,
        qc: combine_outcomes(outcomes.iter()),
        sources: usable.iter().filter_map(|(value, _)| value.id()).collect(),
        interpolated: false,
    })
}
