use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sensor_value::SensorValue;
use crate::time_range::{TimeRange, END_OF_TIME};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunTypeError {
    #[error("run type '{run_type}' at {time} is not after the previous entry at {previous}")]
    NonMonotonic {
        run_type: String,
        previous: DateTime<Utc>,
        time: DateTime<Utc>,
    },
    #[error("run type periods are finished; cannot add '{run_type}' at {time}")]
    Finished {
        run_type: String,
        time: DateTime<Utc>,
    },
    #[error("unrecognised run type '{0}'")]
    UnknownRunType(String),
}

/// Operating mode between `start` (inclusive) and `end` (exclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunTypePeriod {
    run_type: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl RunTypePeriod {
    pub fn run_type(&self) -> &str {
        &self.run_type
    }

    pub fn is_open(&self) -> bool {
        self.end == END_OF_TIME
    }
}

impl TimeRange for RunTypePeriod {
    fn start(&self) -> DateTime<Utc> {
        self.start
    }

    fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

/// Contiguous, non-overlapping run-type periods built from an append-only
/// stream of observations with strictly increasing times.
#[derive(Debug, Clone, Default)]
pub struct RunTypePeriods {
    periods: Vec<RunTypePeriod>,
    latest: Option<DateTime<Utc>>,
    finished: bool,
}

impl RunTypePeriods {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds and finishes periods from the text values of a run-type column.
    /// Values without text are skipped.
    pub fn from_values<'a, I>(values: I) -> Result<Self, RunTypeError>
    where
        I: IntoIterator<Item = &'a SensorValue>,
    {
        let mut periods = Self::new();
        for value in values {
            let run_type = value.value().map(str::trim).unwrap_or_default();
            if !run_type.is_empty() {
                periods.add(run_type, value.time())?;
            }
        }
        periods.finish();
        Ok(periods)
    }

    /// Extends the current period when `run_type` matches it, otherwise closes
    /// it at `time` and opens a new one.
    pub fn add(
        &mut self,
        run_type: impl Into<String>,
        time: DateTime<Utc>,
    ) -> Result<(), RunTypeError> {
        let run_type = run_type.into();

        if self.finished {
            return Err(RunTypeError::Finished { run_type, time });
        }
        if let Some(previous) = self.latest {
            if time <= previous {
                return Err(RunTypeError::NonMonotonic {
                    run_type,
                    previous,
                    time,
                });
            }
        }
        self.latest = Some(time);

        if let Some(current) = self.periods.last_mut() {
            if current.run_type == run_type {
                return Ok(());
            }
            current.end = time;
        }

        self.periods.push(RunTypePeriod {
            run_type,
            start: time,
            end: END_OF_TIME,
        });
        Ok(())
    }

    /// Seals the collection. The last period stays open to the end of time.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn periods(&self) -> &[RunTypePeriod] {
        &self.periods
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.period_at(time).is_some()
    }

    pub fn period_at(&self, time: DateTime<Utc>) -> Option<&RunTypePeriod> {
        let index = self.periods.partition_point(|period| period.start <= time);
        let period = self.periods.get(index.checked_sub(1)?)?;
        period.contains(time).then_some(period)
    }

    pub fn run_type_at(&self, time: DateTime<Utc>) -> Option<&str> {
        self.period_at(time).map(RunTypePeriod::run_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTypeCategory {
    Measurement,
    Standard,
    Ignored,
}

/// Case-insensitive mapping from instrument run-type text to its category.
#[derive(Debug, Clone, Default)]
pub struct RunTypeClassifier {
    categories: HashMap<String, RunTypeCategory>,
}

impl RunTypeClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, run_type: &str, category: RunTypeCategory) {
        self.categories.insert(normalise(run_type), category);
    }

    pub fn classify(&self, run_type: &str) -> Result<RunTypeCategory, RunTypeError> {
        self.categories
            .get(&normalise(run_type))
            .copied()
            .ok_or_else(|| RunTypeError::UnknownRunType(run_type.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }
}

fn normalise(run_type: &str) -> String {
    run_type.trim().to_lowercase()
}
