use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assembly::{DatasetLists, MeasurementAssembler};
use crate::calibration::Calibrator;
use crate::error::{ProcessingError, Result};
use crate::instrument::Instrument;
use crate::measurement::Measurement;
use crate::quality::{apply_flushing, apply_position_to_values, run_routines, AutoQcRoutine};
use crate::run_types::{RunTypeCategory, RunTypePeriods};
use crate::sensor_offsets::{SensorOffsets, SensorOffsetsError};
use crate::sensor_value::SensorValue;
use crate::sensor_values_list::SensorValuesList;
use crate::store::DatasetStore;
use crate::time_range::{overlap, SimpleTimeRange, TimeRange};

/// Shared flag used to stop a run between timestamps.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingSummary {
    pub sensor_values: usize,
    pub auto_qc_flagged: usize,
    pub flushing: usize,
    pub position_overrides: usize,
    pub measurements: usize,
    pub missing_values: usize,
    /// Measurement counts by overall flag.
    pub flags: BTreeMap<String, usize>,
}

/// Output of one dataset run. Nothing is written until the caller commits it.
#[derive(Debug, Clone)]
pub struct ProcessingRun {
    pub run_id: Uuid,
    pub dataset_id: i64,
    pub measurements: Vec<Measurement>,
    /// Sensor values whose QC changed during the run.
    pub updated_values: Vec<SensorValue>,
    pub summary: ProcessingSummary,
}

/// Turns one dataset's sensor values into measurements.
pub struct DatasetProcessor {
    instrument: Instrument,
    offsets: SensorOffsets,
    calibrator: Box<dyn Calibrator + Send + Sync>,
}

impl DatasetProcessor {
    /// Uses the instrument's own calibrations. Every instrument group must be
    /// known to `offsets` under the same parent.
    pub fn new(instrument: Instrument, offsets: SensorOffsets) -> Result<Self> {
        for group in instrument.groups().iter() {
            let known = offsets
                .groups()
                .get(&group.name)
                .ok_or_else(|| SensorOffsetsError::UnknownGroup(group.name.clone()))?;
            if known.parent != group.parent {
                return Err(SensorOffsetsError::ParentMismatch {
                    group: group.name.clone(),
                    expected: group.parent.clone(),
                    found: known.parent.clone(),
                }
                .into());
            }
        }

        let calibrator = Box::new(instrument.calibrations().clone());
        Ok(Self {
            instrument,
            offsets,
            calibrator,
        })
    }

    pub fn with_calibrator(mut self, calibrator: Box<dyn Calibrator + Send + Sync>) -> Self {
        self.calibrator = calibrator;
        self
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn offsets(&self) -> &SensorOffsets {
        &self.offsets
    }

    /// Runs QC and assembly over `values`. Either every measurement is returned
    /// or an error is; a cancelled run yields nothing.
    pub fn run(
        &self,
        dataset_id: i64,
        values: Vec<SensorValue>,
        cancel: &CancelFlag,
    ) -> Result<ProcessingRun> {
        let run_id = Uuid::new_v4();
        let mut summary = ProcessingSummary {
            sensor_values: values.len(),
            ..ProcessingSummary::default()
        };
        info!(%run_id, dataset_id, sensor_values = values.len(), "Starting dataset run");

        let mut lists = DatasetLists::build(&self.instrument, values)?;
        let periods = RunTypePeriods::from_values(lists.run_type_values())?;
        debug!(dataset_id, periods = periods.len(), "Built run type periods");

        let reset = lists.clear_derived_qc();
        if reset > 0 {
            debug!(dataset_id, reset, "Cleared flushing and position flags from an earlier run");
        }
        summary.auto_qc_flagged = self.run_auto_qc(&mut lists);
        summary.flushing = self.apply_flushing(&mut lists, &periods)?;
        summary.position_overrides = self.apply_position_qc(&mut lists)?;

        let targets = self.locate(&lists, &periods)?;
        debug!(dataset_id, targets = targets.len(), "Located measurement times");

        let assembler =
            MeasurementAssembler::new(&self.instrument, &lists, &self.offsets, self.calibrator.as_ref());
        let mut measurements = Vec::with_capacity(targets.len());
        for (time, run_type) in targets {
            if cancel.is_cancelled() {
                warn!(%run_id, dataset_id, completed = measurements.len(), "Dataset run cancelled");
                return Err(ProcessingError::Cancelled {
                    dataset_id,
                    completed: measurements.len(),
                });
            }
            measurements.push(assembler.assemble(dataset_id, time, run_type)?);
        }

        for measurement in &measurements {
            summary.missing_values += measurement
                .values
                .values()
                .filter(|value| value.is_missing())
                .count();
            *summary
                .flags
                .entry(measurement.overall_qc().flag.to_string())
                .or_default() += 1;
        }
        summary.measurements = measurements.len();

        info!(
            %run_id,
            dataset_id,
            measurements = summary.measurements,
            missing_values = summary.missing_values,
            flushing = summary.flushing,
            position_overrides = summary.position_overrides,
            "Finished dataset run"
        );

        Ok(ProcessingRun {
            run_id,
            dataset_id,
            measurements,
            updated_values: lists.dirty_values(),
            summary,
        })
    }

    /// Loads, processes and commits one dataset.
    pub fn run_with_store(
        &self,
        store: &mut dyn DatasetStore,
        dataset_id: i64,
        cancel: &CancelFlag,
    ) -> Result<ProcessingRun> {
        let values = store.load_sensor_values(dataset_id)?;
        let run = self.run(dataset_id, values, cancel)?;
        store.update_sensor_values(dataset_id, &run.updated_values)?;
        store.replace_measurements(dataset_id, &run.measurements)?;
        Ok(run)
    }

    fn run_auto_qc(&self, lists: &mut DatasetLists) -> usize {
        let checks = self.instrument.range_checks();
        let mut flagged = 0;
        for (sensor_type, candidate) in lists.iter_mut() {
            let routines: Vec<&dyn AutoQcRoutine> = checks
                .get(sensor_type)
                .map(|check| vec![*check as &dyn AutoQcRoutine])
                .unwrap_or_default();
            flagged += run_routines(&mut candidate.list, &routines);
        }
        flagged
    }

    fn apply_flushing(&self, lists: &mut DatasetLists, periods: &RunTypePeriods) -> Result<usize> {
        let flushing = self.instrument.flushing();
        let Some(run_type_column) = self.instrument.run_type_column() else {
            return Ok(0);
        };
        if periods.is_empty() || flushing <= Duration::zero() {
            return Ok(0);
        }

        let run_type_group = self.instrument.group_name_for_column(run_type_column).to_string();
        let mut marked = 0;
        for (_, candidate) in lists.iter_mut() {
            let converted = self.converted_times(&candidate.list, &candidate.group, &run_type_group)?;
            marked += apply_flushing(&mut candidate.list, periods, flushing, |time| {
                converted.get(&time).copied()
            });
        }
        Ok(marked)
    }

    fn apply_position_qc(&self, lists: &mut DatasetLists) -> Result<usize> {
        let positions = lists.position_lists(&self.instrument);
        if positions.is_empty() {
            return Ok(0);
        }

        let mut changed = 0;
        for (sensor_type, candidate) in lists.iter_mut() {
            let is_position = self
                .instrument
                .sensor_type(sensor_type)
                .is_some_and(|sensor_type| sensor_type.position.is_some());
            if is_position {
                continue;
            }

            let mut outcomes = HashMap::new();
            for value in candidate.list.iter() {
                if let Some(outcome) =
                    positions.position_at(value.time(), &candidate.group, &self.offsets)?
                {
                    outcomes.insert(value.time(), outcome);
                }
            }
            changed += apply_position_to_values(&mut candidate.list, |time| outcomes.get(&time).cloned());
        }
        Ok(changed)
    }

    /// Target times on the time-base clock with their run types: every usable
    /// core sensor value taken during a measurement run type.
    fn locate(
        &self,
        lists: &DatasetLists,
        periods: &RunTypePeriods,
    ) -> Result<Vec<(DateTime<Utc>, Option<String>)>> {
        let base = self.instrument.time_base_group();
        let core = self.instrument.core_sensor_type()?;
        let classifier = self.instrument.classifier();
        let run_type_group = self
            .instrument
            .run_type_column()
            .map(|column_id| self.instrument.group_name_for_column(column_id));

        let window = if self.instrument.settings().trim_to_common_coverage {
            match self.common_coverage(lists)? {
                Some(window) => Some(window),
                None => {
                    warn!("Assigned sensor lists share no common coverage");
                    return Ok(Vec::new());
                }
            }
        } else {
            None
        };

        let mut targets = BTreeMap::new();
        for candidate in lists.candidates(&core.name) {
            for value in candidate.list.iter().filter(|value| value.is_usable()) {
                let time = self.offsets.get_offset_time(value.time(), &candidate.group, base)?;
                if window.as_ref().is_some_and(|window| !window.contains(time)) {
                    continue;
                }

                let run_type = match run_type_group {
                    Some(group) if !periods.is_empty() => {
                        let local = self.offsets.get_offset_time(time, base, group)?;
                        match periods.run_type_at(local) {
                            Some(run_type) => Some(run_type.to_string()),
                            None => continue,
                        }
                    }
                    _ => None,
                };

                if let Some(run_type) = &run_type {
                    if !classifier.is_empty()
                        && classifier.classify(run_type)? != RunTypeCategory::Measurement
                    {
                        continue;
                    }
                }

                targets.entry(time).or_insert(run_type);
            }
        }
        Ok(targets.into_iter().collect())
    }

    /// Window covered by every non-empty list of every variable, on the
    /// time-base clock.
    fn common_coverage(&self, lists: &DatasetLists) -> Result<Option<SimpleTimeRange>> {
        let base = self.instrument.time_base_group();
        let mut ranges = Vec::new();
        for variable in self.instrument.variables() {
            for candidate in lists.candidates(&variable.sensor_type) {
                let Some(coverage) = candidate.list.coverage() else {
                    continue;
                };
                let start = self.offsets.get_offset_time(coverage.start(), &candidate.group, base)?;
                let end = self.offsets.get_offset_time(coverage.end(), &candidate.group, base)?;
                if let Ok(range) = SimpleTimeRange::new(start, end) {
                    ranges.push(range);
                }
            }
        }
        Ok(overlap(&ranges, Duration::zero()))
    }

    fn converted_times(
        &self,
        list: &SensorValuesList,
        from: &str,
        to: &str,
    ) -> Result<HashMap<DateTime<Utc>, DateTime<Utc>>> {
        list.iter()
            .map(|value| {
                let converted = self.offsets.get_offset_time(value.time(), from, to)?;
                Ok((value.time(), converted))
            })
            .collect()
    }
}
