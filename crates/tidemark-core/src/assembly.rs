use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::calibration::Calibrator;
use crate::flags::QcOutcome;
use crate::instrument::{Instrument, PositionAxis, SensorType};
use crate::measurement::{Measurement, MeasurementValue, MeasurementValueType};
use crate::quality::{PositionList, PositionLists};
use crate::sensor_offsets::{SensorOffsets, SensorOffsetsError};
use crate::sensor_value::SensorValue;
use crate::sensor_values_list::{ListValue, SensorValuesList, SensorValuesListError};

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("variable '{variable}' refers to unknown sensor type '{sensor_type}'")]
    UnknownSensorType {
        variable: String,
        sensor_type: String,
    },
    #[error(transparent)]
    Offsets(#[from] SensorOffsetsError),
}

/// The series for one sensor type on one sensor group's clock.
#[derive(Debug, Clone)]
pub struct CandidateList {
    pub group: String,
    pub list: SensorValuesList,
}

/// Every sensor values list of a dataset, keyed by sensor type name.
#[derive(Debug, Clone, Default)]
pub struct DatasetLists {
    lists: BTreeMap<String, Vec<CandidateList>>,
    run_type_values: Vec<SensorValue>,
}

impl DatasetLists {
    /// Splits raw values into per-sensor-type candidate lists. Values from
    /// columns the instrument does not assign are ignored. Two values at the
    /// same time in one column are rejected.
    pub fn build(
        instrument: &Instrument,
        values: Vec<SensorValue>,
    ) -> Result<Self, SensorValuesListError> {
        let mut by_column: HashMap<i64, Vec<SensorValue>> = HashMap::new();
        for value in values {
            by_column.entry(value.column_id()).or_default().push(value);
        }

        for (column_id, column) in by_column.iter_mut() {
            column.sort_by_key(SensorValue::time);
            if let Some(pair) = column.windows(2).find(|pair| pair[0].time() == pair[1].time()) {
                return Err(SensorValuesListError::DuplicateTime {
                    column_id: *column_id,
                    time: pair[1].time(),
                });
            }
        }

        let run_type_values = instrument
            .run_type_column()
            .and_then(|column_id| by_column.remove(&column_id))
            .unwrap_or_default();

        let mut lists = BTreeMap::new();
        for sensor_type in instrument.sensor_types() {
            let settings = instrument.list_settings(sensor_type);
            let candidates: Vec<CandidateList> = instrument
                .candidate_columns(&sensor_type.name)
                .into_iter()
                .map(|candidate| {
                    let values: Vec<SensorValue> = candidate
                        .columns
                        .iter()
                        .filter_map(|column_id| by_column.remove(column_id))
                        .flatten()
                        .collect();
                    CandidateList {
                        list: SensorValuesList::from_values(&candidate.columns, values, settings),
                        group: candidate.group,
                    }
                })
                .collect();
            lists.insert(sensor_type.name.clone(), candidates);
        }

        let ignored: usize = by_column.values().map(Vec::len).sum();
        if ignored > 0 {
            debug!(ignored, "ignored values from unassigned columns");
        }

        Ok(Self {
            lists,
            run_type_values,
        })
    }

    pub fn candidates(&self, sensor_type: &str) -> &[CandidateList] {
        self.lists
            .get(sensor_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn candidates_mut(&mut self, sensor_type: &str) -> &mut [CandidateList] {
        self.lists
            .get_mut(sensor_type)
            .map(Vec::as_mut_slice)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CandidateList)> {
        self.lists.iter().flat_map(|(sensor_type, candidates)| {
            candidates
                .iter()
                .map(move |candidate| (sensor_type.as_str(), candidate))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut CandidateList)> {
        self.lists.iter_mut().flat_map(|(sensor_type, candidates)| {
            candidates
                .iter_mut()
                .map(move |candidate| (sensor_type.as_str(), candidate))
        })
    }

    pub fn run_type_values(&self) -> &[SensorValue] {
        &self.run_type_values
    }

    /// Copies of the longitude and latitude series, if the instrument has them.
    pub fn position_lists(&self, instrument: &Instrument) -> PositionLists {
        let first = |axis: PositionAxis| {
            instrument
                .position_sensor_type(axis)
                .and_then(|sensor_type| self.candidates(&sensor_type.name).first())
                .map(|candidate| PositionList {
                    group: candidate.group.clone(),
                    list: candidate.list.clone(),
                })
        };
        PositionLists {
            longitude: first(PositionAxis::Longitude),
            latitude: first(PositionAxis::Latitude),
        }
    }

    /// Clears flushing and position flags from earlier runs. Returns the number
    /// of values reset.
    pub fn clear_derived_qc(&mut self) -> usize {
        self.iter_mut()
            .map(|(_, candidate)| {
                candidate
                    .list
                    .iter_mut()
                    .map(|value| value.clear_derived_qc())
                    .filter(|cleared| *cleared)
                    .count()
            })
            .sum()
    }

    /// Values changed since they were loaded.
    pub fn dirty_values(&self) -> Vec<SensorValue> {
        self.iter()
            .flat_map(|(_, candidate)| candidate.list.iter())
            .filter(|value| value.is_dirty())
            .cloned()
            .collect()
    }
}

/// Builds one [`Measurement`] per target time from a dataset's lists.
pub struct MeasurementAssembler<'a> {
    instrument: &'a Instrument,
    lists: &'a DatasetLists,
    positions: PositionLists,
    offsets: &'a SensorOffsets,
    calibrator: &'a dyn Calibrator,
}

impl<'a> MeasurementAssembler<'a> {
    pub fn new(
        instrument: &'a Instrument,
        lists: &'a DatasetLists,
        offsets: &'a SensorOffsets,
        calibrator: &'a dyn Calibrator,
    ) -> Self {
        Self {
            instrument,
            positions: lists.position_lists(instrument),
            lists,
            offsets,
            calibrator,
        }
    }

    /// Assembles every variable at `time`, which is read on the time-base clock.
    pub fn assemble(
        &self,
        dataset_id: i64,
        time: DateTime<Utc>,
        run_type: Option<String>,
    ) -> Result<Measurement, AssemblyError> {
        let base = self.instrument.time_base_group();
        let position = self.positions.position_at(time, base, self.offsets)?;

        let mut values = BTreeMap::new();
        for variable in self.instrument.variables() {
            let sensor_type = self.instrument.sensor_type(&variable.sensor_type).ok_or_else(|| {
                AssemblyError::UnknownSensorType {
                    variable: variable.name.clone(),
                    sensor_type: variable.sensor_type.clone(),
                }
            })?;
            let value = self.measurement_value(sensor_type, time, position.as_ref())?;
            values.insert(variable.name.clone(), value);
        }

        Ok(Measurement {
            id: None,
            dataset_id,
            time,
            run_type,
            values,
        })
    }

    fn measurement_value(
        &self,
        sensor_type: &SensorType,
        time: DateTime<Utc>,
        position: Option<&QcOutcome>,
    ) -> Result<MeasurementValue, AssemblyError> {
        let Some((local_time, found)) = self.find_value(&sensor_type.name, time)? else {
            return Ok(MeasurementValue::missing(sensor_type.id));
        };

        let (value, value_type) = if found.interpolated {
            let value = if sensor_type.calibrated {
                self.calibrator.calibrate(found.value, sensor_type, local_time)
            } else {
                found.value
            };
            (value, MeasurementValueType::Interpolated)
        } else if sensor_type.calibrated {
            (
                self.calibrator.calibrate(found.value, sensor_type, local_time),
                MeasurementValueType::Calibrated,
            )
        } else {
            (found.value, MeasurementValueType::Measured)
        };

        let qc = match position {
            Some(position) => found.qc.with_position_override(position),
            None => found.qc,
        };

        Ok(MeasurementValue {
            sensor_type_id: sensor_type.id,
            sources: found.sources,
            value: Some(value),
            value_type,
            qc_flag: qc.flag,
            qc_message: qc.message,
        })
    }

    /// First candidate list that yields a value, with the time on its clock.
    fn find_value(
        &self,
        sensor_type: &str,
        time: DateTime<Utc>,
    ) -> Result<Option<(DateTime<Utc>, ListValue)>, AssemblyError> {
        let base = self.instrument.time_base_group();
        for candidate in self.lists.candidates(sensor_type) {
            let local = self.offsets.get_offset_time(time, base, &candidate.group)?;
            if let Some(value) = candidate.list.value_at(local) {
                return Ok(Some((local, value)));
            }
        }
        Ok(None)
    }
}
