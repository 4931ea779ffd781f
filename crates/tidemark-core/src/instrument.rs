use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::calibration::{PolynomialCalibration, PolynomialCalibrations};
use crate::quality::RangeCheck;
use crate::run_types::{RunTypeCategory, RunTypeClassifier};
use crate::sensor_offsets::{SensorGroup, SensorGroups, SensorOffsetsError};
use crate::sensor_values_list::{ListSettings, DEFAULT_CONTINUOUS_LIMIT_SECONDS};

/// Group used when a manifest declares no sensor groups.
pub const DEFAULT_GROUP: &str = "default";

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("failed to read instrument manifest {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid instrument manifest: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("sensor type '{0}' is defined more than once")]
    DuplicateSensorType(String),
    #[error("unknown sensor type '{0}'")]
    UnknownSensorType(String),
    #[error("column {0} is assigned more than once")]
    DuplicateAssignment(i64),
    #[error("variable '{0}' is defined more than once")]
    DuplicateVariable(String),
    #[error("required sensor type '{0}' has no assigned columns")]
    UnassignedRequiredSensorType(String),
    #[error("more than one sensor type provides {0:?}")]
    DuplicatePosition(PositionAxis),
    #[error("column {0} is not in any sensor group")]
    UngroupedColumn(i64),
    #[error("core sensor type '{0}' is not defined")]
    MissingCoreSensorType(String),
    #[error(transparent)]
    Groups(#[from] SensorOffsetsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionAxis {
    Longitude,
    Latitude,
}

/// Raw TOML document, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentManifest {
    pub instrument: InstrumentSettings,
    #[serde(default)]
    pub sensor_types: Vec<SensorType>,
    #[serde(default)]
    pub assignments: Vec<SensorAssignment>,
    #[serde(default)]
    pub variables: Vec<VariableDefinition>,
    #[serde(default)]
    pub groups: Vec<SensorGroup>,
    #[serde(default)]
    pub run_types: Vec<RunTypeDefinition>,
    #[serde(default)]
    pub calibrations: Vec<PolynomialCalibration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSettings {
    pub name: String,
    #[serde(default = "default_continuous_limit")]
    pub continuous_limit_seconds: i64,
    #[serde(default)]
    pub max_interpolation_gap_seconds: Option<i64>,
    #[serde(default)]
    pub flushing_seconds: i64,
    #[serde(default)]
    pub trim_to_common_coverage: bool,
    #[serde(default)]
    pub run_type_column: Option<i64>,
    pub core_sensor_type: String,
    #[serde(default)]
    pub time_base_group: Option<String>,
}

/// Manifest seconds as a duration, saturating instead of overflowing.
fn seconds(value: i64) -> Duration {
    Duration::try_seconds(value).unwrap_or(if value < 0 { Duration::MIN } else { Duration::MAX })
}

fn default_continuous_limit() -> i64 {
    DEFAULT_CONTINUOUS_LIMIT_SECONDS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorType {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub calibrated: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub position: Option<PositionAxis>,
    /// Overrides the instrument-wide interpolation gap for this type.
    #[serde(default)]
    pub max_interpolation_gap_seconds: Option<i64>,
    #[serde(default)]
    pub range_check: Option<RangeCheck>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorAssignment {
    pub column_id: i64,
    pub sensor_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub name: String,
    pub sensor_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTypeDefinition {
    pub name: String,
    pub category: RunTypeCategory,
}

/// Columns of one sensor type that share a clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateColumns {
    pub group: String,
    pub columns: Vec<i64>,
}

/// A validated instrument configuration.
#[derive(Debug, Clone)]
pub struct Instrument {
    settings: InstrumentSettings,
    sensor_types: Vec<SensorType>,
    assignments: Vec<SensorAssignment>,
    variables: Vec<VariableDefinition>,
    groups: SensorGroups,
    time_base_group: String,
    classifier: RunTypeClassifier,
    calibrations: PolynomialCalibrations,
}

impl Instrument {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, InstrumentError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| InstrumentError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, InstrumentError> {
        let manifest: InstrumentManifest = toml::from_str(text)?;
        Self::from_manifest(manifest)
    }

    pub fn from_manifest(manifest: InstrumentManifest) -> Result<Self, InstrumentError> {
        let InstrumentManifest {
            instrument: settings,
            sensor_types,
            assignments,
            mut variables,
            groups,
            run_types,
            calibrations,
        } = manifest;

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        let mut axes = HashSet::new();
        for sensor_type in &sensor_types {
            if !ids.insert(sensor_type.id) || !names.insert(sensor_type.name.as_str()) {
                return Err(InstrumentError::DuplicateSensorType(sensor_type.name.clone()));
            }
            if let Some(axis) = sensor_type.position {
                if !axes.insert(axis) {
                    return Err(InstrumentError::DuplicatePosition(axis));
                }
            }
        }

        let known = |name: &str| -> Result<(), InstrumentError> {
            if names.contains(name) {
                Ok(())
            } else {
                Err(InstrumentError::UnknownSensorType(name.to_string()))
            }
        };

        if !names.contains(settings.core_sensor_type.as_str()) {
            return Err(InstrumentError::MissingCoreSensorType(
                settings.core_sensor_type.clone(),
            ));
        }

        let mut assigned_columns = HashSet::new();
        for assignment in &assignments {
            known(&assignment.sensor_type)?;
            if !assigned_columns.insert(assignment.column_id) {
                return Err(InstrumentError::DuplicateAssignment(assignment.column_id));
            }
        }

        for sensor_type in &sensor_types {
            let needed = sensor_type.required || sensor_type.name == settings.core_sensor_type;
            let assigned = assignments
                .iter()
                .any(|assignment| assignment.sensor_type == sensor_type.name);
            if needed && !assigned {
                return Err(InstrumentError::UnassignedRequiredSensorType(
                    sensor_type.name.clone(),
                ));
            }
        }

        if variables.is_empty() {
            variables = sensor_types
                .iter()
                .filter(|sensor_type| sensor_type.position.is_none())
                .map(|sensor_type| VariableDefinition {
                    name: sensor_type.name.clone(),
                    sensor_type: sensor_type.name.clone(),
                })
                .collect();
        }
        let mut variable_names = HashSet::new();
        for variable in &variables {
            known(&variable.sensor_type)?;
            if !variable_names.insert(variable.name.as_str()) {
                return Err(InstrumentError::DuplicateVariable(variable.name.clone()));
            }
        }

        for calibration in &calibrations {
            known(&calibration.sensor_type)?;
        }

        let mut all_columns: BTreeSet<i64> = assigned_columns.iter().copied().collect();
        all_columns.extend(settings.run_type_column);

        let groups = if groups.is_empty() {
            debug!(instrument = %settings.name, "no sensor groups configured; using a single default group");
            let mut default = SensorGroups::new();
            default.add_group(SensorGroup {
                name: DEFAULT_GROUP.to_string(),
                parent: None,
                columns: all_columns.clone(),
            })?;
            default
        } else {
            SensorGroups::from_definitions(groups)?
        };

        if let Some(column_id) = all_columns
            .iter()
            .find(|column_id| groups.group_for_column(**column_id).is_none())
        {
            return Err(InstrumentError::UngroupedColumn(*column_id));
        }

        let time_base_group = match &settings.time_base_group {
            Some(name) if groups.contains(name) => name.clone(),
            Some(name) => return Err(SensorOffsetsError::UnknownGroup(name.clone()).into()),
            None => groups
                .root()
                .map(|root| root.name.clone())
                .unwrap_or_else(|| DEFAULT_GROUP.to_string()),
        };

        let mut classifier = RunTypeClassifier::new();
        for run_type in &run_types {
            classifier.insert(&run_type.name, run_type.category);
        }

        Ok(Self {
            settings,
            sensor_types,
            assignments,
            variables,
            groups,
            time_base_group,
            classifier,
            calibrations: PolynomialCalibrations::new(calibrations),
        })
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &InstrumentSettings {
        &self.settings
    }

    pub fn sensor_types(&self) -> &[SensorType] {
        &self.sensor_types
    }

    pub fn sensor_type(&self, name: &str) -> Option<&SensorType> {
        self.sensor_types
            .iter()
            .find(|sensor_type| sensor_type.name == name)
    }

    pub fn sensor_type_by_id(&self, id: i64) -> Option<&SensorType> {
        self.sensor_types.iter().find(|sensor_type| sensor_type.id == id)
    }

    pub fn core_sensor_type(&self) -> Result<&SensorType, InstrumentError> {
        self.sensor_type(&self.settings.core_sensor_type)
            .ok_or_else(|| InstrumentError::MissingCoreSensorType(self.settings.core_sensor_type.clone()))
    }

    pub fn position_sensor_type(&self, axis: PositionAxis) -> Option<&SensorType> {
        self.sensor_types
            .iter()
            .find(|sensor_type| sensor_type.position == Some(axis))
    }

    pub fn assignments(&self) -> &[SensorAssignment] {
        &self.assignments
    }

    /// Columns assigned to `sensor_type`, in assignment order.
    pub fn columns_for(&self, sensor_type: &str) -> Vec<i64> {
        self.assignments
            .iter()
            .filter(|assignment| assignment.sensor_type == sensor_type)
            .map(|assignment| assignment.column_id)
            .collect()
    }

    /// Columns of `sensor_type` split by sensor group, groups ordered by their
    /// first assigned column.
    pub fn candidate_columns(&self, sensor_type: &str) -> Vec<CandidateColumns> {
        let mut candidates: Vec<CandidateColumns> = Vec::new();
        for column_id in self.columns_for(sensor_type) {
            let group = self.group_name_for_column(column_id);
            match candidates.iter_mut().find(|candidate| candidate.group == group) {
                Some(candidate) => candidate.columns.push(column_id),
                None => candidates.push(CandidateColumns {
                    group: group.to_string(),
                    columns: vec![column_id],
                }),
            }
        }
        candidates
    }

    pub fn variables(&self) -> &[VariableDefinition] {
        &self.variables
    }

    pub fn groups(&self) -> &SensorGroups {
        &self.groups
    }

    /// Group whose clock measurement times are expressed in.
    pub fn time_base_group(&self) -> &str {
        &self.time_base_group
    }

    pub fn group_name_for_column(&self, column_id: i64) -> &str {
        self.groups
            .group_for_column(column_id)
            .map(|group| group.name.as_str())
            .unwrap_or(self.time_base_group.as_str())
    }

    pub fn run_type_column(&self) -> Option<i64> {
        self.settings.run_type_column
    }

    pub fn classifier(&self) -> &RunTypeClassifier {
        &self.classifier
    }

    pub fn calibrations(&self) -> &PolynomialCalibrations {
        &self.calibrations
    }

    pub fn flushing(&self) -> Duration {
        seconds(self.settings.flushing_seconds.max(0))
    }

    pub fn list_settings(&self, sensor_type: &SensorType) -> ListSettings {
        ListSettings {
            continuous_limit: seconds(self.settings.continuous_limit_seconds),
            max_interpolation_gap: sensor_type
                .max_interpolation_gap_seconds
                .or(self.settings.max_interpolation_gap_seconds)
                .map(seconds),
        }
    }

    /// Range-check routines keyed by sensor type name.
    pub fn range_checks(&self) -> HashMap<&str, &RangeCheck> {
        self.sensor_types
            .iter()
            .filter_map(|sensor_type| {
                sensor_type
                    .range_check
                    .as_ref()
                    .map(|check| (sensor_type.name.as_str(), check))
            })
            .collect()
    }
}
