use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flags::{combine_outcomes, Flag, QcOutcome};

/// How a measurement value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementValueType {
    Measured,
    Interpolated,
    Calibrated,
    Missing,
}

impl MeasurementValueType {
    pub fn code(&self) -> char {
        match self {
            MeasurementValueType::Measured => 'M',
            MeasurementValueType::Interpolated => 'I',
            MeasurementValueType::Calibrated => 'C',
            MeasurementValueType::Missing => 'X',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementValueType::Measured => "measured",
            MeasurementValueType::Interpolated => "interpolated",
            MeasurementValueType::Calibrated => "calibrated",
            MeasurementValueType::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementValue {
    pub sensor_type_id: i64,
    /// Ids of the sensor values that contributed.
    pub sources: Vec<i64>,
    pub value: Option<f64>,
    pub value_type: MeasurementValueType,
    pub qc_flag: Flag,
    pub qc_message: String,
}

impl MeasurementValue {
    pub fn missing(sensor_type_id: i64) -> Self {
        Self {
            sensor_type_id,
            sources: Vec::new(),
            value: None,
            value_type: MeasurementValueType::Missing,
            qc_flag: Flag::NoQc,
            qc_message: String::new(),
        }
    }

    pub fn is_missing(&self) -> bool {
        self.value_type == MeasurementValueType::Missing
    }

    pub fn qc(&self) -> QcOutcome {
        QcOutcome::new(self.qc_flag, self.qc_message.clone())
    }
}

/// All variable values assembled for one target time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(default)]
    pub id: Option<i64>,
    pub dataset_id: i64,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub run_type: Option<String>,
    pub values: BTreeMap<String, MeasurementValue>,
}

impl Measurement {
    pub fn value(&self, variable: &str) -> Option<&MeasurementValue> {
        self.values.get(variable)
    }

    /// Worst flag across the measurement's values.
    pub fn overall_qc(&self) -> QcOutcome {
        let outcomes: Vec<QcOutcome> = self.values.values().map(MeasurementValue::qc).collect();
        combine_outcomes(outcomes.iter())
    }
}
