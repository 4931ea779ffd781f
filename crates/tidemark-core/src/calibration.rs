use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::instrument::SensorType;

/// Converts raw readings of calibrated sensor types into calibrated values.
/// Curve fitting happens elsewhere; this only applies an existing calibration.
pub trait Calibrator {
    fn calibrate(&self, raw: f64, sensor_type: &SensorType, time: DateTime<Utc>) -> f64;
}

/// Identity calibration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCalibration;

impl Calibrator for NoCalibration {
    fn calibrate(&self, raw: f64, _sensor_type: &SensorType, _time: DateTime<Utc>) -> f64 {
        raw
    }
}

/// Polynomial calibration in force from `start`. Coefficients are in
/// ascending order: `c0 + c1*x + c2*x^2 + ...`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialCalibration {
    pub sensor_type: String,
    pub start: DateTime<Utc>,
    pub coefficients: Vec<f64>,
}

impl PolynomialCalibration {
    pub fn evaluate(&self, raw: f64) -> f64 {
        if self.coefficients.is_empty() {
            return raw;
        }
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, coefficient| acc * raw + coefficient)
    }
}

/// Calibrations keyed by sensor type name. The calibration in force at a time
/// is the latest one starting at or before it; readings taken before the first
/// calibration use the earliest one.
#[derive(Debug, Clone, Default)]
pub struct PolynomialCalibrations {
    by_sensor_type: BTreeMap<String, BTreeMap<DateTime<Utc>, PolynomialCalibration>>,
}

impl PolynomialCalibrations {
    pub fn new(calibrations: impl IntoIterator<Item = PolynomialCalibration>) -> Self {
        let mut by_sensor_type: BTreeMap<String, BTreeMap<_, _>> = BTreeMap::new();
        for calibration in calibrations {
            by_sensor_type
                .entry(calibration.sensor_type.clone())
                .or_default()
                .insert(calibration.start, calibration);
        }
        Self { by_sensor_type }
    }

    pub fn is_empty(&self) -> bool {
        self.by_sensor_type.is_empty()
    }

    pub fn covers(&self, sensor_type: &str) -> bool {
        self.by_sensor_type.contains_key(sensor_type)
    }

    pub fn in_force(&self, sensor_type: &str, time: DateTime<Utc>) -> Option<&PolynomialCalibration> {
        let calibrations = self.by_sensor_type.get(sensor_type)?;
        calibrations
            .range(..=time)
            .next_back()
            .or_else(|| calibrations.iter().next())
            .map(|(_, calibration)| calibration)
    }
}

impl Calibrator for PolynomialCalibrations {
    fn calibrate(&self, raw: f64, sensor_type: &SensorType, time: DateTime<Utc>) -> f64 {
        match self.in_force(&sensor_type.name, time) {
            Some(calibration) => calibration.evaluate(raw),
            None => raw,
        }
    }
}
