use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::measurement::Measurement;
use crate::sensor_value::SensorValue;

const SENSOR_VALUES_FILE: &str = "sensor_values.json";
const MEASUREMENTS_FILE: &str = "measurements.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("dataset {0} not found")]
    DatasetNotFound(i64),
    #[error("dataset store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("dataset store document {path} is invalid: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Bulk persistence for one dataset at a time.
pub trait DatasetStore {
    fn load_sensor_values(&self, dataset_id: i64) -> Result<Vec<SensorValue>, StoreError>;

    /// Writes back QC changes to values that already exist. Returns the number
    /// of values updated.
    fn update_sensor_values(
        &mut self,
        dataset_id: i64,
        values: &[SensorValue],
    ) -> Result<usize, StoreError>;

    /// Replaces every stored measurement for the dataset.
    fn replace_measurements(
        &mut self,
        dataset_id: i64,
        measurements: &[Measurement],
    ) -> Result<(), StoreError>;

    fn load_measurements(&self, dataset_id: i64) -> Result<Vec<Measurement>, StoreError>;
}

/// Assigns ids to values that lack them, continuing from the highest id present.
fn assign_value_ids(values: &mut [SensorValue]) {
    let mut next = values.iter().filter_map(SensorValue::id).max().unwrap_or(0) + 1;
    for value in values.iter_mut().filter(|value| value.id().is_none()) {
        value.set_id(next);
        next += 1;
    }
}

/// Merges `updates` into `stored` by id, clearing the dirty marker.
fn merge_updates(stored: &mut [SensorValue], updates: &[SensorValue]) -> usize {
    let index: HashMap<i64, usize> = stored
        .iter()
        .enumerate()
        .filter_map(|(position, value)| value.id().map(|id| (id, position)))
        .collect();

    let mut updated = 0;
    for update in updates {
        let Some(position) = update.id().and_then(|id| index.get(&id)) else {
            continue;
        };
        let mut value = update.clone();
        value.clear_dirty();
        stored[*position] = value;
        updated += 1;
    }
    updated
}

fn numbered(measurements: &[Measurement]) -> Vec<Measurement> {
    measurements
        .iter()
        .zip(1..)
        .map(|(measurement, id)| Measurement {
            id: Some(id),
            ..measurement.clone()
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    sensor_values: BTreeMap<i64, Vec<SensorValue>>,
    measurements: BTreeMap<i64, Vec<Measurement>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds raw values to a dataset, assigning ids as a database would.
    pub fn insert_sensor_values(&mut self, dataset_id: i64, values: Vec<SensorValue>) {
        let stored = self.sensor_values.entry(dataset_id).or_default();
        stored.extend(values);
        assign_value_ids(stored);
        for value in stored.iter_mut() {
            value.clear_dirty();
        }
    }
}

impl DatasetStore for MemoryStore {
    fn load_sensor_values(&self, dataset_id: i64) -> Result<Vec<SensorValue>, StoreError> {
        self.sensor_values
            .get(&dataset_id)
            .cloned()
            .ok_or(StoreError::DatasetNotFound(dataset_id))
    }

    fn update_sensor_values(
        &mut self,
        dataset_id: i64,
        values: &[SensorValue],
    ) -> Result<usize, StoreError> {
        let stored = self
            .sensor_values
            .get_mut(&dataset_id)
            .ok_or(StoreError::DatasetNotFound(dataset_id))?;
        Ok(merge_updates(stored, values))
    }

    fn replace_measurements(
        &mut self,
        dataset_id: i64,
        measurements: &[Measurement],
    ) -> Result<(), StoreError> {
        self.measurements.insert(dataset_id, numbered(measurements));
        Ok(())
    }

    fn load_measurements(&self, dataset_id: i64) -> Result<Vec<Measurement>, StoreError> {
        Ok(self
            .measurements
            .get(&dataset_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Stores each dataset as JSON documents under `<root>/dataset-<id>/`.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dataset_dir(&self, dataset_id: i64) -> PathBuf {
        self.root.join(format!("dataset-{dataset_id}"))
    }

    /// Creates or extends a dataset from raw values, assigning missing ids.
    pub fn import_sensor_values(
        &self,
        dataset_id: i64,
        values: Vec<SensorValue>,
    ) -> Result<usize, StoreError> {
        let dir = self.dataset_dir(dataset_id);
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;

        let path = dir.join(SENSOR_VALUES_FILE);
        let mut stored: Vec<SensorValue> = if path.exists() {
            read_json(&path)?
        } else {
            Vec::new()
        };
        let imported = values.len();
        stored.extend(values);
        assign_value_ids(&mut stored);
        write_json(&path, &stored)?;

        info!(dataset_id, imported, total = stored.len(), "Imported sensor values");
        Ok(imported)
    }

    fn existing_file(&self, dataset_id: i64, name: &str) -> Result<PathBuf, StoreError> {
        let dir = self.dataset_dir(dataset_id);
        if !dir.is_dir() {
            return Err(StoreError::DatasetNotFound(dataset_id));
        }
        Ok(dir.join(name))
    }
}

impl DatasetStore for JsonDirStore {
    fn load_sensor_values(&self, dataset_id: i64) -> Result<Vec<SensorValue>, StoreError> {
        let path = self.existing_file(dataset_id, SENSOR_VALUES_FILE)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_json(&path)
    }

    fn update_sensor_values(
        &mut self,
        dataset_id: i64,
        values: &[SensorValue],
    ) -> Result<usize, StoreError> {
        if values.is_empty() {
            return Ok(0);
        }
        let path = self.existing_file(dataset_id, SENSOR_VALUES_FILE)?;
        let mut stored: Vec<SensorValue> = read_json(&path)?;
        let updated = merge_updates(&mut stored, values);
        write_json(&path, &stored)?;
        debug!(dataset_id, updated, "Wrote back sensor value QC");
        Ok(updated)
    }

    fn replace_measurements(
        &mut self,
        dataset_id: i64,
        measurements: &[Measurement],
    ) -> Result<(), StoreError> {
        let path = self.existing_file(dataset_id, MEASUREMENTS_FILE)?;
        write_json(&path, &numbered(measurements))
    }

    fn load_measurements(&self, dataset_id: i64) -> Result<Vec<Measurement>, StoreError> {
        let path = self.existing_file(dataset_id, MEASUREMENTS_FILE)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_json(&path)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes to a sibling temp file first so readers never see a partial document.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let temp = path.with_extension("json.tmp");
    fs::write(&temp, bytes).map_err(|source| StoreError::Io {
        path: temp.clone(),
        source,
    })?;
    fs::rename(&temp, path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}
