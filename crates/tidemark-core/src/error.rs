use thiserror::Error;

use crate::assembly::AssemblyError;
use crate::instrument::InstrumentError;
use crate::run_types::RunTypeError;
use crate::sensor_offsets::SensorOffsetsError;
use crate::sensor_values_list::SensorValuesListError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("instrument configuration error: {0}")]
    Instrument(#[from] InstrumentError),

    #[error("sensor offsets error: {0}")]
    Offsets(#[from] SensorOffsetsError),

    #[error("run type error: {0}")]
    RunTypes(#[from] RunTypeError),

    #[error("measurement assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("sensor values error: {0}")]
    SensorValues(#[from] SensorValuesListError),

    #[error("dataset store error: {0}")]
    Store(#[from] StoreError),

    #[error("processing of dataset {dataset_id} was cancelled after {completed} measurements")]
    Cancelled { dataset_id: i64, completed: usize },
}

pub type Result<T> = std::result::Result<T, ProcessingError>;
