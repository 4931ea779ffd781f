pub mod assembly;
pub mod calibration;
pub mod error;
pub mod flags;
pub mod instrument;
pub mod measurement;
pub mod outputs;
pub mod processor;
pub mod quality;
pub mod run_types;
pub mod sensor_offsets;
pub mod sensor_value;
pub mod sensor_values_list;
pub mod store;
pub mod time_range;

pub use error::{ProcessingError, Result};
pub use flags::{combine, Flag, QcOutcome};
pub use instrument::Instrument;
pub use measurement::{Measurement, MeasurementValue, MeasurementValueType};
pub use processor::{CancelFlag, DatasetProcessor, ProcessingRun};
pub use sensor_offsets::{SensorGroupPair, SensorOffsets};
pub use sensor_value::{AutoQcResult, QcSource, RoutineFlag, SensorValue};
pub use sensor_values_list::{SearchableSensorValuesList, SensorValuesList};
