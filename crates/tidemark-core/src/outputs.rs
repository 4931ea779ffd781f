use std::fs::File;
use std::path::Path;

use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::*;
use thiserror::Error;

use crate::measurement::{Measurement, MeasurementValue};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error("failed to create output file: {0}")]
    Io(#[from] std::io::Error),
}

/// One row per measurement: time, dataset, run type, overall QC, then a value,
/// flag and value-type column for each variable in `variables` order.
pub fn measurements_to_dataframe(
    measurements: &[Measurement],
    variables: &[&str],
) -> Result<DataFrame, OutputError> {
    let time = Series::new(
        "time".into(),
        measurements
            .iter()
            .map(|measurement| measurement.time.timestamp_micros())
            .collect::<Vec<i64>>(),
    )
    .cast(&DataType::Datetime(
        TimeUnit::Microseconds,
        Some(polars::prelude::TimeZone::UTC),
    ))?;

    let overall: Vec<_> = measurements.iter().map(Measurement::overall_qc).collect();

    let mut columns: Vec<Column> = vec![
        time.into(),
        Series::new(
            "dataset_id".into(),
            measurements.iter().map(|m| m.dataset_id).collect::<Vec<i64>>(),
        )
        .into(),
        Series::new(
            "run_type".into(),
            measurements
                .iter()
                .map(|m| m.run_type.as_deref())
                .collect::<Vec<Option<&str>>>(),
        )
        .into(),
        Series::new(
            "qc_flag".into(),
            overall.iter().map(|qc| qc.flag.as_str()).collect::<Vec<&str>>(),
        )
        .into(),
        Series::new(
            "qc_message".into(),
            overall
                .iter()
                .map(|qc| qc.message.as_str())
                .collect::<Vec<&str>>(),
        )
        .into(),
    ];

    for variable in variables {
        let values: Vec<Option<&MeasurementValue>> = measurements
            .iter()
            .map(|measurement| measurement.value(variable))
            .collect();

        columns.push(
            Series::new(
                (*variable).into(),
                values
                    .iter()
                    .map(|value| value.and_then(|value| value.value))
                    .collect::<Vec<Option<f64>>>(),
            )
            .into(),
        );
        columns.push(
            Series::new(
                format!("{variable}_flag").into(),
                values
                    .iter()
                    .map(|value| value.map(|value| value.qc_flag.code()))
                    .collect::<Vec<Option<i32>>>(),
            )
            .into(),
        );
        columns.push(
            Series::new(
                format!("{variable}_type").into(),
                values
                    .iter()
                    .map(|value| value.map(|value| value.value_type.as_str()))
                    .collect::<Vec<Option<&str>>>(),
            )
            .into(),
        );
    }

    Ok(DataFrame::new(columns)?)
}

pub fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), OutputError> {
    let mut file = File::create(path)?;
    let mut clone = df.clone();
    ParquetWriter::new(&mut file)
        .with_compression(ParquetCompression::Zstd(None))
        .with_statistics(StatisticsOptions::default())
        .finish(&mut clone)?;
    Ok(())
}
