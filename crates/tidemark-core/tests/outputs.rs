mod common;

use common::{instrument, underway_values, DATASET};
use polars::prelude::*;
use tidemark_core::outputs::{measurements_to_dataframe, write_parquet};
use tidemark_core::processor::{CancelFlag, DatasetProcessor};
use tidemark_core::sensor_offsets::SensorOffsets;

#[test]
fn measurements_flatten_to_one_row_each() -> PolarsResult<()> {
    let instrument = instrument();
    let offsets = SensorOffsets::new(instrument.groups().clone());
    let processor = DatasetProcessor::new(instrument, offsets).expect("processor");
    let run = processor
        .run(DATASET, underway_values(), &CancelFlag::new())
        .expect("run");

    let df = measurements_to_dataframe(&run.measurements, &["xco2", "sst"]).expect("dataframe");
    assert_eq!(df.height(), run.measurements.len());
    assert_eq!(df.width(), 5 + 2 * 3);

    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    for expected in ["time", "run_type", "qc_flag", "xco2", "xco2_flag", "xco2_type", "sst_type"] {
        assert!(names.iter().any(|name| name == expected), "missing column {expected}");
    }

    assert!(matches!(
        df.column("time")?.dtype(),
        DataType::Datetime(TimeUnit::Microseconds, _)
    ));

    let xco2 = df.column("xco2")?.f64()?;
    assert_eq!(xco2.get(0), Some(401.0));

    let flags = df.column("qc_flag")?.str()?;
    assert!(flags.into_iter().any(|flag| flag == Some("BAD")));
    Ok(())
}

#[test]
fn unknown_variables_become_null_columns() -> PolarsResult<()> {
    let instrument = instrument();
    let offsets = SensorOffsets::new(instrument.groups().clone());
    let processor = DatasetProcessor::new(instrument, offsets).expect("processor");
    let run = processor
        .run(DATASET, underway_values(), &CancelFlag::new())
        .expect("run");

    let df = measurements_to_dataframe(&run.measurements, &["salinity"]).expect("dataframe");
    assert_eq!(df.column("salinity")?.null_count(), df.height());
    Ok(())
}

#[test]
fn parquet_export_writes_a_file() {
    let df = measurements_to_dataframe(&[], &["xco2"]).expect("empty dataframe");
    assert_eq!(df.height(), 0);

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("measurements.parquet");
    write_parquet(&df, &path).expect("write parquet");
    assert!(path.exists());
}
