mod common;

use common::{instrument, minute, underway_values, DATASET};
use tidemark_core::flags::Flag;
use tidemark_core::processor::{CancelFlag, DatasetProcessor};
use tidemark_core::sensor_offsets::SensorOffsets;
use tidemark_core::sensor_value::{QcSource, SensorValue};
use tidemark_core::store::{DatasetStore, JsonDirStore, MemoryStore, StoreError};

fn processor() -> DatasetProcessor {
    let instrument = instrument();
    let offsets = SensorOffsets::new(instrument.groups().clone());
    DatasetProcessor::new(instrument, offsets).expect("processor")
}

fn unsaved_values() -> Vec<SensorValue> {
    underway_values()
        .into_iter()
        .map(|value| {
            let mut fresh = SensorValue::new(
                value.dataset_id(),
                value.column_id(),
                value.time(),
                value.value(),
            );
            if value.has_user_override() {
                fresh.set_user_qc(value.user_qc_flag(), value.user_qc_message());
            }
            fresh
        })
        .collect()
}

#[test]
fn memory_store_commits_a_run() {
    let mut store = MemoryStore::new();
    store.insert_sensor_values(DATASET, underway_values());

    let run = processor()
        .run_with_store(&mut store, DATASET, &CancelFlag::new())
        .expect("run");

    let stored = store.load_measurements(DATASET).expect("measurements");
    assert_eq!(stored.len(), run.measurements.len());
    assert_eq!(stored[0].id, Some(1));
    assert_eq!(stored.last().and_then(|m| m.id), Some(stored.len() as i64));

    let values = store.load_sensor_values(DATASET).expect("values");
    let flushed = values
        .iter()
        .filter(|value| value.user_qc_flag() == Flag::Flushing)
        .count();
    assert_eq!(flushed, run.summary.flushing);
    assert!(values.iter().all(|value| !value.is_dirty()));
}

#[test]
fn memory_store_assigns_ids() {
    let mut store = MemoryStore::new();
    store.insert_sensor_values(DATASET, unsaved_values());

    let values = store.load_sensor_values(DATASET).expect("values");
    assert!(values.iter().all(|value| value.id().is_some()));
    let mut ids: Vec<i64> = values.iter().filter_map(SensorValue::id).collect();
    ids.dedup();
    assert_eq!(ids.len(), values.len());
}

#[test]
fn missing_datasets_are_reported() {
    let store = MemoryStore::new();
    assert!(matches!(
        store.load_sensor_values(42),
        Err(StoreError::DatasetNotFound(42))
    ));

    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonDirStore::new(dir.path());
    assert!(matches!(
        store.load_sensor_values(42),
        Err(StoreError::DatasetNotFound(42))
    ));
}

#[test]
fn json_store_round_trips_a_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = JsonDirStore::new(dir.path());

    let imported = store
        .import_sensor_values(DATASET, unsaved_values())
        .expect("import");
    assert_eq!(imported, underway_values().len());

    let run = processor()
        .run_with_store(&mut store, DATASET, &CancelFlag::new())
        .expect("run");

    let measurements = store.load_measurements(DATASET).expect("measurements");
    assert_eq!(measurements.len(), run.measurements.len());
    assert_eq!(measurements[0].time, run.measurements[0].time);
    assert_eq!(measurements[0].values, run.measurements[0].values);

    let values = store.load_sensor_values(DATASET).expect("values");
    assert!(values
        .iter()
        .any(|value| value.user_qc_message() == "Position QC: GPS fix lost"));

    assert!(store.dataset_dir(DATASET).join("sensor_values.json").exists());
    assert!(!store.dataset_dir(DATASET).join("sensor_values.json.tmp").exists());
}

#[test]
fn json_store_rerun_replaces_measurements() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = JsonDirStore::new(dir.path());
    store
        .import_sensor_values(DATASET, unsaved_values())
        .expect("import");

    let processor = processor();
    let first = processor
        .run_with_store(&mut store, DATASET, &CancelFlag::new())
        .expect("first run");
    let second = processor
        .run_with_store(&mut store, DATASET, &CancelFlag::new())
        .expect("second run");

    assert_eq!(first.measurements, second.measurements);
    let stored = store.load_measurements(DATASET).expect("measurements");
    assert_eq!(stored.len(), second.measurements.len());
}

#[test]
fn corrected_positions_clear_stored_position_flags() {
    let mut store = MemoryStore::new();
    store.insert_sensor_values(DATASET, underway_values());
    let processor = processor();
    processor
        .run_with_store(&mut store, DATASET, &CancelFlag::new())
        .expect("first run");

    let find = |values: &[SensorValue], column_id: i64| {
        values
            .iter()
            .find(|v| v.column_id() == column_id && v.time() == minute(3))
            .cloned()
            .expect("value at minute 3")
    };

    let stored = store.load_sensor_values(DATASET).expect("values");
    let xco2 = find(stored.as_slice(), 3);
    assert_eq!(xco2.user_qc_flag(), Flag::Bad);
    assert_eq!(xco2.qc_source(), QcSource::Position);

    let mut latitude = find(stored.as_slice(), 2);
    latitude.set_user_qc(Flag::Good, "fix confirmed");
    store
        .update_sensor_values(DATASET, &[latitude])
        .expect("review latitude");

    let run = processor
        .run_with_store(&mut store, DATASET, &CancelFlag::new())
        .expect("second run");

    let measured = run
        .measurements
        .iter()
        .find(|m| m.time == minute(3))
        .and_then(|m| m.value("xco2"))
        .expect("xco2 measurement");
    assert_eq!(measured.qc_flag, Flag::AssumedGood);
    assert!(measured.qc_message.is_empty());

    let stored = store.load_sensor_values(DATASET).expect("values");
    let xco2 = find(stored.as_slice(), 3);
    assert_eq!(xco2.user_qc_flag(), Flag::AssumedGood);
    assert_eq!(xco2.qc_source(), QcSource::Auto);

    let sst = find(stored.as_slice(), 4);
    assert_eq!(sst.user_qc_flag(), Flag::Questionable);
    assert_eq!(sst.user_qc_message(), "Out of range (-2 to 35)");
}
