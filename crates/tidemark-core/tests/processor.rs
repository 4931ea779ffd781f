mod common;

use std::collections::BTreeSet;

use chrono::Duration;
use common::{instrument, minute, underway_values, DATASET, UNDERWAY};
use tidemark_core::flags::Flag;
use tidemark_core::instrument::Instrument;
use tidemark_core::measurement::MeasurementValueType;
use tidemark_core::processor::{CancelFlag, DatasetProcessor};
use tidemark_core::sensor_offsets::{
    SensorGroup, SensorGroupPair, SensorGroups, SensorOffsets, SensorOffsetsError,
};
use tidemark_core::sensor_value::{QcSource, SensorValue};
use tidemark_core::ProcessingError;

fn processor() -> DatasetProcessor {
    let instrument = instrument();
    let offsets = SensorOffsets::new(instrument.groups().clone());
    DatasetProcessor::new(instrument, offsets).expect("processor")
}

#[test]
fn measurements_are_located_on_usable_measurement_run_types() {
    let run = processor()
        .run(DATASET, underway_values(), &CancelFlag::new())
        .expect("run");

    let times: Vec<_> = run.measurements.iter().map(|m| m.time).collect();
    assert_eq!(
        times,
        vec![minute(1), minute(2), minute(3), minute(4), minute(8), minute(9)]
    );
    assert!(run
        .measurements
        .iter()
        .all(|m| m.run_type.as_deref() == Some("EQU")));
    assert_eq!(run.summary.measurements, 6);
    assert!(run.summary.flushing > 0);
}

#[test]
fn values_carry_provenance_and_type() {
    let run = processor()
        .run(DATASET, underway_values(), &CancelFlag::new())
        .expect("run");

    let first = &run.measurements[0];
    let xco2 = first.value("xco2").expect("xco2 value");
    assert_eq!(xco2.value, Some(401.0));
    assert_eq!(xco2.value_type, MeasurementValueType::Measured);
    assert_eq!(xco2.qc_flag, Flag::AssumedGood);
    assert_eq!(xco2.sensor_type_id, 3);
    assert_eq!(xco2.sources.len(), 1);

    assert!(first.value("longitude").is_none());
}

#[test]
fn unreported_sensor_types_are_missing() {
    let run = processor()
        .run(DATASET, underway_values(), &CancelFlag::new())
        .expect("run");

    for measurement in &run.measurements {
        let pressure = measurement.value("pressure").expect("pressure slot");
        assert_eq!(pressure.value_type, MeasurementValueType::Missing);
        assert_eq!(pressure.value, None);
        assert_eq!(pressure.qc_flag, Flag::NoQc);
    }
    assert_eq!(run.summary.missing_values, 6);
}

#[test]
fn bad_position_overrides_good_sensor_values() {
    let run = processor()
        .run(DATASET, underway_values(), &CancelFlag::new())
        .expect("run");

    let at_three = run
        .measurements
        .iter()
        .find(|m| m.time == minute(3))
        .expect("measurement at minute 3");
    let xco2 = at_three.value("xco2").expect("xco2");
    assert_eq!(xco2.qc_flag, Flag::Bad);
    assert_eq!(xco2.qc_message, "Position QC: GPS fix lost");
    assert_eq!(at_three.overall_qc().flag, Flag::Bad);

    let at_two = run
        .measurements
        .iter()
        .find(|m| m.time == minute(2))
        .expect("measurement at minute 2");
    assert!(at_two.overall_qc().flag.is_good());
}

#[test]
fn bad_position_replaces_questionable_messages() {
    let run = processor()
        .run(DATASET, underway_values(), &CancelFlag::new())
        .expect("run");

    let sst = run
        .measurements
        .iter()
        .find(|m| m.time == minute(3))
        .and_then(|m| m.value("sst"))
        .expect("sst at minute 3");
    assert_eq!(sst.qc_flag, Flag::Bad);
    assert_eq!(sst.qc_message, "Position QC: GPS fix lost");
    assert!(!sst.qc_message.contains("Out of range"));
}

#[test]
fn qc_changes_are_reported_for_write_back() {
    let run = processor()
        .run(DATASET, underway_values(), &CancelFlag::new())
        .expect("run");

    let sst = run
        .updated_values
        .iter()
        .find(|v| v.column_id() == 4 && v.time() == minute(3))
        .expect("sst value updated");
    assert_eq!(sst.user_qc_flag(), Flag::Bad);
    assert_eq!(sst.qc_source(), QcSource::Position);
    assert!(!sst.has_user_override());
    assert!(!sst.auto_qc().is_empty());

    let flushed = run
        .updated_values
        .iter()
        .filter(|v| v.user_qc_flag() == Flag::Flushing)
        .count();
    assert_eq!(flushed, run.summary.flushing);
}

#[test]
fn reruns_are_idempotent() {
    let processor = processor();
    let first = processor
        .run(DATASET, underway_values(), &CancelFlag::new())
        .expect("first run");
    let second = processor
        .run(DATASET, underway_values(), &CancelFlag::new())
        .expect("second run");
    assert_eq!(first.measurements, second.measurements);
    assert_ne!(first.run_id, second.run_id);

    // Feeding the written-back values through again changes nothing.
    let mut updated: Vec<SensorValue> = underway_values();
    for value in &first.updated_values {
        if let Some(slot) = updated.iter_mut().find(|v| v.id() == value.id()) {
            *slot = value.clone();
        }
    }
    let third = processor
        .run(DATASET, updated, &CancelFlag::new())
        .expect("third run");
    assert_eq!(first.measurements, third.measurements);
}

fn merged(updates: &[SensorValue]) -> Vec<SensorValue> {
    let mut values = underway_values();
    for update in updates {
        if let Some(slot) = values.iter_mut().find(|v| v.id() == update.id()) {
            *slot = update.clone();
        }
    }
    values
}

#[test]
fn shorter_flushing_windows_release_earlier_flags() {
    let first = processor()
        .run(DATASET, underway_values(), &CancelFlag::new())
        .expect("first run");
    assert!(first.summary.flushing > 0);

    let manifest = UNDERWAY.replace("flushing_seconds = 60", "flushing_seconds = 0");
    let instrument = Instrument::from_toml_str(&manifest).expect("manifest");
    let offsets = SensorOffsets::new(instrument.groups().clone());
    let second = DatasetProcessor::new(instrument, offsets)
        .expect("processor")
        .run(DATASET, merged(&first.updated_values), &CancelFlag::new())
        .expect("second run");

    assert_eq!(second.summary.flushing, 0);
    assert!(second
        .updated_values
        .iter()
        .all(|v| v.user_qc_flag() != Flag::Flushing));
    let times: Vec<_> = second.measurements.iter().map(|m| m.time).collect();
    assert_eq!(
        times,
        vec![
            minute(0),
            minute(1),
            minute(2),
            minute(3),
            minute(4),
            minute(7),
            minute(8),
            minute(9)
        ]
    );
}

#[test]
fn human_flags_survive_flushing_and_position_passes() {
    let mut values = underway_values();
    for value in values.iter_mut() {
        let reviewed = (value.column_id() == 3 && value.time() == minute(3))
            || (value.column_id() == 4 && value.time() == minute(0));
        if reviewed {
            value.set_user_qc(Flag::Good, "checked by hand");
        }
    }

    let run = processor()
        .run(DATASET, values, &CancelFlag::new())
        .expect("run");
    let reviewed = |column_id: i64, offset: i64| {
        run.updated_values
            .iter()
            .find(|v| v.column_id() == column_id && v.time() == minute(offset))
            .map(|v| (v.user_qc_flag(), v.qc_source()))
    };
    assert_eq!(reviewed(3, 3), Some((Flag::Good, QcSource::User)));
    assert_eq!(reviewed(4, 0), Some((Flag::Good, QcSource::User)));

    let xco2 = run
        .measurements
        .iter()
        .find(|m| m.time == minute(3))
        .and_then(|m| m.value("xco2"))
        .expect("xco2 at minute 3");
    assert_eq!(xco2.qc_flag, Flag::Bad);
    assert_eq!(xco2.qc_message, "Position QC: GPS fix lost");
}

#[test]
fn cancelled_runs_yield_nothing() {
    let cancel = CancelFlag::new();
    cancel.cancel();

    let err = processor()
        .run(DATASET, underway_values(), &cancel)
        .expect_err("cancelled");
    assert!(matches!(
        err,
        ProcessingError::Cancelled {
            dataset_id: DATASET,
            completed: 0
        }
    ));
}

#[test]
fn duplicate_times_in_a_column_abort_the_run() {
    let mut values = underway_values();
    values.push(SensorValue::new(DATASET, 9, minute(5), Some("EQU")));

    let err = processor()
        .run(DATASET, values, &CancelFlag::new())
        .expect_err("duplicate run type time");
    assert!(matches!(err, ProcessingError::SensorValues(_)));
}

#[test]
fn unknown_run_types_abort_the_run() {
    let mut values = underway_values();
    values.push(SensorValue::new(DATASET, 9, minute(8), Some("FILTER")));

    let err = processor()
        .run(DATASET, values, &CancelFlag::new())
        .expect_err("unknown run type");
    assert!(matches!(err, ProcessingError::RunTypes(_)));
}

const SPLIT_CLOCKS: &str = r#"
[instrument]
name = "two-loggers"
core_sensor_type = "xco2"

[[sensor_types]]
id = 1
name = "longitude"
position = "longitude"

[[sensor_types]]
id = 2
name = "latitude"
position = "latitude"

[[sensor_types]]
id = 3
name = "xco2"
calibrated = true

[[assignments]]
column_id = 1
sensor_type = "longitude"

[[assignments]]
column_id = 2
sensor_type = "latitude"

[[assignments]]
column_id = 3
sensor_type = "xco2"

[[groups]]
name = "gps"
columns = [1, 2]

[[groups]]
name = "co2"
parent = "gps"
columns = [3]

[[calibrations]]
sensor_type = "xco2"
start = "2024-01-01T00:00:00Z"
coefficients = [1.0, 2.0]
"#;

#[test]
fn offsets_and_calibration_are_applied() {
    let instrument = Instrument::from_toml_str(SPLIT_CLOCKS).expect("manifest");
    let mut offsets = SensorOffsets::new(instrument.groups().clone());
    offsets
        .add_offset(&SensorGroupPair::new("gps", "co2"), minute(0), 60_000)
        .expect("offset");
    let processor = DatasetProcessor::new(instrument, offsets).expect("processor");

    let mut values = Vec::new();
    for offset in 0..10 {
        values.push(SensorValue::new(DATASET, 1, minute(offset), Some("-30.0")));
        values.push(SensorValue::new(DATASET, 2, minute(offset), Some("45.0")));
        values.push(SensorValue::new(
            DATASET,
            3,
            minute(offset + 1),
            Some(&format!("{}", 400 + offset)),
        ));
    }

    let run = processor
        .run(DATASET, values, &CancelFlag::new())
        .expect("run");
    assert_eq!(run.measurements.len(), 10);

    let first = &run.measurements[0];
    assert_eq!(first.time, minute(0));
    assert_eq!(first.run_type, None);
    let xco2 = first.value("xco2").expect("xco2");
    assert_eq!(xco2.value_type, MeasurementValueType::Calibrated);
    assert_eq!(xco2.value, Some(1.0 + 2.0 * 400.0));
}

#[test]
fn processors_reject_offsets_for_other_instruments() {
    let instrument = Instrument::from_toml_str(SPLIT_CLOCKS).expect("manifest");
    let err = DatasetProcessor::new(instrument, SensorOffsets::default())
        .err()
        .expect("missing groups");
    assert!(matches!(err, ProcessingError::Offsets(_)));
}

#[test]
fn processors_reject_offsets_with_a_different_group_tree() {
    let instrument = Instrument::from_toml_str(SPLIT_CLOCKS).expect("manifest");
    let inverted = SensorGroups::from_definitions([
        SensorGroup {
            name: "co2".to_string(),
            parent: None,
            columns: BTreeSet::from([3]),
        },
        SensorGroup {
            name: "gps".to_string(),
            parent: Some("co2".to_string()),
            columns: BTreeSet::from([1, 2]),
        },
    ])
    .expect("group tree");

    let err = DatasetProcessor::new(instrument, SensorOffsets::new(inverted))
        .err()
        .expect("parent mismatch");
    assert!(matches!(
        err,
        ProcessingError::Offsets(SensorOffsetsError::ParentMismatch { ref group, .. }) if group == "gps"
    ));
}

/// Sea temperature is logged twice: on the hull logger, whose clock runs 30 s
/// ahead of the bridge, and on the bridge logger itself.
const TWO_SST_LOGGERS: &str = r#"
[instrument]
name = "twin-sst"
core_sensor_type = "xco2"

[[sensor_types]]
id = 1
name = "xco2"

[[sensor_types]]
id = 2
name = "sst"
max_interpolation_gap_seconds = 90

[[assignments]]
column_id = 1
sensor_type = "xco2"

[[assignments]]
column_id = 2
sensor_type = "sst"

[[assignments]]
column_id = 3
sensor_type = "sst"

[[groups]]
name = "bridge"
columns = [1, 3]

[[groups]]
name = "hull"
parent = "bridge"
columns = [2]
"#;

#[test]
fn later_groups_fill_gaps_in_earlier_ones() {
    let instrument = Instrument::from_toml_str(TWO_SST_LOGGERS).expect("manifest");
    let mut offsets = SensorOffsets::new(instrument.groups().clone());
    offsets
        .add_offset(&SensorGroupPair::new("bridge", "hull"), minute(0), 30_000)
        .expect("offset");
    let processor = DatasetProcessor::new(instrument, offsets).expect("processor");

    let mut values = Vec::new();
    for offset in 0..6 {
        values.push(SensorValue::new(DATASET, 1, minute(offset), Some("400")));
        values.push(SensorValue::new(
            DATASET,
            3,
            minute(offset),
            Some(&format!("{}", 10 + offset)),
        ));
        if offset != 3 {
            values.push(SensorValue::new(
                DATASET,
                2,
                minute(offset) + Duration::seconds(30),
                Some(&format!("{}", 20 + offset)),
            ));
        }
    }
    for (index, value) in values.iter_mut().enumerate() {
        value.set_id(index as i64 + 1);
    }
    let bridge_at_three = values
        .iter()
        .find(|v| v.column_id() == 3 && v.time() == minute(3))
        .and_then(SensorValue::id)
        .expect("bridge id");

    let run = processor
        .run(DATASET, values, &CancelFlag::new())
        .expect("run");
    assert_eq!(run.measurements.len(), 6);

    let sst_at = |offset: i64| {
        run.measurements
            .iter()
            .find(|m| m.time == minute(offset))
            .and_then(|m| m.value("sst"))
            .cloned()
            .expect("sst slot")
    };

    let hull = sst_at(2);
    assert_eq!(hull.value, Some(22.0));
    assert_eq!(hull.value_type, MeasurementValueType::Measured);

    let bridge = sst_at(3);
    assert_eq!(bridge.value, Some(13.0));
    assert_eq!(bridge.value_type, MeasurementValueType::Measured);
    assert_eq!(bridge.sources, vec![bridge_at_three]);
}
