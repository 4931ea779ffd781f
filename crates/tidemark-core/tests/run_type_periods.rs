use chrono::{DateTime, Duration, TimeZone, Utc};
use tidemark_core::run_types::{RunTypeCategory, RunTypeClassifier, RunTypeError, RunTypePeriods};
use tidemark_core::sensor_value::SensorValue;
use tidemark_core::time_range::{TimeRange, END_OF_TIME};

fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
}

#[test]
fn alternating_run_types_produce_separate_periods() {
    let mut periods = RunTypePeriods::new();
    periods.add("A", at(0)).expect("add A");
    periods.add("B", at(10)).expect("add B");
    periods.add("A", at(20)).expect("add A again");

    assert_eq!(periods.len(), 3);
    let all = periods.periods();
    assert_eq!(all[0].run_type(), "A");
    assert_eq!(all[0].end(), at(10));
    assert_eq!(all[1].start(), at(10));
    assert_eq!(all[1].end(), at(20));
    assert_eq!(all[2].run_type(), "A");
    assert!(all[2].is_open());
}

#[test]
fn consecutive_identical_run_types_collapse() {
    let mut periods = RunTypePeriods::new();
    periods.add("EQU", at(0)).expect("add");
    periods.add("EQU", at(1)).expect("add");
    periods.add("STD1", at(2)).expect("add");

    assert_eq!(periods.len(), 2);
    assert_eq!(periods.periods()[0].end(), at(2));
}

#[test]
fn times_must_strictly_increase() {
    let mut periods = RunTypePeriods::new();
    periods.add("A", at(10)).expect("add");

    assert_eq!(
        periods.add("B", at(10)),
        Err(RunTypeError::NonMonotonic {
            run_type: "B".to_string(),
            previous: at(10),
            time: at(10),
        })
    );
    assert!(periods.add("B", at(5)).is_err());
    assert_eq!(periods.len(), 1);
}

#[test]
fn finished_periods_are_sealed() {
    let mut periods = RunTypePeriods::new();
    periods.add("A", at(0)).expect("add");
    periods.add("B", at(5)).expect("add");
    periods.finish();

    assert!(periods.is_finished());
    assert_eq!(periods.periods()[1].end(), END_OF_TIME);
    assert!(matches!(
        periods.add("C", at(10)),
        Err(RunTypeError::Finished { .. })
    ));
}

#[test]
fn lookup_by_time() {
    let mut periods = RunTypePeriods::new();
    periods.add("A", at(0)).expect("add");
    periods.add("B", at(5)).expect("add");

    assert_eq!(periods.run_type_at(at(-1)), None);
    assert_eq!(periods.run_type_at(at(0)), Some("A"));
    assert_eq!(periods.run_type_at(at(4)), Some("A"));
    assert_eq!(periods.run_type_at(at(5)), Some("B"));
    assert_eq!(periods.run_type_at(at(10_000)), Some("B"));
}

#[test]
fn built_from_a_run_type_column() {
    let values = vec![
        SensorValue::new(1, 99, at(0), Some("EQU")),
        SensorValue::new(1, 99, at(1), Some("  ")),
        SensorValue::new(1, 99, at(2), None),
        SensorValue::new(1, 99, at(3), Some("STD1")),
    ];
    let periods = RunTypePeriods::from_values(&values).expect("periods");

    assert!(periods.is_finished());
    assert_eq!(periods.len(), 2);
    assert_eq!(periods.run_type_at(at(2)), Some("EQU"));
}

#[test]
fn classifier_ignores_case_and_whitespace() {
    let mut classifier = RunTypeClassifier::new();
    classifier.insert("EQU", RunTypeCategory::Measurement);
    classifier.insert("std1", RunTypeCategory::Standard);

    assert_eq!(classifier.classify(" equ "), Ok(RunTypeCategory::Measurement));
    assert_eq!(classifier.classify("STD1"), Ok(RunTypeCategory::Standard));
    assert_eq!(
        classifier.classify("FILTER"),
        Err(RunTypeError::UnknownRunType("FILTER".to_string()))
    );
}
