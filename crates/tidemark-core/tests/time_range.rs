use chrono::{DateTime, Duration, TimeZone, Utc};
use tidemark_core::time_range::{
    earliest_end, latest_start, overlap, SimpleTimeRange, TimeRange, TimeRangeError, END_OF_TIME,
};

fn hour(offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::hours(offset)
}

fn range(start: i64, end: i64) -> SimpleTimeRange {
    SimpleTimeRange::new(hour(start), hour(end)).expect("valid range")
}

#[test]
fn ranges_are_half_open() {
    let range = range(1, 3);
    assert!(range.contains(hour(1)));
    assert!(range.contains(hour(2)));
    assert!(!range.contains(hour(3)));
    assert_eq!(range.duration(), Duration::hours(2));
}

#[test]
fn end_may_not_precede_start() {
    assert_eq!(
        SimpleTimeRange::new(hour(3), hour(1)),
        Err(TimeRangeError::EndBeforeStart {
            start: hour(3),
            end: hour(1)
        })
    );
    assert!(SimpleTimeRange::new(hour(1), hour(1)).is_ok());
}

#[test]
fn common_window_applies_the_buffer() {
    let ranges = vec![range(0, 10), range(2, 8), range(1, 12)];

    assert_eq!(latest_start(&ranges, Duration::zero()), Some(hour(2)));
    assert_eq!(earliest_end(&ranges, Duration::zero()), Some(hour(8)));
    assert_eq!(
        latest_start(&ranges, Duration::minutes(30)),
        Some(hour(2) + Duration::minutes(30))
    );

    let window = overlap(&ranges, Duration::hours(1)).expect("overlap");
    assert_eq!(window.start(), hour(3));
    assert_eq!(window.end(), hour(7));

    assert!(overlap(&ranges, Duration::hours(3)).is_none());
    assert!(overlap::<SimpleTimeRange>(&[], Duration::zero()).is_none());
}

#[test]
fn buffers_saturate_at_the_end_of_time() {
    let open = SimpleTimeRange::new(hour(0), END_OF_TIME).expect("open range");
    assert_eq!(latest_start([&open], Duration::zero()), Some(hour(0)));
    assert_eq!(
        latest_start(
            [&SimpleTimeRange::new(END_OF_TIME, END_OF_TIME).expect("point")],
            Duration::hours(1)
        ),
        Some(END_OF_TIME)
    );
}
