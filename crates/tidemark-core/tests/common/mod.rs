#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use tidemark_core::flags::Flag;
use tidemark_core::instrument::Instrument;
use tidemark_core::sensor_value::SensorValue;

pub const DATASET: i64 = 1;

pub const UNDERWAY: &str = r#"
[instrument]
name = "underway-co2"
continuous_limit_seconds = 75
flushing_seconds = 60
run_type_column = 9
core_sensor_type = "xco2"

[[sensor_types]]
id = 1
name = "longitude"
units = "degrees_east"
position = "longitude"

[[sensor_types]]
id = 2
name = "latitude"
units = "degrees_north"
position = "latitude"

[[sensor_types]]
id = 3
name = "xco2"
units = "umol/mol"
required = true

[[sensor_types]]
id = 4
name = "sst"
units = "degC"

[sensor_types.range_check]
questionable = { min = -2.0, max = 35.0 }
bad = { min = -5.0, max = 40.0 }

[[sensor_types]]
id = 5
name = "pressure"
units = "hPa"

[[assignments]]
column_id = 1
sensor_type = "longitude"

[[assignments]]
column_id = 2
sensor_type = "latitude"

[[assignments]]
column_id = 3
sensor_type = "xco2"

[[assignments]]
column_id = 4
sensor_type = "sst"

[[assignments]]
column_id = 5
sensor_type = "pressure"

[[run_types]]
name = "EQU"
category = "measurement"

[[run_types]]
name = "STD1"
category = "standard"
"#;

pub fn minute(offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap() + Duration::minutes(offset)
}

pub fn instrument() -> Instrument {
    Instrument::from_toml_str(UNDERWAY).expect("valid manifest")
}

fn value(column_id: i64, offset: i64, text: &str) -> SensorValue {
    SensorValue::new(DATASET, column_id, minute(offset), Some(text))
}

/// Ten minutes of underway data. The run type is EQU from minute 0, STD1 from
/// minute 5 and EQU again from minute 7. The latitude fix at minute 3 is bad
/// and the sea temperature at minute 3 is out of its questionable range.
/// Pressure is assigned but never reported.
pub fn underway_values() -> Vec<SensorValue> {
    let mut values = Vec::new();
    for offset in 0..10 {
        values.push(value(1, offset, "-30.0"));

        let mut latitude = value(2, offset, "45.0");
        if offset == 3 {
            latitude.set_user_qc(Flag::Bad, "GPS fix lost");
        }
        values.push(latitude);

        values.push(value(3, offset, &format!("{}", 400 + offset)));
        values.push(value(4, offset, if offset == 3 { "37.0" } else { "20.0" }));
    }
    values.push(value(9, 0, "EQU"));
    values.push(value(9, 5, "STD1"));
    values.push(value(9, 7, "EQU"));

    for (index, value) in values.iter_mut().enumerate() {
        value.set_id(index as i64 + 1);
    }
    values
}
