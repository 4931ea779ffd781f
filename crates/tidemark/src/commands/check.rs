use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use comfy_table::Table;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Instrument manifest (defaults to TIDEMARK_INSTRUMENT)
    #[arg(long)]
    instrument: Option<PathBuf>,
}

pub fn handle_check(args: CheckArgs) -> Result<()> {
    let instrument = super::load_instrument(args.instrument)?;

    let mut sensor_types = Table::new();
    sensor_types.set_header(vec!["Id", "Sensor type", "Units", "Columns", "Groups", "Required", "Calibrated"]);
    for sensor_type in instrument.sensor_types() {
        let candidates = instrument.candidate_columns(&sensor_type.name);
        let columns: Vec<String> = candidates
            .iter()
            .flat_map(|candidate| candidate.columns.iter().map(i64::to_string))
            .collect();
        let groups: Vec<&str> = candidates
            .iter()
            .map(|candidate| candidate.group.as_str())
            .collect();
        sensor_types.add_row(vec![
            sensor_type.id.to_string(),
            sensor_type.name.clone(),
            sensor_type.units.clone().unwrap_or_default(),
            columns.join(", "),
            groups.join(", "),
            sensor_type.required.to_string(),
            sensor_type.calibrated.to_string(),
        ]);
    }
    println!("{sensor_types}");

    let mut groups = Table::new();
    groups.set_header(vec!["Group", "Parent", "Columns"]);
    for group in instrument.groups().iter() {
        let columns: Vec<String> = group.columns.iter().map(i64::to_string).collect();
        groups.add_row(vec![
            group.name.clone(),
            group.parent.clone().unwrap_or_else(|| "-".to_string()),
            columns.join(", "),
        ]);
    }
    println!("{groups}");

    println!(
        "Instrument '{}' is valid; {} variables, time base group '{}'",
        instrument.name(),
        instrument.variables().len(),
        instrument.time_base_group()
    );
    Ok(())
}
