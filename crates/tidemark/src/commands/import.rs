use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tidemark_core::store::JsonDirStore;
use tidemark_core::SensorValue;
use tracing::info;

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Dataset to import into
    #[arg(long)]
    dataset: i64,
    /// JSON file holding an array of sensor values
    #[arg(short, long)]
    file: PathBuf,
    /// Dataset store directory (defaults to TIDEMARK_DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

pub fn handle_import(args: ImportArgs) -> Result<()> {
    let data_dir = super::data_dir(args.data_dir)?;
    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let file_hash = blake3::hash(&bytes).to_hex().to_string();

    let values: Vec<SensorValue> = serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not a sensor value array", args.file.display()))?;
    if let Some(value) = values.iter().find(|value| value.dataset_id() != args.dataset) {
        anyhow::bail!(
            "value at {} belongs to dataset {}, not {}",
            value.time(),
            value.dataset_id(),
            args.dataset
        );
    }

    let store = JsonDirStore::new(data_dir);
    let imported = store.import_sensor_values(args.dataset, values)?;
    info!(dataset_id = args.dataset, imported, file_hash = %file_hash, "Import complete");
    println!("Imported {imported} values into dataset {} ({file_hash})", args.dataset);
    Ok(())
}
