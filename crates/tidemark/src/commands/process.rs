use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::Table;
use tidemark_core::outputs::{measurements_to_dataframe, write_parquet};
use tidemark_core::processor::{CancelFlag, DatasetProcessor, ProcessingRun};
use tidemark_core::store::JsonDirStore;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Dataset to process
    #[arg(long)]
    dataset: i64,
    /// Instrument manifest (defaults to TIDEMARK_INSTRUMENT)
    #[arg(long)]
    instrument: Option<PathBuf>,
    /// Dataset store directory (defaults to TIDEMARK_DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Offsets document (defaults to <data-dir>/offsets.json)
    #[arg(long)]
    offsets: Option<PathBuf>,
    /// Also export the measurements as parquet
    #[arg(long)]
    parquet: Option<PathBuf>,
}

pub async fn handle_process(args: ProcessArgs) -> Result<()> {
    let instrument = super::load_instrument(args.instrument)?;
    let data_dir = super::data_dir(args.data_dir)?;
    let offsets_path = args
        .offsets
        .unwrap_or_else(|| super::default_offsets_path(&data_dir));
    let offsets = super::load_offsets(&offsets_path, &instrument)?;

    let variables: Vec<String> = instrument
        .variables()
        .iter()
        .map(|variable| variable.name.clone())
        .collect();
    let processor = DatasetProcessor::new(instrument, offsets)?;

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling after the current measurement");
            on_signal.cancel();
        }
    });

    let dataset_id = args.dataset;
    let run = tokio::task::spawn_blocking(move || {
        let mut store = JsonDirStore::new(data_dir);
        processor.run_with_store(&mut store, dataset_id, &cancel)
    })
    .await
    .context("processing task panicked")?
    .with_context(|| format!("failed to process dataset {dataset_id}"))?;

    print_summary(&run);

    if let Some(path) = args.parquet {
        let names: Vec<&str> = variables.iter().map(String::as_str).collect();
        let df = measurements_to_dataframe(&run.measurements, &names)
            .context("failed to build measurement dataframe")?;
        write_parquet(&df, &path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(rows = df.height(), path = %path.display(), "Wrote measurement parquet");
    }

    Ok(())
}

fn print_summary(run: &ProcessingRun) {
    let summary = &run.summary;
    let mut table = Table::new();
    table.set_header(vec!["Dataset", "Run", "Values", "Measurements", "Missing", "Flushing", "Position QC"]);
    table.add_row(vec![
        run.dataset_id.to_string(),
        run.run_id.to_string(),
        summary.sensor_values.to_string(),
        summary.measurements.to_string(),
        summary.missing_values.to_string(),
        summary.flushing.to_string(),
        summary.position_overrides.to_string(),
    ]);
    println!("{table}");

    if !summary.flags.is_empty() {
        let mut flags = Table::new();
        flags.set_header(vec!["Flag", "Measurements"]);
        for (flag, count) in &summary.flags {
            flags.add_row(vec![flag.clone(), count.to_string()]);
        }
        println!("{flags}");
    }
}
