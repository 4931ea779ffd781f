use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use comfy_table::Table;
use tidemark_core::sensor_offsets::{SensorGroupPair, SensorOffsets};
use tracing::info;

#[derive(Args, Debug)]
pub struct OffsetsLocation {
    /// Instrument manifest (defaults to TIDEMARK_INSTRUMENT)
    #[arg(long)]
    instrument: Option<PathBuf>,
    /// Offsets document (defaults to <data-dir>/offsets.json)
    #[arg(long)]
    offsets: Option<PathBuf>,
    /// Dataset store directory (defaults to TIDEMARK_DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct Breakpoint {
    /// Parent group of the pair
    #[arg(long)]
    base: String,
    /// Child group of the pair
    #[arg(long)]
    target: String,
    /// Breakpoint time on the base group's clock (RFC 3339)
    #[arg(long)]
    time: DateTime<Utc>,
}

#[derive(Subcommand, Debug)]
pub enum OffsetsCommands {
    /// List every group pair and its breakpoints
    Show {
        #[command(flatten)]
        location: OffsetsLocation,
    },
    /// Add a breakpoint to a group pair
    Add {
        #[command(flatten)]
        location: OffsetsLocation,
        #[command(flatten)]
        breakpoint: Breakpoint,
        /// Milliseconds the target clock runs ahead of the base clock
        #[arg(long, allow_hyphen_values = true)]
        millis: i64,
    },
    /// Remove a breakpoint from a group pair
    Remove {
        #[command(flatten)]
        location: OffsetsLocation,
        #[command(flatten)]
        breakpoint: Breakpoint,
    },
}

pub fn handle_offsets_command(command: OffsetsCommands) -> Result<()> {
    match command {
        OffsetsCommands::Show { location } => {
            let (_, offsets) = open(location)?;
            print_offsets(&offsets);
            Ok(())
        }
        OffsetsCommands::Add {
            location,
            breakpoint,
            millis,
        } => {
            let (path, mut offsets) = open(location)?;
            let pair = SensorGroupPair::new(breakpoint.base, breakpoint.target);
            offsets
                .add_offset(&pair, breakpoint.time, millis)
                .with_context(|| format!("failed to add offset to {pair}"))?;
            save(&path, &offsets)?;
            info!(%pair, time = %breakpoint.time, millis, "Added sensor offset");
            print_offsets(&offsets);
            Ok(())
        }
        OffsetsCommands::Remove {
            location,
            breakpoint,
        } => {
            let (path, mut offsets) = open(location)?;
            let pair = SensorGroupPair::new(breakpoint.base, breakpoint.target);
            let removed = offsets
                .remove_offset(&pair, breakpoint.time)
                .with_context(|| format!("failed to remove offset from {pair}"))?;
            save(&path, &offsets)?;
            info!(%pair, time = %removed.time, millis = removed.offset_millis, "Removed sensor offset");
            print_offsets(&offsets);
            Ok(())
        }
    }
}

fn open(location: OffsetsLocation) -> Result<(PathBuf, SensorOffsets)> {
    let instrument = super::load_instrument(location.instrument)?;
    let path = match location.offsets {
        Some(path) => path,
        None => super::default_offsets_path(&super::data_dir(location.data_dir)?),
    };
    let offsets = super::load_offsets(&path, &instrument)?;
    Ok((path, offsets))
}

fn save(path: &Path, offsets: &SensorOffsets) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, offsets.to_json()?)
        .with_context(|| format!("failed to write offsets document {}", path.display()))
}

fn print_offsets(offsets: &SensorOffsets) {
    let mut table = Table::new();
    table.set_header(vec!["Base", "Target", "Time", "Offset (ms)"]);
    for pair in offsets.groups().pairs() {
        let breakpoints = offsets.offsets(&pair);
        if breakpoints.is_empty() {
            table.add_row(vec![pair.base.clone(), pair.target.clone(), "-".to_string(), "0".to_string()]);
        }
        for breakpoint in breakpoints {
            table.add_row(vec![
                pair.base.clone(),
                pair.target.clone(),
                breakpoint.time.to_rfc3339(),
                breakpoint.offset_millis.to_string(),
            ]);
        }
    }
    println!("{table}");
}
