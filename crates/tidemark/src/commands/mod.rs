use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tidemark_core::instrument::Instrument;
use tidemark_core::sensor_offsets::SensorOffsets;
use tracing::info;

pub mod check;
pub mod import;
pub mod offsets;
pub mod process;

const INSTRUMENT_VAR: &str = "TIDEMARK_INSTRUMENT";
const DATA_DIR_VAR: &str = "TIDEMARK_DATA_DIR";
const OFFSETS_FILE: &str = "offsets.json";

pub fn instrument_path(arg: Option<PathBuf>) -> Result<PathBuf> {
    match arg {
        Some(path) => Ok(path),
        None => env::var(INSTRUMENT_VAR)
            .map(PathBuf::from)
            .with_context(|| format!("--instrument or {INSTRUMENT_VAR} must be set")),
    }
}

pub fn data_dir(arg: Option<PathBuf>) -> Result<PathBuf> {
    match arg {
        Some(path) => Ok(path),
        None => env::var(DATA_DIR_VAR)
            .map(PathBuf::from)
            .with_context(|| format!("--data-dir or {DATA_DIR_VAR} must be set")),
    }
}

pub fn load_instrument(arg: Option<PathBuf>) -> Result<Instrument> {
    let path = instrument_path(arg)?;
    let instrument = Instrument::load(&path)
        .with_context(|| format!("failed to load instrument manifest {}", path.display()))?;
    info!(instrument = instrument.name(), path = %path.display(), "Loaded instrument manifest");
    Ok(instrument)
}

pub fn default_offsets_path(data_dir: &Path) -> PathBuf {
    data_dir.join(OFFSETS_FILE)
}

/// Reads an offsets document, or starts an empty one over the instrument's
/// groups when the file does not exist yet.
pub fn load_offsets(path: &Path, instrument: &Instrument) -> Result<SensorOffsets> {
    if !path.exists() {
        return Ok(SensorOffsets::new(instrument.groups().clone()));
    }
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read offsets document {}", path.display()))?;
    SensorOffsets::from_json(&json)
        .with_context(|| format!("invalid offsets document {}", path.display()))
}
