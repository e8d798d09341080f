use std::path::PathBuf;

use anyhow::{Context, Result};

fn data_root() -> Result<PathBuf> {
    let base = dirs::data_dir().context("unable to resolve data directory")?;
    Ok(base.join("playtrack"))
}

pub fn database_file_path() -> Result<PathBuf> {
    Ok(data_root()?.join("playtrack.db"))
}

pub fn log_dir_path() -> Result<PathBuf> {
    Ok(data_root()?.join("logs"))
}
