// src/config/loader.rs

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::model::ClusterOptions;
use crate::config::validate::validate;

/// Load cluster options from a TOML file.
///
/// This only performs deserialization; it does **not** run cross-field
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<ClusterOptions> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading options file at {:?}", path))?;

    let opts: ClusterOptions = toml::from_str(&contents)
        .with_context(|| format!("parsing TOML options from {:?}", path))?;

    Ok(opts)
}

/// Load cluster options from a TOML file and run validation.
///
/// This is the recommended entry point when options come from disk rather
/// than code; unspecified keys fall back to the defaults.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ClusterOptions> {
    let opts = load_from_path(&path)?;
    validate(&opts)?;
    Ok(opts)
}
