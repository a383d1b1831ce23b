use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use flareauth::AuthConfig;

/// File read when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "flareauth.toml";

/// Loads the configuration file (if present) with environment overrides,
/// e.g. `FLAREAUTH__SERVICE_ACCOUNT__EMAIL=...`, then validates it.
pub fn load_config(path: Option<&Path>) -> Result<AuthConfig> {
    let mut builder = Config::builder();
    match path {
        Some(p) => {
            anyhow::ensure!(p.exists(), "config file {} does not exist", p.display());
            builder = builder.add_source(File::from(p.to_path_buf()));
        }
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path));
            }
        }
    }
    builder = builder.add_source(
        Environment::with_prefix("FLAREAUTH")
            .try_parsing(true)
            .separator("__"),
    );

    let merged: AuthConfig = builder
        .build()
        .context("config build error")?
        .try_deserialize()
        .context("config deserialize error")?;

    merged.validate().context("invalid configuration")?;
    Ok(merged)
}
