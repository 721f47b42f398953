use anyhow::Context;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Env var pointing to config file, used when no explicit path is given
pub const CONFIG_ENV_VAR: &str = "INVOKER_CONFIG";

/// Returns config path: `explicit` if given, otherwise value of `INVOKER_CONFIG`.
pub fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from),
    }
}

pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_yaml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

/// Loads config from `explicit` or `INVOKER_CONFIG`, falling back to `T::default()`
pub fn load_cfg_data<T: DeserializeOwned + Default>(explicit: Option<&Path>) -> anyhow::Result<T> {
    match find_config_file(explicit) {
        Some(path) => load_yaml(&path),
        None => Ok(T::default()),
    }
}
