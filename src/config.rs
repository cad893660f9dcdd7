//! Runtime settings.
//!
//! Settings resolve in three layers: built-in defaults, an optional TOML file, and environment
//! overrides. Unknown keys in the file are rejected.

use crate::hotspot::HotspotScope;
use crate::numbering::CdrScheme;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variables that override file settings.
pub const ENV_STORAGE_ROOT: &str = "STORAGE_ROOT";
pub const ENV_TASK_STATE_DIR: &str = "TASK_STATE_DIR";
pub const ENV_CONTAINER_RUNTIME: &str = "CONTAINER_RUNTIME";
pub const ENV_TOOL_TIMEOUT_SECS: &str = "TOOL_TIMEOUT_SECS";
pub const ENV_TOOL_MAX_ATTEMPTS: &str = "TOOL_MAX_ATTEMPTS";
pub const ENV_NUMBERING_COMMAND: &str = "NUMBERING_COMMAND";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value '{value}' for {variable}: {reason}")]
    Env {
        variable: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Settings {
    /// Root under which every job gets its own directory.
    pub storage_root: PathBuf,
    /// Directory holding one JSON record per task.
    pub task_store_dir: PathBuf,
    pub container_runtime: String,
    pub default_timeout_secs: u64,
    pub default_max_attempts: u32,
    /// Request GPUs for container runs.
    pub gpus: bool,
    pub hotspot_scope: HotspotScope,
    /// External antibody numbering program and its arguments. Scaffold CDRs are not annotated
    /// when empty.
    pub numbering_command: Vec<String>,
    pub numbering_scheme: CdrScheme,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("storage"),
            task_store_dir: PathBuf::from("storage/tasks"),
            container_runtime: "docker".to_string(),
            default_timeout_secs: 3600,
            default_max_attempts: 2,
            gpus: true,
            hotspot_scope: HotspotScope::Protein,
            numbering_command: Vec::new(),
            numbering_scheme: CdrScheme::Chothia,
        }
    }
}

impl Settings {
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, SettingsError> {
        toml::from_str(content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.with_env(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_STORAGE_ROOT) {
            self.storage_root = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_TASK_STATE_DIR) {
            self.task_store_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_CONTAINER_RUNTIME) {
            self.container_runtime = value;
        }
        if let Some(value) = lookup(ENV_TOOL_TIMEOUT_SECS) {
            self.default_timeout_secs = parse_positive(ENV_TOOL_TIMEOUT_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_TOOL_MAX_ATTEMPTS) {
            self.default_max_attempts = parse_positive(ENV_TOOL_MAX_ATTEMPTS, &value)?;
        }
        if let Some(value) = lookup(ENV_NUMBERING_COMMAND) {
            self.numbering_command = value.split_whitespace().map(String::from).collect();
        }
        Ok(self)
    }
}

fn parse_positive<T>(variable: &str, value: &str) -> Result<T, SettingsError>
where
    T: std::str::FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let env_error = |reason: String| SettingsError::Env {
        variable: variable.to_string(),
        value: value.to_string(),
        reason,
    };
    let parsed: T = value.trim().parse().map_err(|e: T::Err| env_error(e.to_string()))?;
    if parsed == T::default() {
        return Err(env_error("must be greater than zero".to_string()));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn from_toml_str_fills_missing_keys_with_defaults() {
        let settings = Settings::from_toml_str(
            "storage_root = \"/data/jobs\"\ngpus = false\nhotspot_scope = \"all\"\n",
            Path::new("epiforge.toml"),
        )
        .unwrap();

        assert_eq!(settings.storage_root, PathBuf::from("/data/jobs"));
        assert!(!settings.gpus);
        assert_eq!(settings.hotspot_scope, HotspotScope::All);
        assert_eq!(settings.container_runtime, "docker");
        assert_eq!(settings.default_max_attempts, 2);
        assert!(settings.numbering_command.is_empty());
        assert_eq!(settings.numbering_scheme, CdrScheme::Chothia);
    }

    #[test]
    fn numbering_settings_come_from_file_and_environment() {
        let settings = Settings::from_toml_str(
            "numbering_command = [\"anarci-json\", \"--chain\", \"H\"]\nnumbering_scheme = \"imgt\"\n",
            Path::new("epiforge.toml"),
        )
        .unwrap();
        assert_eq!(settings.numbering_command, vec!["anarci-json", "--chain", "H"]);
        assert_eq!(settings.numbering_scheme, CdrScheme::Imgt);

        let settings = settings
            .with_env(|name| (name == ENV_NUMBERING_COMMAND).then(|| "number-vhh  --fast".to_string()))
            .unwrap();
        assert_eq!(settings.numbering_command, vec!["number-vhh", "--fast"]);
    }

    #[test]
    fn from_toml_str_rejects_unknown_keys() {
        let err = Settings::from_toml_str("storage = \"x\"\n", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn with_env_overrides_file_values() {
        let env = HashMap::from([
            (ENV_STORAGE_ROOT, "/scratch"),
            (ENV_CONTAINER_RUNTIME, "podman"),
            (ENV_TOOL_TIMEOUT_SECS, "120"),
        ]);
        let settings = Settings::default()
            .with_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.storage_root, PathBuf::from("/scratch"));
        assert_eq!(settings.container_runtime, "podman");
        assert_eq!(settings.default_timeout_secs, 120);
        assert_eq!(settings.task_store_dir, PathBuf::from("storage/tasks"));
    }

    #[test]
    fn with_env_rejects_zero_and_garbage_numbers() {
        let zero = Settings::default().with_env(|name| {
            (name == ENV_TOOL_MAX_ATTEMPTS).then(|| "0".to_string())
        });
        assert!(matches!(zero, Err(SettingsError::Env { .. })));

        let garbage = Settings::default().with_env(|name| {
            (name == ENV_TOOL_TIMEOUT_SECS).then(|| "soon".to_string())
        });
        assert!(matches!(garbage, Err(SettingsError::Env { .. })));
    }
}
