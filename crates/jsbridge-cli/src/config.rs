//! Configuration file parsing for jsbridge.toml.

use anyhow::Context;
use jsbridge_core::SessionConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CONFIG_NAMES: &[&str] = &["jsbridge.toml", ".jsbridge.toml"];

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Handle table and disposal settings for every session the CLI creates
    #[serde(default)]
    pub session: SessionConfig,

    /// Run command defaults
    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunConfig {
    /// Script timeout in milliseconds, used when `--timeout-ms` is absent
    pub timeout_ms: Option<u64>,
}

/// Load configuration from an explicit path, or search for `jsbridge.toml`
/// from the current directory upwards.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => parse_file(path),
        None => match std::env::current_dir().ok().as_deref().and_then(find_config_file) {
            Some(path) => parse_file(&path),
            None => Ok(Config::default()),
        },
    }
}

fn parse_file(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Search `start` and its ancestors for a config file
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.session, SessionConfig::default());
        assert_eq!(config.run.timeout_ms, None);
    }

    #[test]
    fn test_parse_session_table() {
        let toml = r#"
[session]
initial_handle_capacity = 16
idle_collect_on_growth = false

[run]
timeout_ms = 250
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.session.initial_handle_capacity, 16);
        assert!(!config.session.idle_collect_on_growth);
        // unspecified keys keep their defaults
        assert_eq!(config.session.initial_string_capacity, 1000);
        assert_eq!(config.session.drain_per_safe_point, 1);
        assert_eq!(config.run.timeout_ms, Some(250));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[session]\nduck_typed_type_descriptors = false\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert!(!config.session.duck_typed_type_descriptors);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jsbridge.toml");
        std::fs::write(&path, "[session\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_find_config_in_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("jsbridge.toml"), "").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("jsbridge.toml"));
    }
}
