//! Settings for codewise.
//!
//! Loaded from YAML; every field has a default so an empty file (or no
//! file at all) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::analysis::DEFAULT_USAGE_CAP;
use crate::walk::DEFAULT_CACHE_DIR_NAME;

/// Config file names searched for in the current directory.
pub const DEFAULT_CONFIG_NAMES: &[&str] = &["codewise.yaml", ".codewise.yaml"];

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub reviewer: ReviewerConfig,
    /// Maximum usage examples sent per definition.
    pub usage_cap: usize,
    /// Fixed sampling seed for reproducible runs.
    pub sample_seed: Option<u64>,
    /// Cache directory. Relative paths are resolved against the analyzed root.
    pub cache_dir: PathBuf,
    pub use_cache: bool,
    /// Glob patterns for root-relative paths to skip (e.g. "build/**").
    pub excluded_paths: Vec<String>,
    /// Capacity of the orchestrator's event channel.
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reviewer: ReviewerConfig::default(),
            usage_cap: DEFAULT_USAGE_CAP,
            sample_seed: None,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR_NAME),
            use_cache: true,
            excluded_paths: Vec::new(),
            channel_capacity: 32,
        }
    }
}

/// Chat-completions endpoint settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReviewerConfig {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the bearer token. `None` disables auth.
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
}

impl Default for ReviewerConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            timeout_secs: 120,
            max_tokens: 2048,
            system_prompt: None,
        }
    }
}

impl Config {
    /// Parse a config from a YAML file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::parse_str(&content)
    }

    pub fn parse_str(content: &str) -> anyhow::Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Load from `explicit`, else the first discovered config file, else defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let config = match explicit {
            Some(path) => Self::parse_file(path)?,
            None => match discover() {
                Some(path) => {
                    tracing::debug!(path = %path.display(), "using discovered config");
                    Self::parse_file(&path)?
                }
                None => Self::default(),
            },
        };
        validate(&config)?;
        Ok(config)
    }

    /// Cache directory for an analyzed root.
    pub fn cache_dir_for(&self, root: &Path) -> PathBuf {
        if self.cache_dir.is_absolute() {
            self.cache_dir.clone()
        } else {
            root.join(&self.cache_dir)
        }
    }

    /// Final path component of the cache directory, skipped while walking.
    pub fn cache_dir_name(&self) -> String {
        self.cache_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| DEFAULT_CACHE_DIR_NAME.to_string())
    }
}

/// Find a config file in the current directory, then the user config dir.
fn discover() -> Option<PathBuf> {
    DEFAULT_CONFIG_NAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .or_else(|| {
            directories::ProjectDirs::from("", "", "codewise")
                .map(|dirs| dirs.config_dir().join("codewise.yaml"))
                .filter(|p| p.exists())
        })
}

/// Check values serde cannot.
pub fn validate(config: &Config) -> anyhow::Result<()> {
    if config.channel_capacity == 0 {
        anyhow::bail!("channel_capacity must be at least 1");
    }
    if config.reviewer.endpoint.trim().is_empty() {
        anyhow::bail!("reviewer.endpoint must not be empty");
    }
    if config.reviewer.timeout_secs == 0 {
        anyhow::bail!("reviewer.timeout_secs must be at least 1");
    }

    for pattern in &config.excluded_paths {
        globset::Glob::new(pattern)
            .map_err(|e| anyhow::anyhow!("invalid excluded_paths pattern {:?}: {}", pattern, e))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_config() {
        let yaml = r#"
reviewer:
  endpoint: "http://localhost:8080/v1/chat/completions"
  model: "local-coder"
  api_key_env: null
usage_cap: 5
sample_seed: 42
use_cache: false
excluded_paths:
  - "build/**"
"#;
        let config = Config::parse_str(yaml).unwrap();
        assert_eq!(config.reviewer.model, "local-coder");
        assert_eq!(config.reviewer.api_key_env, None);
        assert_eq!(config.reviewer.max_tokens, 2048);
        assert_eq!(config.usage_cap, 5);
        assert_eq!(config.sample_seed, Some(42));
        assert!(!config.use_cache);
        assert_eq!(config.channel_capacity, 32);
        assert_eq!(config.excluded_paths, vec!["build/**"]);
    }

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(Config::parse_str("").unwrap(), Config::default());
        assert_eq!(Config::parse_str("{}").unwrap(), Config::default());
    }

    #[test]
    fn test_cache_dir_resolution() {
        let config = Config::default();
        assert_eq!(
            config.cache_dir_for(Path::new("/proj")),
            PathBuf::from("/proj/.codewise_cache")
        );
        assert_eq!(config.cache_dir_name(), ".codewise_cache");

        let config = Config {
            cache_dir: PathBuf::from("/var/cache/cw"),
            ..Config::default()
        };
        assert_eq!(
            config.cache_dir_for(Path::new("/proj")),
            PathBuf::from("/var/cache/cw")
        );
        assert_eq!(config.cache_dir_name(), "cw");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_glob = Config {
            excluded_paths: vec!["[".to_string()],
            ..Config::default()
        };
        assert!(validate(&bad_glob).is_err());

        let zero_channel = Config {
            channel_capacity: 0,
            ..Config::default()
        };
        assert!(validate(&zero_channel).is_err());

        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_load_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cw.yaml");
        fs::write(&path, "usage_cap: 3\n").unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.usage_cap, 3);
    }
}
