//! Configuration loader and validator for the workspace sync tool.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema. Every section is
/// optional; a missing file behaves like an empty one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub notion: Notion,
    #[serde(default)]
    pub workspace: Workspace,
    #[serde(default)]
    pub apply: Apply,
}

/// Notion API access and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notion {
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: u64,
}

impl Default for Notion {
    fn default() -> Self {
        Self {
            token: String::new(),
            version: default_version(),
            base_url: None,
            max_retries: default_max_retries(),
            max_backoff_seconds: default_max_backoff_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Workspace {
    /// Default parent for pages without one, and the place databases are
    /// looked up when no schema file is part of the run.
    #[serde(default)]
    pub parent_page_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Apply {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for Apply {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_version() -> String {
    "2022-06-28".into()
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_backoff_seconds() -> u64 {
    30
}

fn default_concurrency() -> usize {
    4
}

/// Load configuration, overlay `NOTION_TOKEN` and validate.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    load_with_token(path, std::env::var("NOTION_TOKEN").ok())
}

/// Like [`load`] with the environment token passed explicitly.
pub fn load_with_token(
    path: Option<&Path>,
    env_token: Option<String>,
) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let mut cfg = match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Config::default(),
        Ok(content) => serde_yaml::from_str(&content)?,
        Err(err) if err.kind() == ErrorKind::NotFound => Config::default(),
        Err(err) => return Err(err.into()),
    };
    if let Some(token) = env_token.filter(|t| !t.trim().is_empty()) {
        cfg.notion.token = token;
    }
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.notion.token.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "notion.token must be non-empty (or set NOTION_TOKEN)",
        ));
    }
    if cfg.notion.version.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.version must be non-empty"));
    }
    if let Some(url) = &cfg.notion.base_url {
        if Url::parse(url).is_err() {
            return Err(ConfigError::Invalid("notion.base_url must be an absolute URL"));
        }
    }
    if cfg.apply.concurrency == 0 {
        return Err(ConfigError::Invalid("apply.concurrency must be > 0"));
    }
    if cfg
        .workspace
        .parent_page_id
        .as_deref()
        .is_some_and(|p| p.trim().is_empty())
    {
        return Err(ConfigError::Invalid(
            "workspace.parent_page_id must be non-empty when set",
        ));
    }
    Ok(())
}

/// Example configuration.
pub fn example() -> &'static str {
    r#"notion:
  token: "YOUR_NOTION_INTEGRATION_TOKEN"
  version: "2022-06-28"
  max_retries: 3
  max_backoff_seconds: 30

workspace:
  parent_page_id: "NOTION_PARENT_PAGE_ID"

apply:
  concurrency: 4
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.apply.concurrency, 4);
        assert_eq!(
            cfg.workspace.parent_page_id.as_deref(),
            Some("NOTION_PARENT_PAGE_ID")
        );
    }

    #[test]
    fn missing_file_uses_defaults_and_env_token() {
        let td = tempdir().unwrap();
        let path = td.path().join("absent.yaml");
        let cfg = load_with_token(Some(&path), Some("secret_env".into())).unwrap();
        assert_eq!(cfg.notion.token, "secret_env");
        assert_eq!(cfg.notion.version, "2022-06-28");
        assert_eq!(cfg.notion.max_retries, 3);
        assert!(cfg.workspace.parent_page_id.is_none());
    }

    #[test]
    fn env_token_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(example().as_bytes()).unwrap();
        let cfg = load_with_token(Some(file.path()), Some("from_env".into())).unwrap();
        assert_eq!(cfg.notion.token, "from_env");
        let cfg = load_with_token(Some(file.path()), None).unwrap();
        assert_eq!(cfg.notion.token, "YOUR_NOTION_INTEGRATION_TOKEN");
    }

    #[test]
    fn missing_token_is_invalid() {
        let td = tempdir().unwrap();
        let err = load_with_token(Some(&td.path().join("none.yaml")), None).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("notion.token")),
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[test]
    fn invalid_values() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.apply.concurrency = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(msg)) if msg.contains("concurrency")));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.notion.base_url = Some("not a url".into());
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(msg)) if msg.contains("base_url")));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.workspace.parent_page_id = Some("  ".into());
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"notion: [unclosed").unwrap();
        assert!(matches!(
            load_with_token(Some(file.path()), Some("t".into())),
            Err(ConfigError::Parse(_))
        ));
    }
}
