use std::path::{Path, PathBuf};

use campus_common::{Error, Result};
use tracing::{info, warn};

use crate::model::AppConfig;

const CONFIG_DIR: &str = ".campus-assist";
const ENV_API_KEY: &str = "CAMPUS_LLM_API_KEY";
const ENV_BASE_URL: &str = "CAMPUS_LLM_BASE_URL";

/// Locates, parses and post-processes the service configuration.
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loader pointing at `~/.campus-assist/config.yml`.
    pub fn default_location() -> Self {
        let dir = dirs::home_dir()
            .map(|home| home.join(CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR));
        Self::new(dir.join("config.yml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the config file, falling back to defaults when it does not exist.
    /// Environment overrides are applied afterwards in both cases.
    pub fn load(&self) -> Result<AppConfig> {
        let mut config = if self.path.exists() {
            info!("loading config from {}", self.path.display());
            let raw = std::fs::read_to_string(&self.path)?;
            parse_config(&self.path, &raw)?
        } else {
            warn!(
                "config file {} not found, using defaults",
                self.path.display()
            );
            AppConfig::default()
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        validate(&config)?;
        Ok(config)
    }
}

fn parse_config(path: &Path, raw: &str) -> Result<AppConfig> {
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    if is_toml {
        toml::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid TOML in {}: {e}", path.display())))
    } else {
        serde_yaml::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid YAML in {}: {e}", path.display())))
    }
}

fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(key) = lookup(ENV_API_KEY).filter(|v| !v.trim().is_empty()) {
        config.llm.api_key = Some(key);
    }
    if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
        config.llm.base_url = Some(url);
    }
}

fn validate(config: &AppConfig) -> Result<()> {
    if config.tools.max_tools_per_request == 0 {
        return Err(Error::Config(
            "tools.max_tools_per_request must be at least 1".to_string(),
        ));
    }
    if config.tools.fallback_tools.is_empty() {
        return Err(Error::Config(
            "tools.fallback_tools must name at least one tool".to_string(),
        ));
    }
    if config.streaming.chunk_chars == 0 {
        return Err(Error::Config(
            "streaming.chunk_chars must be at least 1".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&config.intent.keyword_threshold) {
        return Err(Error::Config(
            "intent.keyword_threshold must be within [0, 1]".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path().join("absent.yml"));
        let config = loader.load().unwrap();
        assert_eq!(config.gateway.port, 3900);
    }

    #[test]
    fn loads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "gateway:\n  port: 4100\npermissions:\n  teacher: [ui_display]").unwrap();

        let config = ConfigLoader::new(&path).load().unwrap();
        assert_eq!(config.gateway.port, 4100);
        assert_eq!(config.permissions["teacher"], vec!["ui_display".to_string()]);
    }

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[streaming]\nchunk_chars = 8\n").unwrap();

        let config = ConfigLoader::new(&path).load().unwrap();
        assert_eq!(config.streaming.chunk_chars, 8);
    }

    #[test]
    fn rejects_zero_tool_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "tools:\n  max_tools_per_request: 0\n").unwrap();

        let err = ConfigLoader::new(&path).load().unwrap_err();
        assert!(err.to_string().contains("max_tools_per_request"));
    }

    #[test]
    fn invalid_yaml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "gateway: [unterminated").unwrap();

        let err = ConfigLoader::new(&path).load().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn env_overrides_replace_secrets() {
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, |key| match key {
            ENV_API_KEY => Some("sk-test".to_string()),
            ENV_BASE_URL => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert!(config.llm.base_url.is_none());
    }
}
