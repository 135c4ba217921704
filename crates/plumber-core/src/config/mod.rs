//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Plumber configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub gcp: GcpConfig,
    pub llm: LlmConfig,
    pub templates: TemplatesConfig,
    pub logging: LoggingConfig,
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpConfig {
    pub project: Option<String>,
    pub region: String,
    /// Vertex AI location for the LLM
    pub location: String,
    pub staging_location: Option<String>,
    pub impersonate_service_account: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub fallback_models: Vec<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesConfig {
    pub dataflow_catalog_path: PathBuf,
    pub dataflow_repo_url: String,
    pub dataproc_repo_url: String,
    pub workspace_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub default_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub command_timeout_secs: u64,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            project: None,
            region: "us-central1".to_string(),
            location: "us-central1".to_string(),
            staging_location: None,
            impersonate_service_account: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            fallback_models: vec!["gemini-1.5-pro".to_string()],
            temperature: 0.2,
            max_output_tokens: 8192,
            timeout_secs: 120,
        }
    }
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dataflow_catalog_path: PathBuf::from("dataflow_templates.json"),
            dataflow_repo_url: "https://github.com/GoogleCloudPlatform/DataflowTemplates.git"
                .to_string(),
            dataproc_repo_url: "https://github.com/GoogleCloudPlatform/dataproc-templates.git"
                .to_string(),
            workspace_dir: PathBuf::from("git_repos"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { default_limit: 10 }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 1800,
        }
    }
}

impl GcpConfig {
    /// Resolve the project, preferring the environment over the file
    pub fn resolved_project(&self) -> Option<String> {
        env::var("GOOGLE_CLOUD_PROJECT")
            .or_else(|_| env::var("GCP_PROJECT"))
            .ok()
            .filter(|p| !p.is_empty())
            .or_else(|| self.project.clone())
    }

    /// Resolve the project or fail with a pointer to the config key
    pub fn require_project(&self) -> anyhow::Result<String> {
        self.resolved_project().ok_or_else(|| {
            anyhow!(
                "No GCP project configured. Set GOOGLE_CLOUD_PROJECT or run `plumber config set gcp.project <id>`."
            )
        })
    }

    pub fn resolved_region(&self) -> String {
        env::var("REGION")
            .ok()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| self.region.clone())
    }

    pub fn resolved_location(&self) -> String {
        env::var("GOOGLE_CLOUD_LOCATION")
            .ok()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| self.location.clone())
    }

    pub fn resolved_service_account(&self) -> Option<String> {
        env::var("PLUMBER_TARGET_SERVICE_ACCOUNT_ID")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| self.impersonate_service_account.clone())
    }
}

/// GitHub token, only ever read from the environment
pub fn github_token() -> Option<String> {
    env::var("GITHUB_TOKEN")
        .or_else(|_| env::var("GITHUB_PERSONAL_ACCESS_TOKEN"))
        .ok()
        .filter(|t| !t.is_empty())
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("PLUMBER_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("plumber")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(anyhow!("llm.temperature must be between 0.0 and 2.0"));
        }
        if self.logging.default_limit == 0 {
            return Err(anyhow!("logging.default_limit must be at least 1"));
        }
        if let Some(staging) = &self.gcp.staging_location
            && !staging.starts_with("gs://")
        {
            return Err(anyhow!("gcp.staging_location must be a gs:// path"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        let unset = || "(not set)".to_string();
        match key {
            "gcp.project" => Ok(self.gcp.resolved_project().unwrap_or_else(unset)),
            "gcp.region" => Ok(self.gcp.resolved_region()),
            "gcp.location" => Ok(self.gcp.resolved_location()),
            "gcp.staging_location" => Ok(self.gcp.staging_location.clone().unwrap_or_else(unset)),
            "gcp.impersonate_service_account" => {
                Ok(self.gcp.resolved_service_account().unwrap_or_else(unset))
            }

            "llm.model" => Ok(self.llm.model.clone()),
            "llm.fallback_models" => Ok(self.llm.fallback_models.join(", ")),
            "llm.temperature" => Ok(self.llm.temperature.to_string()),
            "llm.max_output_tokens" => Ok(self.llm.max_output_tokens.to_string()),
            "llm.timeout_secs" => Ok(self.llm.timeout_secs.to_string()),

            "templates.dataflow_catalog_path" => {
                Ok(self.templates.dataflow_catalog_path.display().to_string())
            }
            "templates.dataflow_repo_url" => Ok(self.templates.dataflow_repo_url.clone()),
            "templates.dataproc_repo_url" => Ok(self.templates.dataproc_repo_url.clone()),
            "templates.workspace_dir" => Ok(self.templates.workspace_dir.display().to_string()),

            "logging.default_limit" => Ok(self.logging.default_limit.to_string()),
            "runner.command_timeout_secs" => Ok(self.runner.command_timeout_secs.to_string()),

            "github.token" => match github_token() {
                Some(token) if token.len() > 4 => Ok(format!("***{}", &token[token.len() - 4..])),
                Some(_) => Ok("***".to_string()),
                None => Ok("(not set - use GITHUB_TOKEN env var)".to_string()),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `plumber config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let optional = |v: &str| {
            let v = v.trim();
            if v.is_empty() { None } else { Some(v.to_string()) }
        };

        match key {
            "gcp.project" => self.gcp.project = optional(value),
            "gcp.region" => self.gcp.region = value.to_string(),
            "gcp.location" => self.gcp.location = value.to_string(),
            "gcp.staging_location" => {
                if !value.is_empty() && !value.starts_with("gs://") {
                    return Err(anyhow!("Staging location must start with gs://"));
                }
                self.gcp.staging_location = optional(value);
            }
            "gcp.impersonate_service_account" => {
                self.gcp.impersonate_service_account = optional(value)
            }

            "llm.model" => self.llm.model = value.to_string(),
            "llm.fallback_models" => {
                self.llm.fallback_models = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            "llm.temperature" => {
                let temp: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid temperature value: {}", value))?;
                if !(0.0..=2.0).contains(&temp) {
                    return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
                }
                self.llm.temperature = temp;
            }
            "llm.max_output_tokens" => {
                self.llm.max_output_tokens = value
                    .parse()
                    .with_context(|| format!("Invalid max_output_tokens value: {}", value))?;
            }
            "llm.timeout_secs" => {
                self.llm.timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
            }

            "templates.dataflow_catalog_path" => {
                self.templates.dataflow_catalog_path = PathBuf::from(value)
            }
            "templates.dataflow_repo_url" => self.templates.dataflow_repo_url = value.to_string(),
            "templates.dataproc_repo_url" => self.templates.dataproc_repo_url = value.to_string(),
            "templates.workspace_dir" => self.templates.workspace_dir = PathBuf::from(value),

            "logging.default_limit" => {
                let limit: usize = value
                    .parse()
                    .with_context(|| format!("Invalid default_limit value: {}", value))?;
                if limit == 0 {
                    return Err(anyhow!("Default log limit must be at least 1"));
                }
                self.logging.default_limit = limit;
            }
            "runner.command_timeout_secs" => {
                self.runner.command_timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid command_timeout_secs value: {}", value))?;
            }

            "github.token" => {
                return Err(anyhow!(
                    "GitHub tokens cannot be stored in configuration. \
                     Set the GITHUB_TOKEN environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `plumber config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "gcp.project",
            "gcp.region",
            "gcp.location",
            "gcp.staging_location",
            "gcp.impersonate_service_account",
            "llm.model",
            "llm.fallback_models",
            "llm.temperature",
            "llm.max_output_tokens",
            "llm.timeout_secs",
            "templates.dataflow_catalog_path",
            "templates.dataflow_repo_url",
            "templates.dataproc_repo_url",
            "templates.workspace_dir",
            "logging.default_limit",
            "runner.command_timeout_secs",
            "github.token",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.gcp.project.is_none());
        assert_eq!(config.gcp.region, "us-central1");
        assert_eq!(config.llm.model, "gemini-2.0-flash");
        assert_eq!(config.logging.default_limit, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_set_and_get_roundtrip() {
        let mut config = Config::default();
        config.set("gcp.region", "europe-west1").unwrap();
        config.set("llm.temperature", "0.5").unwrap();
        config.set("logging.default_limit", "25").unwrap();
        config
            .set("llm.fallback_models", "gemini-1.5-flash, gemini-1.5-pro,")
            .unwrap();

        assert_eq!(config.gcp.region, "europe-west1");
        assert_eq!(config.get("llm.temperature").unwrap(), "0.5");
        assert_eq!(config.get("logging.default_limit").unwrap(), "25");
        assert_eq!(config.llm.fallback_models.len(), 2);
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config.set("llm.temperature", "3.5").is_err());
        assert!(config.set("logging.default_limit", "0").is_err());
        assert!(config.set("gcp.staging_location", "/tmp/staging").is_err());
        assert!(config.set("github.token", "ghp_secret").is_err());
        assert!(config.set("no.such.key", "x").is_err());
    }

    #[test]
    fn test_unknown_key_get() {
        let config = Config::default();
        let err = config.get("bogus").unwrap_err();
        assert!(err.to_string().contains("plumber config list"));
    }

    #[test]
    fn test_toml_roundtrip_with_partial_file() {
        let parsed: Config = toml::from_str(
            r#"
            [gcp]
            project = "my-project"

            [logging]
            default_limit = 5
            "#,
        )
        .unwrap();
        assert_eq!(parsed.gcp.project.as_deref(), Some("my-project"));
        assert_eq!(parsed.gcp.region, "us-central1");
        assert_eq!(parsed.logging.default_limit, 5);
        assert_eq!(parsed.llm.model, "gemini-2.0-flash");

        let serialized = toml::to_string_pretty(&parsed).unwrap();
        let reparsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(reparsed.gcp.project, parsed.gcp.project);
    }

    #[test]
    fn test_list_contains_all_sections() {
        let config = Config::default();
        let keys: Vec<String> = config.list().unwrap().into_iter().map(|(k, _)| k).collect();
        assert!(keys.iter().any(|k| k.starts_with("gcp.")));
        assert!(keys.iter().any(|k| k.starts_with("templates.")));
        assert!(keys.contains(&"github.token".to_string()));
    }
}
