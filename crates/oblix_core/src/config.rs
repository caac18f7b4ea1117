use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable holding the API key for the OpenAI-compatible cloud backend.
pub const OPENAI_API_KEY_ENV: &str = "OBLIX_OPENAI_API_KEY";

// ---------------------------------------------------------------------------
// OblixConfig
// ---------------------------------------------------------------------------

/// Engine configuration stored at `~/.oblix/config.json`.
///
/// API keys are **never** written to the JSON file. They are read from the
/// environment when the config is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OblixConfig {
    #[serde(skip)]
    pub openai_api_key: Option<String>,

    // Routing
    pub request_timeout_secs: u64,
    pub invocation_timeout_secs: u64,
    pub complexity_token_threshold: usize,

    // Resource agent
    pub cpu_threshold_pct: f32,
    pub memory_threshold_pct: f32,
    pub critical_cpu_pct: f32,
    pub critical_memory_pct: f32,
    pub emergency_memory_pct: f32,

    // Connectivity agent
    pub latency_threshold_ms: f64,
    pub packet_loss_threshold_pct: f64,
    pub bandwidth_threshold_mbps: f64,
    pub connectivity_check_interval_secs: u64,
    pub connectivity_endpoints: Vec<String>,
    /// TCP connects per endpoint in one measurement; loss is the failed share.
    pub connectivity_attempts_per_endpoint: u32,
    pub bandwidth_probe_url: Option<String>,

    // Budget agent
    pub budget_limit_usd: Option<f64>,
    pub budget_window_hours: u64,
    pub budget_constrained_pct: f64,
    pub budget_critical_pct: f64,

    // Backends
    pub ollama_url: String,
    pub ollama_models: Vec<String>,
    pub openai_base_url: String,
    pub openai_models: Vec<String>,

    // General
    pub log_level: String,
}

impl Default for OblixConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            request_timeout_secs: 120,
            invocation_timeout_secs: 60,
            complexity_token_threshold: 200,
            cpu_threshold_pct: 80.0,
            memory_threshold_pct: 85.0,
            critical_cpu_pct: 95.0,
            critical_memory_pct: 95.0,
            emergency_memory_pct: 98.0,
            latency_threshold_ms: 200.0,
            packet_loss_threshold_pct: 10.0,
            bandwidth_threshold_mbps: 5.0,
            connectivity_check_interval_secs: 30,
            connectivity_endpoints: vec!["1.1.1.1:443".into(), "8.8.8.8:443".into()],
            connectivity_attempts_per_endpoint: 5,
            bandwidth_probe_url: None,
            budget_limit_usd: None,
            budget_window_hours: 24,
            budget_constrained_pct: 70.0,
            budget_critical_pct: 90.0,
            ollama_url: "http://localhost:11434".into(),
            ollama_models: Vec::new(),
            openai_base_url: "https://api.openai.com".into(),
            openai_models: Vec::new(),
            log_level: "info".into(),
        }
    }
}

impl OblixConfig {
    /// Returns the base config directory: `~/.oblix/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".oblix"))
    }

    /// Returns the config file path: `~/.oblix/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.oblix/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Ensures the base and logs directories exist.
    pub fn ensure_dirs() -> Result<()> {
        for dir in [Self::base_dir()?, Self::logs_dir()?] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            }
        }
        Ok(())
    }

    /// Loads config from `~/.oblix/config.json`, creating the default file if
    /// missing, then applies environment overrides.
    pub fn load() -> Result<Self> {
        Self::ensure_dirs()?;
        let path = Self::config_path()?;
        let mut config = Self::load_from_path(&path)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load config from a specific file path. A missing file is created with
    /// default values.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: Self = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            config.validate()?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to_path(path)?;
            info!("Created default config at {}", path.display());
            Ok(config)
        }
    }

    /// Saves config to `~/.oblix/config.json`.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to_path(&path)
    }

    /// Save config to a specific file path (API keys are excluded via `#[serde(skip)]`).
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Fill secrets from the environment. `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(OPENAI_API_KEY_ENV).filter(|k| !k.is_empty()) {
            self.openai_api_key = Some(key);
        }
    }

    /// Reject threshold combinations the agents cannot interpret.
    pub fn validate(&self) -> Result<()> {
        let pct_fields = [
            ("cpu_threshold_pct", self.cpu_threshold_pct),
            ("memory_threshold_pct", self.memory_threshold_pct),
            ("critical_cpu_pct", self.critical_cpu_pct),
            ("critical_memory_pct", self.critical_memory_pct),
            ("emergency_memory_pct", self.emergency_memory_pct),
        ];
        for (name, value) in pct_fields {
            if !(0.0..=100.0).contains(&value) {
                bail!("{name} must be between 0 and 100, got {value}");
            }
        }
        if self.critical_cpu_pct < self.cpu_threshold_pct {
            bail!("critical_cpu_pct must not be below cpu_threshold_pct");
        }
        if self.critical_memory_pct < self.memory_threshold_pct
            || self.emergency_memory_pct < self.critical_memory_pct
        {
            bail!("memory thresholds must be ordered: threshold <= critical <= emergency");
        }
        if self.budget_critical_pct < self.budget_constrained_pct {
            bail!("budget_critical_pct must not be below budget_constrained_pct");
        }
        if let Some(limit) = self.budget_limit_usd
            && limit < 0.0
        {
            bail!("budget_limit_usd must not be negative");
        }
        if self.request_timeout_secs == 0 || self.invocation_timeout_secs == 0 {
            bail!("timeouts must be non-zero");
        }
        if self.connectivity_attempts_per_endpoint == 0 {
            bail!("connectivity_attempts_per_endpoint must be at least 1");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("oblix").join("config.json");
        (tmp, path)
    }

    #[test]
    fn defaults_match_agent_thresholds() {
        let config = OblixConfig::default();
        assert_eq!(config.packet_loss_threshold_pct, 10.0);
        assert_eq!(config.latency_threshold_ms, 200.0);
        assert_eq!(config.budget_constrained_pct, 70.0);
        assert_eq!(config.budget_critical_pct, 90.0);
        assert!(config.budget_limit_usd.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_connect_attempts_rejected() {
        let config = OblixConfig {
            connectivity_attempts_per_endpoint: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(OblixConfig::default().connectivity_attempts_per_endpoint, 5);
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let (_tmp, path) = temp_config_path();
        assert!(!path.exists());

        let config = OblixConfig::load_from_path(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config, OblixConfig::default());
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let (_tmp, path) = temp_config_path();
        let config = OblixConfig {
            budget_limit_usd: Some(5.0),
            ollama_models: vec!["llama3.2".into(), "qwen2.5-coder".into()],
            ..OblixConfig::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = OblixConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.budget_limit_usd, Some(5.0));
        assert_eq!(loaded.ollama_models.len(), 2);
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let (_tmp, path) = temp_config_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{ "packet_loss_threshold_pct": 5.0 }"#).unwrap();

        let loaded = OblixConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.packet_loss_threshold_pct, 5.0);
        assert_eq!(loaded.ollama_url, "http://localhost:11434");
    }

    #[test]
    fn api_key_never_written_to_disk() {
        let (_tmp, path) = temp_config_path();
        let config = OblixConfig {
            openai_api_key: Some("sk-should-not-appear".into()),
            ..OblixConfig::default()
        };
        config.save_to_path(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("sk-should-not-appear"));
        let loaded = OblixConfig::load_from_path(&path).unwrap();
        assert!(loaded.openai_api_key.is_none());
    }

    #[test]
    fn apply_env_reads_api_key() {
        let mut config = OblixConfig::default();
        config.apply_env(|name| (name == OPENAI_API_KEY_ENV).then(|| "sk-env".to_string()));
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-env"));

        let mut untouched = OblixConfig::default();
        untouched.apply_env(|_| Some(String::new()));
        assert!(untouched.openai_api_key.is_none());
    }

    #[test]
    fn invalid_file_is_rejected() {
        let (_tmp, path) = temp_config_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{ "budget_constrained_pct": 95.0, "budget_critical_pct": 90.0 }"#,
        )
        .unwrap();

        let err = OblixConfig::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("budget_critical_pct"));
    }

    #[test]
    fn malformed_json_reports_path() {
        let (_tmp, path) = temp_config_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let err = OblixConfig::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn validate_rejects_out_of_range_percentages() {
        let config = OblixConfig {
            cpu_threshold_pct: 120.0,
            critical_cpu_pct: 130.0,
            ..OblixConfig::default()
        };
        assert!(config.validate().is_err());

        let unordered = OblixConfig {
            critical_memory_pct: 99.0,
            emergency_memory_pct: 97.0,
            ..OblixConfig::default()
        };
        assert!(unordered.validate().is_err());
    }
}
