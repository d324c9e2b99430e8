//! Configuration: one section per concern, loaded from TOML with
//! environment-variable overrides for secrets only.
//!
//! Grounded in `original_source/src/core/config.py`'s section layout;
//! ported to `serde::Deserialize` + `#[serde(default)]` and TOML rather
//! than YAML.

use std::path::Path;

use directories::ProjectDirs;
use serde::Deserialize;

/// Falls back to the platform data directory, matching the teacher's own
/// `ProjectDirs::from("com", "harmonia", "core")` convention.
fn default_database_path() -> String {
    ProjectDirs::from("com", "harmonia", "core")
        .map(|dirs| dirs.data_dir().to_string_lossy().into_owned())
        .unwrap_or_else(|| "./data".to_string())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8000,
            workers: 1,
            cors_origins: vec!["http://localhost:*".to_string()],
            request_timeout_secs: 30,
            max_request_size: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: usize,
    pub timeout_secs: u64,
    pub backup_interval_secs: u64,
    pub backup_retention_hours: u64,
    pub vacuum_interval_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: default_database_path(),
            pool_size: 10,
            timeout_secs: 30,
            backup_interval_secs: 3600,
            backup_retention_hours: 168,
            vacuum_interval_secs: 86400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub host: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
    pub health_check_interval_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        OllamaConfig {
            host: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            temperature: 0.3,
            max_tokens: 500,
            timeout_secs: 30,
            retry_attempts: 3,
            retry_delay_secs: 1,
            health_check_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub extraction_enabled: bool,
    pub conflict_resolution_strategy: String,
    pub temporal_resolution_enabled: bool,
    pub default_timezone: String,
    pub confidence_threshold: f64,
    pub max_memory_age_days: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            extraction_enabled: true,
            conflict_resolution_strategy: "update".to_string(),
            temporal_resolution_enabled: true,
            default_timezone: "UTC".to_string(),
            confidence_threshold: 0.7,
            max_memory_age_days: 365,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_results: usize,
    pub default_page_size: i64,
    pub fts_enabled: bool,
    pub semantic_search_enabled: bool,
    pub ranking_algorithm: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            max_results: 100,
            default_page_size: 10,
            fts_enabled: true,
            semantic_search_enabled: false,
            ranking_algorithm: "bm25".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: "structured".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            enabled: true,
            requests_per_minute: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allow_credentials: bool,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        CorsConfig {
            allow_credentials: false,
            max_age_secs: 86400,
        }
    }
}

/// `api_key_required`/`api_keys` are only ever set from the environment
/// (`HARMONIA_API_KEY_REQUIRED`/`HARMONIA_API_KEYS`) — never the config
/// file — mirroring `_apply_env_overrides` restricting secrets to env vars.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    pub api_key_required: bool,
    pub api_keys: Vec<String>,
    pub rate_limit: RateLimitConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DevelopmentConfig {
    pub debug: bool,
    pub mock_llm: bool,
}

impl Default for DevelopmentConfig {
    fn default() -> Self {
        DevelopmentConfig {
            debug: false,
            mock_llm: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub formats: Vec<String>,
    pub max_export_size: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            formats: vec![
                "json".to_string(),
                "csv".to_string(),
                "markdown".to_string(),
                "text".to_string(),
            ],
            max_export_size: 100_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    server: ServerConfig,
    database: DatabaseConfig,
    ollama: OllamaConfig,
    memory: MemoryConfig,
    search: SearchConfig,
    logging: LoggingConfig,
    development: DevelopmentConfig,
    export: ExportConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ollama: OllamaConfig,
    pub memory: MemoryConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub development: DevelopmentConfig,
    pub export: ExportConfig,
}

impl Config {
    /// Loads `path` if it exists (defaults otherwise), then applies the
    /// secret-only environment overrides.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        let path = path.as_ref();
        let file_config: FileConfig = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        } else {
            FileConfig::default()
        };

        let mut config = Config {
            server: file_config.server,
            database: file_config.database,
            ollama: file_config.ollama,
            memory: file_config.memory,
            search: file_config.search,
            logging: file_config.logging,
            security: SecurityConfig::default(),
            development: file_config.development,
            export: file_config.export,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(keys) = std::env::var("HARMONIA_API_KEYS") {
            self.security.api_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(required) = std::env::var("HARMONIA_API_KEY_REQUIRED") {
            self.security.api_key_required = matches!(
                required.to_lowercase().as_str(),
                "true" | "yes" | "1" | "on"
            );
        }
    }

    /// Directory/reachability checks mirroring `scripts/validate_environment.py`.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !Path::new(&self.database.path).exists() {
            warnings.push(format!(
                "database directory does not exist: {}",
                self.database.path
            ));
        }
        if !(self.ollama.host.starts_with("http://") || self.ollama.host.starts_with("https://")) {
            warnings.push("ollama host should start with http:// or https://".to_string());
        }
        if self.security.api_key_required && self.security.api_keys.is_empty() {
            warnings.push(
                "API key authentication is enabled but no keys are configured".to_string(),
            );
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.ollama.model, "llama3.2:3b");
        assert_eq!(config.memory.confidence_threshold, 0.7);
    }

    #[test]
    fn env_overrides_only_affect_security() {
        std::env::set_var("HARMONIA_API_KEYS", "a, b ,c");
        std::env::set_var("HARMONIA_API_KEY_REQUIRED", "true");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.security.api_keys, vec!["a", "b", "c"]);
        assert!(config.security.api_key_required);
        std::env::remove_var("HARMONIA_API_KEYS");
        std::env::remove_var("HARMONIA_API_KEY_REQUIRED");
    }
}
