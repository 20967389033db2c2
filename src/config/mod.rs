/// Configuration management for the diagrun engine
///
/// Handles server settings, execution defaults, the executor environment,
/// credentials for privileged executors and filesystem roots.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Defaults applied to every run
    pub execution: ExecutionConfig,
    /// Which executors the registry exposes
    pub environment: ExecutionEnvironment,
    /// Secrets for privileged executors
    pub credentials: CredentialsConfig,
    /// Filesystem roots for file-reading and file-writing executors
    pub files: FilesConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub max_iterations: u32,
    pub timeout_secs: u64,
    pub max_concurrency: usize,
    pub debug_mode: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            timeout_secs: 300,
            max_concurrency: 8,
            debug_mode: false,
        }
    }
}

/// Executor environment
///
/// `Sandbox` exposes only executors without external side effects;
/// `Server` exposes everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionEnvironment {
    #[default]
    Sandbox,
    Server,
}

impl fmt::Display for ExecutionEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionEnvironment::Sandbox => f.write_str("sandbox"),
            ExecutionEnvironment::Server => f.write_str("server"),
        }
    }
}

impl FromStr for ExecutionEnvironment {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(ExecutionEnvironment::Sandbox),
            "server" => Ok(ExecutionEnvironment::Server),
            other => Err(anyhow::anyhow!("Unknown execution environment: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// API key for the OpenAI-compatible chat endpoint
    #[serde(skip_serializing)]
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    /// USD per 1k prompt tokens
    pub llm_input_price_per_1k: f64,
    /// USD per 1k completion tokens
    pub llm_output_price_per_1k: f64,
    #[serde(skip_serializing)]
    pub notion_token: Option<String>,
    pub notion_base_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Root that db nodes may read from
    pub input_root: Option<PathBuf>,
    /// Root that endpoint nodes may write to
    pub output_root: Option<PathBuf>,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        let execution_defaults = ExecutionConfig::default();
        Self {
            server: ServerConfig {
                host: std::env::var("DIAGRUN_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("DIAGRUN_PORT", 3004),
            },
            execution: ExecutionConfig {
                max_iterations: env_or("DIAGRUN_MAX_ITERATIONS", execution_defaults.max_iterations),
                timeout_secs: env_or("DIAGRUN_TIMEOUT_SECS", execution_defaults.timeout_secs),
                max_concurrency: env_or("DIAGRUN_MAX_CONCURRENCY", execution_defaults.max_concurrency),
                debug_mode: env_or("DIAGRUN_DEBUG", execution_defaults.debug_mode),
            },
            environment: env_or("DIAGRUN_ENVIRONMENT", ExecutionEnvironment::Sandbox),
            credentials: CredentialsConfig {
                llm_api_key: std::env::var("DIAGRUN_LLM_API_KEY")
                    .or_else(|_| std::env::var("OPENAI_API_KEY"))
                    .ok(),
                llm_base_url: std::env::var("DIAGRUN_LLM_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                llm_input_price_per_1k: env_or("DIAGRUN_LLM_INPUT_PRICE", 0.00015),
                llm_output_price_per_1k: env_or("DIAGRUN_LLM_OUTPUT_PRICE", 0.0006),
                notion_token: std::env::var("DIAGRUN_NOTION_TOKEN").ok(),
                notion_base_url: std::env::var("DIAGRUN_NOTION_BASE_URL")
                    .unwrap_or_else(|_| "https://api.notion.com/v1".to_string()),
            },
            files: FilesConfig {
                input_root: std::env::var("DIAGRUN_INPUT_ROOT").ok().map(PathBuf::from),
                output_root: std::env::var("DIAGRUN_OUTPUT_ROOT").ok().map(PathBuf::from),
            },
        }
    }
}

/// Parse an environment variable, falling back on absence or parse failure
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("⚠️ Ignoring unparsable {}={}", key, raw);
            default
        }),
        Err(_) => default,
    }
}
