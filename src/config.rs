use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub session: SessionConfig,
    pub agent: AgentConfig,
    pub docs: DocsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Connection settings for the OpenAI-compatible chat and embeddings provider.
///
/// `parser_model` backs the safety classifiers and may be a weaker, cheaper
/// model than `chat_model`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub chat_model: String,
    pub parser_model: String,
    pub embed_model: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds of inactivity before a session is evicted (default: 24h)
    pub ttl_seconds: u64,
    /// Trailing conversation turns retained per session
    pub history_limit: usize,
    /// Interval between eviction sweeps
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum tool-call rounds within a single turn
    pub max_tool_hops: u32,
    /// Correction retries when the answer classifier rejects the shape
    pub max_answer_retries: u32,
    /// Correction retries when the query validator finds a discrepancy
    pub max_query_retries: u32,
    /// Overall deadline for one user turn, in seconds
    pub turn_deadline_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocsConfig {
    /// Directory holding the persistent doc-embedding cache
    pub cache_dir: String,
    /// Documentation source URLs
    pub sources: Vec<String>,
    /// Character budget per chunk
    pub chunk_chars: usize,
    /// Number of chunks returned per search
    pub top_k: usize,
    /// Cached embeddings older than this are re-embedded even on hash match
    pub max_cache_age_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "aerolog")]
#[command(version, about = "Aerolog - Conversational UAV Flight Log Analysis")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// LLM API base URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub llm_api_base: Option<String>,

    /// Session TTL in seconds (overrides config file)
    #[arg(long, value_name = "SECONDS")]
    pub session_ttl: Option<u64>,

    /// Doc-embedding cache directory (overrides config file)
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<String>,

    /// Logging level (overrides config file, e.g., "info,flight_log_chat=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();
        Self::load_with_args(&cli_args)
    }

    /// Same as [`Config::load`] but with pre-parsed arguments (for tests)
    pub fn load_with_args(cli_args: &CommandLineArgs) -> Result<Self, anyhow::Error> {
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - PORT: listening port (default: 8001)
    /// - LLM_API_KEY: credential for the chat and embeddings provider
    /// - LLM_API_BASE: provider base URL
    /// - LLM_CHAT_MODEL / LLM_PARSER_MODEL / LLM_EMBED_MODEL: model identifiers
    /// - SESSION_TTL_SECONDS: session eviction TTL (default: 86400)
    /// - CACHE_DIR: directory for the persistent doc-embedding cache
    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("Override server.port from env: {}", self.server.port);
        }

        if let Ok(key) = std::env::var("LLM_API_KEY") {
            self.llm.api_key = Some(key);
            tracing::info!("Override llm.api_key from env");
        }

        if let Ok(base) = std::env::var("LLM_API_BASE") {
            self.llm.api_base = base;
            tracing::info!("Override llm.api_base from env: {}", self.llm.api_base);
        }

        if let Ok(model) = std::env::var("LLM_CHAT_MODEL") {
            self.llm.chat_model = model;
            tracing::info!("Override llm.chat_model from env: {}", self.llm.chat_model);
        }

        if let Ok(model) = std::env::var("LLM_PARSER_MODEL") {
            self.llm.parser_model = model;
            tracing::info!("Override llm.parser_model from env: {}", self.llm.parser_model);
        }

        if let Ok(model) = std::env::var("LLM_EMBED_MODEL") {
            self.llm.embed_model = model;
            tracing::info!("Override llm.embed_model from env: {}", self.llm.embed_model);
        }

        if let Ok(ttl) = std::env::var("SESSION_TTL_SECONDS") {
            match ttl.parse() {
                Ok(val) => {
                    self.session.ttl_seconds = val;
                    tracing::info!(
                        "Override session.ttl_seconds from env: {}",
                        self.session.ttl_seconds
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid SESSION_TTL_SECONDS '{}': {} (keep {})",
                    ttl,
                    e,
                    self.session.ttl_seconds
                ),
            }
        }

        if let Ok(dir) = std::env::var("CACHE_DIR") {
            self.docs.cache_dir = dir;
            tracing::info!("Override docs.cache_dir from env: {}", self.docs.cache_dir);
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(base) = &args.llm_api_base {
            self.llm.api_base = base.clone();
            tracing::info!("Override llm.api_base from CLI: {}", self.llm.api_base);
        }

        if let Some(ttl) = args.session_ttl {
            self.session.ttl_seconds = ttl;
            tracing::info!("Override session.ttl_seconds from CLI: {}", self.session.ttl_seconds);
        }

        if let Some(dir) = &args.cache_dir {
            self.docs.cache_dir = dir.clone();
            tracing::info!("Override docs.cache_dir from CLI: {}", self.docs.cache_dir);
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.llm.api_key.is_none() {
            tracing::warn!("LLM_API_KEY is not set; chat and embedding calls will fail");
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.session.ttl_seconds == 0 {
            anyhow::bail!("session.ttl_seconds must be > 0");
        }

        if self.agent.max_tool_hops == 0 {
            anyhow::bail!("agent.max_tool_hops must be > 0");
        }

        if self.docs.chunk_chars < 100 {
            anyhow::bail!("docs.chunk_chars must be >= 100");
        }

        if self.docs.top_k == 0 {
            anyhow::bail!("docs.top_k must be > 0");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8001 }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            chat_model: "gpt-4o".to_string(),
            parser_model: "gpt-4o-mini".to_string(),
            embed_model: "text-embedding-3-small".to_string(),
            timeout_seconds: 60,
            max_retries: 2,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_seconds: 86400, history_limit: 20, sweep_interval_secs: 600 }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_hops: 4,
            max_answer_retries: 2,
            max_query_retries: 1,
            turn_deadline_seconds: 120,
        }
    }
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            cache_dir: "cache".to_string(),
            sources: vec!["https://ardupilot.org/plane/docs/logmessages.html".to_string()],
            chunk_chars: 1000,
            top_k: 3,
            max_cache_age_days: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,flight_log_chat=debug".to_string(),
            file: Some("logs/aerolog.log".to_string()),
        }
    }
}
