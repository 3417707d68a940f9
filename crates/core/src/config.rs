use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub policy: PolicyConfig,
    pub tools: ToolsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
    pub statement_timeout_ms: u64,
    pub session_role: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, Default)]
pub struct PolicyConfig {
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct ToolsConfig {
    pub retrieval_url: Option<String>,
    pub web_search_enabled: bool,
    pub web_search_url: String,
    pub display_limit: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai", alias = "open_ai")]
    OpenAi,
    Anthropic,
    Ollama,
    Lambda,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub policy_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://postgres@localhost:5432/supplyq".to_string(),
                max_connections: 5,
                timeout_secs: 30,
                statement_timeout_ms: 15_000,
                session_role: Some("supplyq_reader".to_string()),
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 180,
                max_tokens: 512,
                temperature: 0.1,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            policy: PolicyConfig::default(),
            tools: ToolsConfig {
                retrieval_url: None,
                web_search_enabled: false,
                web_search_url: "https://api.duckduckgo.com".to_string(),
                display_limit: 5,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            "lambda" => Ok(Self::Lambda),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama|lambda)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("supplyq.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
            if let Some(statement_timeout_ms) = database.statement_timeout_ms {
                self.database.statement_timeout_ms = statement_timeout_ms;
            }
            if let Some(session_role) = database.session_role {
                self.database.session_role = non_empty(session_role);
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(policy) = patch.policy {
            if let Some(path) = policy.path {
                self.policy.path = Some(path);
            }
        }

        if let Some(tools) = patch.tools {
            if let Some(retrieval_url) = tools.retrieval_url {
                self.tools.retrieval_url = non_empty(retrieval_url);
            }
            if let Some(web_search_enabled) = tools.web_search_enabled {
                self.tools.web_search_enabled = web_search_enabled;
            }
            if let Some(web_search_url) = tools.web_search_url {
                self.tools.web_search_url = web_search_url;
            }
            if let Some(display_limit) = tools.display_limit {
                self.tools.display_limit = display_limit;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SUPPLYQ_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SUPPLYQ_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("SUPPLYQ_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SUPPLYQ_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SUPPLYQ_DATABASE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SUPPLYQ_DATABASE_STATEMENT_TIMEOUT_MS") {
            self.database.statement_timeout_ms =
                parse_u64("SUPPLYQ_DATABASE_STATEMENT_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = env::var("SUPPLYQ_DATABASE_SESSION_ROLE").ok() {
            self.database.session_role = non_empty(value);
        }

        if let Some(value) = read_env("SUPPLYQ_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("SUPPLYQ_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("SUPPLYQ_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("SUPPLYQ_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("SUPPLYQ_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("SUPPLYQ_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SUPPLYQ_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("SUPPLYQ_LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("SUPPLYQ_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("SUPPLYQ_LLM_TEMPERATURE", &value)?;
        }

        if let Some(value) = read_env("SUPPLYQ_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SUPPLYQ_SERVER_PORT") {
            self.server.port = parse_u16("SUPPLYQ_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SUPPLYQ_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SUPPLYQ_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("SUPPLYQ_POLICY_PATH") {
            self.policy.path = Some(PathBuf::from(value));
        }

        if let Some(value) = read_env("SUPPLYQ_TOOLS_RETRIEVAL_URL") {
            self.tools.retrieval_url = Some(value);
        }
        if let Some(value) = read_env("SUPPLYQ_TOOLS_WEB_SEARCH_ENABLED") {
            self.tools.web_search_enabled = parse_bool("SUPPLYQ_TOOLS_WEB_SEARCH_ENABLED", &value)?;
        }
        if let Some(value) = read_env("SUPPLYQ_TOOLS_WEB_SEARCH_URL") {
            self.tools.web_search_url = value;
        }
        if let Some(value) = read_env("SUPPLYQ_TOOLS_DISPLAY_LIMIT") {
            self.tools.display_limit = parse_usize("SUPPLYQ_TOOLS_DISPLAY_LIMIT", &value)?;
        }

        let log_level =
            read_env("SUPPLYQ_LOGGING_LEVEL").or_else(|| read_env("SUPPLYQ_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SUPPLYQ_LOGGING_FORMAT").or_else(|| read_env("SUPPLYQ_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(policy_path) = overrides.policy_path {
            self.policy.path = Some(policy_path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_tools(&self.tools)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("supplyq.toml"), PathBuf::from("config/supplyq.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
        return Err(ConfigError::Validation(
            "database.url must be a Postgres URL (`postgres://...` or `postgresql://...`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if database.statement_timeout_ms == 0 || database.statement_timeout_ms > 600_000 {
        return Err(ConfigError::Validation(
            "database.statement_timeout_ms must be in range 1..=600000".to_string(),
        ));
    }

    if let Some(role) = &database.session_role {
        let valid = role.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
        if !valid {
            return Err(ConfigError::Validation(
                "database.session_role may only contain letters, digits and underscores"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    let missing_key =
        llm.api_key.as_ref().map(|value| value.expose_secret().trim().is_empty()).unwrap_or(true);
    let missing_base_url =
        llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic if missing_key => {
            Err(ConfigError::Validation(
                "llm.api_key is required for openai/anthropic providers".to_string(),
            ))
        }
        LlmProvider::Ollama if missing_base_url => Err(ConfigError::Validation(
            "llm.base_url is required for ollama provider".to_string(),
        )),
        LlmProvider::Lambda if missing_key || missing_base_url => Err(ConfigError::Validation(
            "llm.api_key and llm.base_url (the Lambda function URL) are required for lambda provider"
                .to_string(),
        )),
        _ => Ok(()),
    }
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_tools(tools: &ToolsConfig) -> Result<(), ConfigError> {
    if let Some(url) = &tools.retrieval_url {
        if !is_http_url(url) {
            return Err(ConfigError::Validation(
                "tools.retrieval_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if tools.web_search_enabled && !is_http_url(&tools.web_search_url) {
        return Err(ConfigError::Validation(
            "tools.web_search_url must start with http:// or https://".to_string(),
        ));
    }

    if tools.display_limit == 0 || tools.display_limit > 100 {
        return Err(ConfigError::Validation(
            "tools.display_limit must be in range 1..=100".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid_override(key, value))
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    policy: Option<PolicyPatch>,
    tools: Option<ToolsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
    statement_timeout_ms: Option<u64>,
    session_role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyPatch {
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolsPatch {
    retrieval_url: Option<String>,
    web_search_enabled: Option<bool>,
    web_search_url: Option<String>,
    display_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_without_any_input() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.llm.provider == LlmProvider::Ollama, "default provider should be ollama")?;
        ensure(config.tools.display_limit == 5, "default display limit should be five")?;
        ensure(
            config.database.session_role.as_deref() == Some("supplyq_reader"),
            "default session role should be the restricted reader",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_SUPPLYQ_LLM_KEY", "sk-from-env");
        env::set_var("TEST_SUPPLYQ_DB_HOST", "db.internal");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("supplyq.toml");
            fs::write(
                &path,
                r#"
[database]
url = "postgres://reader@${TEST_SUPPLYQ_DB_HOST}:5432/supplyq"

[llm]
provider = "openai"
api_key = "${TEST_SUPPLYQ_LLM_KEY}"
model = "gpt-4o-mini"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "postgres://reader@db.internal:5432/supplyq",
                "database host should be interpolated from environment",
            )?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "api key should be loaded from environment",
            )?;
            ensure(config.llm.provider == LlmProvider::OpenAi, "provider should be openai")?;
            Ok(())
        })();

        clear_vars(&["TEST_SUPPLYQ_LLM_KEY", "TEST_SUPPLYQ_DB_HOST"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SUPPLYQ_LOG_LEVEL", "warn");
        env::set_var("SUPPLYQ_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["SUPPLYQ_LOG_LEVEL", "SUPPLYQ_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SUPPLYQ_DATABASE_URL", "postgres://env@localhost/supplyq");
        env::set_var("SUPPLYQ_TOOLS_DISPLAY_LIMIT", "8");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("supplyq.toml");
            fs::write(
                &path,
                r#"
[database]
url = "postgres://file@localhost/supplyq"
statement_timeout_ms = 2500

[tools]
display_limit = 3

[policy]
path = "config/access_policy.toml"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("postgres://override@localhost/supplyq".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "postgres://override@localhost/supplyq",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.tools.display_limit == 8, "env display limit should win over file")?;
            ensure(
                config.database.statement_timeout_ms == 2500,
                "file statement timeout should win over default",
            )?;
            ensure(
                config.policy.path == Some(PathBuf::from("config/access_policy.toml")),
                "policy path should come from file",
            )?;
            Ok(())
        })();

        clear_vars(&["SUPPLYQ_DATABASE_URL", "SUPPLYQ_TOOLS_DISPLAY_LIMIT"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SUPPLYQ_LLM_PROVIDER", "anthropic");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(&["SUPPLYQ_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn non_postgres_database_url_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite://supplyq.db".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        ensure(
            matches!(result, Err(ConfigError::Validation(ref message)) if message.contains("database.url")),
            "sqlite url should be rejected",
        )
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SUPPLYQ_LLM_PROVIDER", "openai");
        env::set_var("SUPPLYQ_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["SUPPLYQ_LLM_PROVIDER", "SUPPLYQ_LLM_API_KEY"]);
        result
    }
}
