use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::OperationKind;

/// Placeholder shipped in the sample env file; treated as "no key".
pub const UNSET_API_KEY: &str = "<to be entered>";
pub const API_KEY_PREFIX: &str = "a2db_key_";
pub const MIN_API_KEY_LEN: usize = 32;

pub const CONFIG_PATH_VAR: &str = "A2FLIGHT_CLIENT_CONFIG_PATH";
const ENV_PREFIX: &str = "A2FLIGHT";
const CLIENT_ENV_PREFIX: &str = "A2FLIGHT_CLIENT";
const ENV_FILE_SEARCH_PATHS: [&str; 3] = [
    "a2flight_cl.env",
    "a2flight_cl/a2flight_cl.env",
    "../a2flight_cl/a2flight_cl.env",
];

const PROTOCOLS: [&str; 2] = ["grpc", "grpc+tls"];
const ENVIRONMENTS: [&str; 3] = ["development", "staging", "production"];
const LOG_LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];
const LOG_FORMATS: [&str; 2] = ["compact", "json"];
const OPERATIONS: [&str; 4] = ["SELECT", "INSERT", "UPDATE", "DELETE"];

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    // Identity
    pub client_name: String,
    pub api_key: String,

    // Server
    pub server_host: String,
    pub server_port: u16,
    /// `grpc` or `grpc+tls`.
    pub connection_protocol: String,
    pub enable_tls: bool,
    pub verify_tls: bool,

    // Pooling and keepalive. Carried for deployments that size channels
    // from it; the connection manager itself holds a single channel.
    pub connection_pool_size: u32,
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub idle_timeout: u64,
    pub keepalive_enabled: bool,
    pub keepalive_interval: u64,
    pub keepalive_timeout: u64,

    // Requests
    pub request_timeout: u64,
    pub max_retries: u32,
    pub retry_delay: u64,
    pub retry_backoff: f64,

    // Transfer
    pub stream_chunk_size: u64,
    pub enable_compression: bool,
    /// Upper bound for encoded and decoded gRPC messages, in bytes.
    pub max_message_size: usize,

    // Monitoring
    pub enable_request_logging: bool,
    pub log_level: String,
    /// Log format: "compact" or "json".
    pub log_format: String,
    pub log_api_keys: bool,

    // Deployment
    pub environment: String,
    pub service_name: String,

    /// CRUD verbs this client may issue.
    pub allowed_operations: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: "etl".to_string(),
            api_key: UNSET_API_KEY.to_string(),
            server_host: "localhost".to_string(),
            server_port: 50054,
            connection_protocol: "grpc".to_string(),
            enable_tls: false,
            verify_tls: true,
            connection_pool_size: 8,
            max_connections: 16,
            connection_timeout: 30,
            idle_timeout: 300,
            keepalive_enabled: true,
            keepalive_interval: 60,
            keepalive_timeout: 20,
            request_timeout: 300,
            max_retries: 3,
            retry_delay: 1,
            retry_backoff: 2.0,
            stream_chunk_size: 500_000,
            enable_compression: false,
            max_message_size: 100 * 1024 * 1024,
            enable_request_logging: false,
            log_level: "INFO".to_string(),
            log_format: "compact".to_string(),
            log_api_keys: false,
            environment: "development".to_string(),
            service_name: "a2flight_client".to_string(),
            allowed_operations: OPERATIONS.iter().map(|op| op.to_string()).collect(),
        }
    }
}

/// Outcome of [`ClientConfig::check`]: blocking errors and advisory warnings.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

static SHARED_CONFIG: OnceLock<anyhow::Result<ClientConfig>> = OnceLock::new();

impl ClientConfig {
    /// Loads the configuration from the default env file search path.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(None)
    }

    /// Loads defaults, then `env_file` (or the searched one), then the
    /// process environment, and validates the result.
    pub fn load_from(env_file: Option<&Path>) -> anyhow::Result<Self> {
        let mut vars = match env_file {
            Some(path) => read_env_file(path)?,
            None => match locate_env_file() {
                Some(path) => read_env_file(&path)?,
                None => HashMap::new(),
            },
        };
        vars.extend(std::env::vars().filter(|(key, _)| key.starts_with(ENV_PREFIX)));

        let cfg = Self::from_vars(vars)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Builds a config from `A2FLIGHT_*` variables layered over the defaults.
    ///
    /// Identity and server keys use the short prefix (`A2FLIGHT_CLIENT_NAME`,
    /// `A2FLIGHT_SERVER_HOST`); the rest use `A2FLIGHT_CLIENT_<FIELD>`.
    pub fn from_vars(vars: HashMap<String, String>) -> anyhow::Result<Self> {
        let defaults_json = serde_json::to_string(&Self::default())
            .with_context(|| "failed to serialize defaults")?;
        let settings = config::Config::builder()
            .add_source(
                config::File::from_str(&defaults_json, config::FileFormat::Json).required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .source(Some(vars.clone()))
                    .try_parsing(true),
            )
            .add_source(
                config::Environment::with_prefix(CLIENT_ENV_PREFIX)
                    .source(Some(vars))
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("allowed_operations"),
            )
            .build()
            .with_context(|| "failed to load configuration")?;
        let mut cfg: ClientConfig = settings
            .try_deserialize()
            .with_context(|| "failed to deserialize configuration")?;
        cfg.allowed_operations = cfg
            .allowed_operations
            .iter()
            .map(|op| op.trim().to_string())
            .filter(|op| !op.is_empty())
            .collect();
        Ok(cfg)
    }

    /// Process-wide configuration, loaded on first use.
    pub fn shared() -> anyhow::Result<&'static ClientConfig> {
        match SHARED_CONFIG.get_or_init(Self::load) {
            Ok(cfg) => Ok(cfg),
            Err(err) => Err(anyhow!("{err:#}")),
        }
    }

    /// `protocol://host:port`.
    pub fn server_location(&self) -> String {
        format!(
            "{}://{}:{}",
            self.connection_protocol, self.server_host, self.server_port
        )
    }

    /// The configured API key, unless it is blank or the placeholder.
    pub fn api_key(&self) -> Option<&str> {
        let key = self.api_key.trim();
        if key.is_empty() || key == UNSET_API_KEY {
            None
        } else {
            Some(key)
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn allows(&self, operation: OperationKind) -> bool {
        self.allowed_operations
            .iter()
            .any(|op| op.eq_ignore_ascii_case(operation.verb()))
    }

    /// Key for logs and summaries: redacted, or its first characters when
    /// `log_api_keys` is set.
    pub fn display_api_key(&self) -> String {
        match self.api_key() {
            None => "(not configured)".to_string(),
            Some(_) if !self.log_api_keys => "(redacted)".to_string(),
            Some(key) => {
                let head: String = key.chars().take(API_KEY_PREFIX.len() + 4).collect();
                format!("{head}***")
            }
        }
    }

    pub fn check(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        let errors = &mut report.errors;
        let warnings = &mut report.warnings;

        if self.client_name.is_empty() {
            errors.push("client_name is required".to_string());
        } else if self.client_name.len() > 50 {
            errors.push(format!(
                "client_name too long: {} chars (max 50)",
                self.client_name.len()
            ));
        } else if !self
            .client_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            errors.push("client_name must be alphanumeric with underscores only".to_string());
        }

        match self.api_key() {
            None => warnings.push(
                "no API key configured; connecting without authentication".to_string(),
            ),
            Some(key) if key.len() < MIN_API_KEY_LEN => errors.push(format!(
                "API key too short: {} chars (min {MIN_API_KEY_LEN})",
                key.len()
            )),
            Some(key) if !key.starts_with(API_KEY_PREFIX) => errors.push(format!(
                "invalid API key format; must start with '{API_KEY_PREFIX}'"
            )),
            Some(_) => {}
        }

        if self.server_host.is_empty() {
            errors.push("server_host is required".to_string());
        } else if self.server_host == "localhost" && self.is_production() {
            warnings.push(
                "server_host='localhost' in production; use the real hostname for remote deployments"
                    .to_string(),
            );
        }
        if self.server_port < 1024 {
            errors.push(format!(
                "server_port must be 1024-65535, got {}",
                self.server_port
            ));
        }
        if !PROTOCOLS.contains(&self.connection_protocol.as_str()) {
            errors.push(format!(
                "invalid connection_protocol: {}; must be one of: {}",
                self.connection_protocol,
                PROTOCOLS.join(", ")
            ));
        }

        check_range(errors, "connection_pool_size", self.connection_pool_size, 1, 100);
        check_range(errors, "max_connections", self.max_connections, 1, 200);
        if self.connection_pool_size > self.max_connections {
            errors.push(format!(
                "connection_pool_size ({}) cannot exceed max_connections ({})",
                self.connection_pool_size, self.max_connections
            ));
        }
        check_range(errors, "connection_timeout", self.connection_timeout, 5, 300);
        check_range(errors, "idle_timeout", self.idle_timeout, 60, 3600);
        check_range(errors, "request_timeout", self.request_timeout, 10, 3600);
        check_range(errors, "max_retries", self.max_retries, 0, 10);
        if !(1.0..=10.0).contains(&self.retry_backoff) {
            errors.push(format!(
                "retry_backoff must be 1.0-10.0, got {}",
                self.retry_backoff
            ));
        }
        check_range(errors, "stream_chunk_size", self.stream_chunk_size, 1_000, 10_000_000);
        check_range(
            errors,
            "max_message_size",
            self.max_message_size,
            1024 * 1024,
            1024 * 1024 * 1024,
        );

        if !LOG_LEVELS.contains(&self.log_level.to_ascii_uppercase().as_str()) {
            errors.push(format!(
                "invalid log_level: {}; must be one of: {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            ));
        }
        if !LOG_FORMATS.contains(&self.log_format.as_str()) {
            errors.push(format!(
                "invalid log_format: {}; must be one of: {}",
                self.log_format,
                LOG_FORMATS.join(", ")
            ));
        }
        if !ENVIRONMENTS.contains(&self.environment.as_str()) {
            errors.push(format!(
                "invalid environment: {}; must be one of: {}",
                self.environment,
                ENVIRONMENTS.join(", ")
            ));
        }

        if self.is_production() {
            if self.log_api_keys {
                errors.push("log_api_keys must be false in production".to_string());
            }
            if self.connection_protocol == "grpc" {
                warnings.push(
                    "production using 'grpc' without TLS; consider 'grpc+tls' for internet-facing deployments"
                        .to_string(),
                );
            }
        }

        for op in &self.allowed_operations {
            if !OPERATIONS.contains(&op.to_ascii_uppercase().as_str()) {
                errors.push(format!(
                    "invalid operation: {op}; must be one of: {}",
                    OPERATIONS.join(", ")
                ));
            }
        }

        report
    }

    /// Logs warnings and fails on any blocking error.
    pub fn validate(&self) -> anyhow::Result<()> {
        let report = self.check();
        for warning in &report.warnings {
            warn!(%warning, "configuration warning");
        }
        if report.errors.is_empty() {
            return Ok(());
        }
        Err(anyhow!(
            "configuration validation failed:\n  - {}",
            report.errors.join("\n  - ")
        ))
    }
}

fn check_range<T>(errors: &mut Vec<String>, name: &str, value: T, min: T, max: T)
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        errors.push(format!("{name} must be {min}-{max}, got {value}"));
    }
}

/// Resolves the env file: `A2FLIGHT_CLIENT_CONFIG_PATH` first, then the
/// search path relative to the working directory.
fn locate_env_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
        let path = PathBuf::from(path);
        if path.exists() {
            info!(path = %path.display(), "using config from {CONFIG_PATH_VAR}");
            return Some(path);
        }
        warn!(path = %path.display(), "config file named by {CONFIG_PATH_VAR} not found; using defaults");
        return None;
    }

    let found = ENV_FILE_SEARCH_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists());
    match &found {
        Some(path) => info!(path = %path.display(), "found client config"),
        None => warn!(
            searched = ?ENV_FILE_SEARCH_PATHS,
            "client config file not found; using defaults and process environment"
        ),
    }
    found
}

fn read_env_file(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("failed to open config file {}", path.display()))?;
    let mut vars = HashMap::new();
    for item in iter {
        let (key, value) =
            item.with_context(|| format!("failed to parse config file {}", path.display()))?;
        vars.insert(key, value);
    }
    Ok(vars)
}
