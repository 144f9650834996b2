use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use linna_core::ModuleConfig;

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Server configuration: node identity, transport, sessions, dispatch limits.
#[derive(Debug, Clone, Parser)]
#[command(name = "linna-server", version, about = "Linna module host")]
pub struct ServerConfig {
    /// Name of this node, exposed to modules as the `node` context key.
    #[arg(long, env = "LINNA_NODE", default_value = "linna")]
    pub node: String,
    /// Bind address for the HTTP listener.
    #[arg(long, env = "LINNA_HOST", default_value = "0.0.0.0")]
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    #[arg(long, env = "LINNA_PORT", default_value_t = 7350)]
    pub port: u16,
    /// Secret used to sign session tokens.
    #[arg(long, env = "LINNA_SESSION_KEY", default_value = "defaultencryptionkey")]
    pub session_key: String,
    /// Session lifetime used when a caller asks for the default (expiry <= 0).
    #[arg(long, default_value_t = 7200)]
    pub session_expiry_secs: i64,
    /// Per-operation timeout in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    pub operation_timeout_ms: u64,
    /// Maximum number of concurrent operations before load shedding.
    #[arg(long, default_value_t = 1000)]
    pub max_concurrent_operations: u32,
    /// Maximum time the HTTP layer waits for a request to complete.
    #[arg(long, default_value_t = 60)]
    pub request_timeout_secs: u64,
    /// Allowed CORS origins.
    #[arg(long = "cors-origin", default_value = "*")]
    pub cors_origins: Vec<String>,
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
    /// Environment entries exposed to modules, as `KEY=VALUE`.
    #[arg(long = "env", value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,
    /// Port for the Prometheus scrape endpoint. Disabled when unset.
    #[arg(long)]
    pub metrics_port: Option<u16>,
    /// App secret used to verify Facebook Instant Game player signatures.
    #[arg(long, env = "LINNA_FACEBOOK_INSTANT_APP_SECRET")]
    pub facebook_instant_app_secret: Option<String>,
    /// Module parameters, as `MODULE.KEY=VALUE`.
    #[arg(long = "module-param", value_parser = parse_module_param)]
    pub module_params: Vec<(String, String, String)>,
    /// Peer IPs whose `X-Forwarded-For` header is trusted for the client IP.
    #[arg(long = "trusted-proxy")]
    pub trusted_proxies: Vec<IpAddr>,
    /// Seconds to wait for in-flight operations after shutdown begins.
    #[arg(long, default_value_t = 30)]
    pub drain_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node: "linna".to_string(),
            host: "0.0.0.0".to_string(),
            port: 7350,
            session_key: "defaultencryptionkey".to_string(),
            session_expiry_secs: 7200,
            operation_timeout_ms: 30_000,
            max_concurrent_operations: 1000,
            request_timeout_secs: 60,
            cors_origins: vec!["*".to_string()],
            log_format: LogFormat::Pretty,
            env: Vec::new(),
            metrics_port: None,
            facebook_instant_app_secret: None,
            module_params: Vec::new(),
            trusted_proxies: Vec::new(),
            drain_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Module environment as a map. Later duplicates win.
    #[must_use]
    pub fn env_map(&self) -> HashMap<String, String> {
        self.env.iter().cloned().collect()
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Configuration handed to the init entry point of module `name`.
    #[must_use]
    pub fn module_config(&self, name: &str) -> ModuleConfig {
        let params: BTreeMap<String, String> = self
            .module_params
            .iter()
            .filter(|(module, _, _)| module == name)
            .map(|(_, k, v)| (k.clone(), v.clone()))
            .collect();
        ModuleConfig {
            name: name.to_string(),
            env: self.env_map(),
            params,
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (k, v) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    if k.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    Ok((k.to_string(), v.to_string()))
}

fn parse_module_param(raw: &str) -> Result<(String, String, String), String> {
    let (target, value) = parse_key_value(raw)?;
    let (module, key) = target
        .split_once('.')
        .filter(|(m, k)| !m.is_empty() && !k.is_empty())
        .ok_or_else(|| format!("expected MODULE.KEY=VALUE, got `{raw}`"))?;
    Ok((module.to_string(), key.to_string(), value))
}
