use std::str::FromStr;

use taskmon_comfyui::client::ws_url_from_api_url;
use taskmon_core::workflow::DEFAULT_MONITOR_NODE_KIND;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for running next to a local ComfyUI.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8189`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// ComfyUI HTTP base URL.
    pub comfyui_api_url: String,
    /// ComfyUI WebSocket base URL.
    pub comfyui_ws_url: String,
    /// Timeout for each ComfyUI REST call, in seconds (default: `5`).
    pub comfyui_request_timeout_secs: u64,
    /// Node kind excluded from progress counts.
    pub monitor_node_kind: String,
    /// Directory served under `/task_monitor/`.
    pub web_dir: String,
    /// Upper bound of the WebSocket reconnect backoff, in seconds. Never 0.
    pub reconnect_max_delay_secs: u64,
    /// Shared token the event ingress requires, if set.
    pub events_token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                      |
    /// |--------------------------------|------------------------------|
    /// | `HOST`                         | `0.0.0.0`                    |
    /// | `PORT`                         | `8189`                       |
    /// | `CORS_ORIGINS`                 | `http://localhost:8188`      |
    /// | `REQUEST_TIMEOUT_SECS`         | `30`                         |
    /// | `COMFYUI_API_URL`              | `http://127.0.0.1:8188`      |
    /// | `COMFYUI_WS_URL`               | derived from the API URL     |
    /// | `COMFYUI_REQUEST_TIMEOUT_SECS` | `5`                          |
    /// | `MONITOR_NODE_KIND`            | `TaskMonitorNode`            |
    /// | `WEB_DIR`                      | `web`                        |
    /// | `RECONNECT_MAX_DELAY_SECS`     | `30` (must be at least 1)    |
    /// | `EVENTS_TOKEN`                 | unset (ingress is open)      |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.into());

        let comfyui_api_url = string("COMFYUI_API_URL", "http://127.0.0.1:8188");
        let comfyui_ws_url =
            lookup("COMFYUI_WS_URL").unwrap_or_else(|| ws_url_from_api_url(&comfyui_api_url));

        let cors_origins: Vec<String> = string("CORS_ORIGINS", "http://localhost:8188")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host: string("HOST", "0.0.0.0"),
            port: parse(&lookup, "PORT", 8189)?,
            cors_origins,
            request_timeout_secs: parse(&lookup, "REQUEST_TIMEOUT_SECS", 30)?,
            comfyui_api_url,
            comfyui_ws_url,
            comfyui_request_timeout_secs: parse(&lookup, "COMFYUI_REQUEST_TIMEOUT_SECS", 5)?,
            monitor_node_kind: string("MONITOR_NODE_KIND", DEFAULT_MONITOR_NODE_KIND),
            web_dir: string("WEB_DIR", "web"),
            reconnect_max_delay_secs: parse_positive(&lookup, "RECONNECT_MAX_DELAY_SECS", 30)?,
            events_token: lookup("EVENTS_TOKEN").filter(|t| !t.trim().is_empty()),
        })
    }
}

fn parse<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

/// Like [`parse`], rejecting 0.
fn parse_positive<F>(lookup: &F, var: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse(lookup, var, default)? {
        0 => Err(ConfigError::Invalid {
            var,
            value: "0".into(),
        }),
        value => Ok(value),
    }
}
