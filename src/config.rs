use std::env;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing TGTERM_API_ID: set it to your Telegram application id")]
    MissingApiId,
    #[error("missing TGTERM_API_HASH: set it to your Telegram application hash")]
    MissingApiHash,
    #[error("TGTERM_API_ID must be a number, got {0:?}")]
    InvalidApiId(String),
}

/// Telegram application credential pair. Absence of either half is a fatal
/// startup error, surfaced before any network activity.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub api_id: i32,
    pub api_hash: String,
}

impl Credentials {
    pub fn new(api_id: Option<String>, api_hash: Option<String>) -> Result<Self, ConfigError> {
        let api_id = api_id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingApiId)?;
        let api_hash = api_hash
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingApiHash)?;
        let api_id = api_id
            .parse::<i32>()
            .map_err(|_| ConfigError::InvalidApiId(api_id))?;
        Ok(Self { api_id, api_hash })
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub credentials: Credentials,
    pub gateway_url: String,
    pub runtime_dir: PathBuf,
    pub runtime_base_url: String,
    pub instance_name: String,
    pub verbosity_level: i32,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let credentials = Credentials::new(
            env::var("TGTERM_API_ID").ok(),
            env::var("TGTERM_API_HASH").ok(),
        )?;

        let gateway_url = env::var("TGTERM_GATEWAY_URL")
            .unwrap_or_else(|_| DEFAULT_GATEWAY_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let runtime_dir = env::var("TGTERM_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir().join("runtime"));

        let runtime_base_url = env::var("TGTERM_RUNTIME_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_RUNTIME_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let instance_name =
            env::var("TGTERM_INSTANCE_NAME").unwrap_or_else(|_| "tgterm".to_string());

        let verbosity_level = env::var("TGTERM_RUNTIME_VERBOSITY")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(2);

        Ok(Self {
            credentials,
            gateway_url,
            runtime_dir,
            runtime_base_url,
            instance_name,
            verbosity_level,
        })
    }
}

const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:8293/client";
const DEFAULT_RUNTIME_BASE_URL: &str = "https://cdn.jsdelivr.net/gh/tdlib/td@master/example/gateway";

fn default_data_dir() -> PathBuf {
    let base = env::var("TGTERM_DATA_DIR")
        .or_else(|_| env::var("HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
    if env::var("TGTERM_DATA_DIR").is_ok() {
        base
    } else {
        base.join(".local").join("share").join("tgterm")
    }
}
