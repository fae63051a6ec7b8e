use crate::core::error::RunnerError;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Name of the configuration file inside the configuration directory
pub const CONFIG_FILE_NAME: &str = "config.json";

// SECURITY: bind to localhost by default; the evaluate endpoint registers
// scripts and should not face the open network without a reverse proxy
pub const DEFAULT_RPC_BIND_ADDRESS: &str = "127.0.0.1:6890";

// Directory for the embedded database, relative to the configuration root
pub const DEFAULT_DB_DIR: &str = "data";

// How many recent block headers stay in memory; older reads hit the disk tier
pub const DEFAULT_HEADERS_WINDOW: usize = 120;

// Blocks applied past the startup height before evaluation begins
pub const DEFAULT_WORKING_HEIGHT_OFFSET: u64 = 2;

// Parallelism of the evaluator pool
pub const DEFAULT_EVALUATION_CONCURRENCY: usize = 4;

// Silence on the updates stream for this long counts as an upstream timeout
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 90;

pub const DEFAULT_HTTP_THREADS: usize = 2;

// Capacity of the single-consumer event channel
pub const EVENT_CHANNEL_SIZE: usize = 256;

#[derive(Parser, Debug)]
#[command(version = VERSION, about = "Incremental RIDE script evaluation sidecar")]
pub struct Config {
    /// Path to the configuration root directory
    pub config_dir: PathBuf,
    /// Optional path to the persistent request list JSON
    pub requests_file: Option<PathBuf>,
    /// Log filter (overrides RUST_LOG), e.g. "info,ride_runner=debug"
    #[clap(long)]
    pub log_level: Option<String>,
    /// Override the HTTP bind address from the config file
    #[clap(long)]
    pub bind_address: Option<String>,
}

fn default_bind_address() -> String {
    DEFAULT_RPC_BIND_ADDRESS.to_owned()
}

fn default_db_dir() -> String {
    DEFAULT_DB_DIR.to_owned()
}

fn default_headers_window() -> usize {
    DEFAULT_HEADERS_WINDOW
}

fn default_working_height_offset() -> u64 {
    DEFAULT_WORKING_HEIGHT_OFFSET
}

fn default_evaluation_concurrency() -> usize {
    DEFAULT_EVALUATION_CONCURRENCY
}

fn default_stream_timeout_secs() -> u64 {
    DEFAULT_STREAM_TIMEOUT_SECS
}

fn default_http_threads() -> usize {
    DEFAULT_HTTP_THREADS
}

// Contents of `<config_dir>/config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Base URL of the node's REST data API
    pub node_rest_url: String,
    /// Websocket URL of the blockchain-updates feed
    pub updates_ws_url: String,
    /// URL of the colocated script evaluator service
    pub evaluator_url: String,
    /// Address scheme character of the target network
    pub chain_id: char,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_db_dir")]
    pub db_dir: String,
    #[serde(default = "default_headers_window")]
    pub headers_window: usize,
    #[serde(default = "default_working_height_offset")]
    pub working_height_offset: u64,
    #[serde(default = "default_evaluation_concurrency")]
    pub evaluation_concurrency: usize,
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
    #[serde(default = "default_http_threads")]
    pub http_threads: usize,
    #[serde(default)]
    pub enable_metrics: bool,
}

impl RunnerConfig {
    pub fn load(config_dir: &Path) -> Result<Self, RunnerError> {
        let path = config_dir.join(CONFIG_FILE_NAME);
        let content = std::fs::read_to_string(&path)
            .map_err(|error| RunnerError::Config(format!("cannot read {:?}: {}", path, error)))?;
        serde_json::from_str(&content)
            .map_err(|error| RunnerError::Config(format!("cannot parse {:?}: {}", path, error)))
    }
}

// HTTP server part of the configuration
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub bind_address: String,
    pub threads: usize,
    pub enable_metrics: bool,
}

impl RpcConfig {
    pub fn from_runner_config(config: &RunnerConfig, bind_override: Option<String>) -> Self {
        RpcConfig {
            bind_address: bind_override.unwrap_or_else(|| config.bind_address.clone()),
            threads: config.http_threads,
            enable_metrics: config.enable_metrics,
        }
    }
}
