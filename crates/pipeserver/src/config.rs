use clap::Parser;
use piperuntime::RuntimeConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Server settings, from flags or the environment
#[derive(Debug, Clone, Parser)]
#[command(name = "pipeserver", about = "Brand content pipeline HTTP server", version)]
pub struct ServerConfig {
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:3000")]
    pub bind_address: String,

    /// Directory backing file storage
    #[arg(long, env = "STORAGE_ROOT", default_value = "./storage")]
    pub storage_root: PathBuf,

    /// Prefix for public URLs of stored files
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://localhost:3000/storage")]
    pub public_base_url: String,

    /// Without a gateway, AI nodes fail with "AI gateway unavailable"
    #[arg(long, env = "AI_GATEWAY_URL")]
    pub ai_gateway_url: Option<String>,

    #[arg(long, env = "TEMPLATE_RENDERER_URL", default_value = "http://template-renderer:3336")]
    pub template_renderer_url: String,

    /// JSON object `{brand_id: {name: secret}}`
    #[arg(long, env = "BRAND_CREDENTIALS_FILE")]
    pub brand_credentials_file: Option<PathBuf>,

    /// Pipelines with fewer nodes run inline
    #[arg(long, env = "PIPELINE_SIMPLE_NODE_THRESHOLD", default_value_t = 4)]
    pub simple_node_threshold: usize,

    #[arg(long, env = "PIPELINE_NODE_TIMEOUT_SECS", default_value_t = 300)]
    pub node_timeout_secs: u64,

    #[arg(long, env = "PIPELINE_MAX_CONCURRENT_RUNS", default_value_t = 4)]
    pub max_concurrent_runs: usize,
}

impl ServerConfig {
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            simple_node_threshold: self.simple_node_threshold,
            node_timeout: Duration::from_secs(self.node_timeout_secs),
            max_concurrent_runs: self.max_concurrent_runs.max(1),
            ..RuntimeConfig::default()
        }
    }
}
