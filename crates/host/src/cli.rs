use std::path::PathBuf;

use clap::Parser;
use reqwest::Url;

fn default_server_url() -> Url {
    Url::parse("http://127.0.0.1:8080").expect("default server URL must be valid")
}

#[derive(Debug, Clone, Parser)]
#[command(name = "printhostd", version, about = "3D-printer host agent")]
pub struct Cli {
    /// Coordination server base URL.
    #[arg(long, env = "PRINTHOST_SERVER_URL", default_value_t = default_server_url())]
    pub server_url: Url,

    /// Path to the host's TOML configuration file. Defaults to a
    /// per-platform configuration directory when unset.
    #[arg(long, env = "PRINTHOST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory job artifacts are downloaded into. Overrides both the
    /// configuration file and the per-platform default.
    #[arg(long, env = "PRINTHOST_DOWNLOADS_DIR")]
    pub downloads_dir: Option<PathBuf>,

    /// Log filter, in `env_logger` syntax (e.g. `info`, `printhost_engine=debug`).
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}
