use anyhow::Context;
use sift_core::AppConfig;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sift_server::init_tracing();

    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => AppConfig::load_from(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AppConfig::load().context("failed to load config")?,
    }
    .with_env_overrides();

    sift_server::run(config).await
}
