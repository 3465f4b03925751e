//! `jupyagent-init`: container entrypoint.
//!
//! Takes no arguments. Exits with supervisord's exit code, or 1 if the
//! bootstrap could not get that far.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use jupyagent_init::bootstrap::EXIT_BOOTSTRAP_FAILED;
use jupyagent_init::{Bootstrap, Config};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Bootstrap failed: {:#}", e);
            EXIT_BOOTSTRAP_FAILED
        }
    };

    std::process::exit(code);
}

async fn run() -> anyhow::Result<i32> {
    let config = Config::from_env().context("Invalid entrypoint configuration")?;
    tracing::info!(
        user = %config.service_user,
        supervisor = %config.supervisor.config_path.display(),
        "Starting JupyAgent container"
    );

    let mut bootstrap = Bootstrap::from_config(config).context("Failed to initialise bootstrap")?;
    Ok(bootstrap.run().await)
}
