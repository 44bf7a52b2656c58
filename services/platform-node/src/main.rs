use anyhow::{bail, Context, Result};
use platform_component::{Component, RegisterOptions};
use platform_core::{logging, ComponentConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let config = match parse_config_path(&args)? {
        Some(path) => ComponentConfig::from_file(&path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ComponentConfig::from_env().context("failed to load settings from environment")?,
    };

    logging::init_with_format(config.log_format);

    let mut component = Component::new(config.component_type.clone());
    component
        .register(RegisterOptions::from_config(&config))
        .await
        .context("failed to register platform component")?;

    let shutdown = CancellationToken::new();
    component
        .start(&shutdown)
        .await
        .context("failed to start platform component")?;

    component
        .publish("test", "test")
        .await
        .context("failed to publish message")?;
    info!("message published");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown.cancel();

    if let Err(e) = component.stop().await {
        warn!(error = %e, "platform component did not stop cleanly");
    }
    Ok(())
}

fn parse_config_path(args: &[String]) -> Result<Option<PathBuf>> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            if let Some(path) = args_iter.next() {
                return Ok(Some(PathBuf::from(path)));
            }
            bail!("--config was provided without a path");
        }
    }

    Ok(None)
}
