use anyhow::{anyhow, Result};
use happyzone::storage::migrations;
use happyzone::{Config, SharedConfig, Storage};
use is_terminal::IsTerminal;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    let mut first_args = std::env::args().take(2);
    let (program_name, config_file) = (
        first_args.next().unwrap_or("happyzone".to_string()),
        first_args.next(),
    );

    let config = config_init(&program_name, config_file)?;
    let storage = config.open_storage().await?;

    let cancel = CancellationToken::new();
    let migration = {
        let storage = storage.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { migrations::migrate(&storage, &cancel).await })
    };
    tokio::select! {
        _ = signal::ctrl_c() => {
            cancel.cancel();
            tracing::info!("quitting from signal during migrations");
            return Ok(());
        }
        res = migration => {
            let version = res??;
            tracing::info!("storage at schema version {version}");
        }
    }

    tidy(&config, &storage).await?;

    tracing::info!("API listening on {}", &config.api_bind_addr);
    let api_server = happyzone::api::new(config.clone(), storage.clone());
    let api_handle = tokio::spawn(api_server);

    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("quitting from signal");
        },
        Ok(api_res) = api_handle => {
            if let Err(err) = api_res {
                return Err(err.into())
            }
        }
    }
    tracing::info!("goodbye");
    Ok(())
}

async fn tidy(config: &Config, storage: &Storage) -> Result<()> {
    let zones = storage.tidy_orphan_zones().await?;
    let logs = storage
        .tidy_domain_logs(OffsetDateTime::now_utc() - config.log_retention())
        .await?;
    tracing::debug!("tidied {zones} orphan zones and {logs} old log entries");
    Ok(())
}

fn tracing_init() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_ansi(std::io::stdout().is_terminal()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "happyzone=info".into()),
        )
        .init();
}

fn config_init(program_name: &str, config_file: Option<String>) -> Result<SharedConfig> {
    match config_file {
        None => Err(anyhow!("usage: {program_name} /path/to/config.json")),
        Some(config_file) => {
            tracing::debug!("loaded config from {config_file}");
            let config = Config::try_from_file(&config_file)?;
            Ok(Arc::new(config))
        }
    }
}
