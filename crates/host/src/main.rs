mod cli;
mod logging;
mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use printhost_core::{HostConfig, HostPaths};
use printhost_engine::api::commands::{self, InfoResponse};
use printhost_engine::api::socket::SocketClient;
use printhost_engine::api::ApiFacade;
use printhost_engine::downloader::Downloader;
use printhost_engine::{BotEvent, BotSource, WorkerManager};

use crate::cli::Cli;
use crate::shutdown::{spawn_signal_handler, ShutdownController, ShutdownEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let paths = HostPaths::resolve()?;
    let config_path = cli.config.clone().unwrap_or_else(|| paths.config_file());
    let file_config = HostConfig::load(&config_path)?.unwrap_or_default();

    let server_url = cli.server_url.to_string();
    let downloads_dir = cli
        .downloads_dir
        .clone()
        .or(file_config.downloads_dir.clone())
        .unwrap_or_else(|| paths.downloads_dir.clone());

    log::info!("printhostd starting, server={server_url}, downloads_dir={}", downloads_dir.display());

    let api = Arc::new(ApiFacade::new(server_url.clone(), file_config.access_token.clone()));

    if let Some(host_id) = &file_config.host_id {
        match attach_push_channel(&api, host_id).await {
            Ok(push_events) => {
                log::info!("push channel connected for host {host_id}");
                run(api, downloads_dir, Some(push_events)).await?;
                return Ok(());
            }
            Err(err) => {
                log::warn!("push channel unavailable, falling back to polling only: {err:#}");
            }
        }
    } else {
        log::info!("no host_id configured; polling only");
    }

    run(api, downloads_dir, None).await
}

/// Fetches websocket connection info via the `Info` RPC and subscribes to
/// this host's push channel. On any failure the caller falls back to
/// polling alone.
async fn attach_push_channel(
    api: &ApiFacade,
    host_id: &str,
) -> anyhow::Result<tokio::sync::mpsc::Receiver<printhost_engine::api::PushEvent>> {
    let value = api
        .command(commands::CMD_INFO, None)
        .await
        .map_err(|err| anyhow::anyhow!("Info command failed: {err}"))?
        .ok_or_else(|| anyhow::anyhow!("Info response carried no data"))?;
    let info: InfoResponse = serde_json::from_value(value)?;
    let ws = info
        .websocket
        .ok_or_else(|| anyhow::anyhow!("server did not advertise a websocket endpoint"))?;

    let channel = format!("private-hosts.{host_id}");
    let (client, events) = SocketClient::connect(&ws.url, &channel).await?;
    api.attach_socket(client).await;
    Ok(events)
}

async fn run(
    api: Arc<ApiFacade>,
    downloads_dir: std::path::PathBuf,
    push_events: Option<tokio::sync::mpsc::Receiver<printhost_engine::api::PushEvent>>,
) -> anyhow::Result<()> {
    let downloader = Arc::new(Downloader::new(reqwest::Client::new(), downloads_dir));
    let mut manager = WorkerManager::new(api.clone(), downloader);

    let mut bot_events = BotSource::new(api).spawn(push_events);

    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_signal_handler(shutdown.clone(), shutdown_tx);

    let mut status_ticker = tokio::time::interval(Duration::from_secs(60));

    loop {
        tokio::select! {
            event = shutdown_rx.recv() => {
                match event {
                    Some(ShutdownEvent::Graceful) => {
                        log::info!("shutdown requested, stopping workers");
                        break;
                    }
                    Some(ShutdownEvent::Immediate) | None => {
                        log::warn!("immediate shutdown requested");
                        std::process::exit(130);
                    }
                }
            }
            _ = status_ticker.tick() => {
                log::debug!("printhostd alive");
            }
            event = bot_events.recv() => {
                match event {
                    Some(BotEvent::Added(bot)) => {
                        log::info!("bot added: {}", bot.id);
                        manager.bot_added(bot).await;
                    }
                    Some(BotEvent::Updated(bot)) => {
                        log::debug!("bot updated: {}", bot.id);
                        manager.bot_updated(bot).await;
                    }
                    Some(BotEvent::Removed(id)) => {
                        log::info!("bot removed: {id}");
                        manager.bot_removed(&id).await;
                    }
                    None => {
                        log::warn!("bot source closed unexpectedly");
                        break;
                    }
                }
            }
        }
    }

    manager.shutdown_all().await;
    log::info!("printhostd stopped");
    Ok(())
}
