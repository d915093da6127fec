mod api;
mod core;
mod http;
mod logging;
mod mpv;
mod player;
mod schedule;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use sozo_proto::config::Config;
use sozo_proto::model::PlayerKind;
use sozo_proto::protocol::Command;
use sozo_proto::state::StateManager;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::api::HttpStationApi;
use crate::core::{Coordinator, CoordinatorEvent};
use crate::mpv::MpvPlayer;

/// Change notifications fanned out to `/api/events` subscribers.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    NowPlayingUpdated,
    RecentTracksUpdated,
    OnDemandUpdated,
    Log(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let log_path = logging::init(broadcast_tx.clone())?;
    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());
    info!(
        "Station {} at {} (stream {})",
        config.station.station_id, config.station.base_url, config.station.stream_url
    );

    // Event channel: all external inputs funnel into the coordinator
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<CoordinatorEvent>(256);

    let live = Arc::new(MpvPlayer::new(PlayerKind::Live, config.mpv.default_volume));
    let on_demand = Arc::new(MpvPlayer::new(PlayerKind::OnDemand, config.mpv.default_volume));
    let api = Arc::new(HttpStationApi::new(config.station.clone(), &config.polling)?);

    let coordinator = Coordinator::new(
        config.clone(),
        Arc::new(StateManager::new()),
        live,
        on_demand,
        api,
        event_tx.clone(),
        broadcast_tx.clone(),
    );
    let state_manager = coordinator.state_manager();

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            http::HttpState::new(state_manager, event_tx.clone(), broadcast_tx.clone()),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
        let _ = shutdown_tx.send(CoordinatorEvent::Shutdown).await;
    });

    event_tx
        .send(CoordinatorEvent::ClientCommand(Command::Start))
        .await?;

    info!("Coordinator initialised, running event loop");
    coordinator.run(event_rx).await?;

    Ok(())
}
