use crate::core::CoordinatorEvent;
use crate::BroadcastMessage;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::Json,
    routing::get,
    Router,
};
use futures_util::Stream;
use sozo_proto::protocol::{Command, CoordinatorState};
use sozo_proto::state::StateManager;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<CoordinatorEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl HttpState {
    pub fn new(
        state_manager: Arc<StateManager>,
        event_tx: mpsc::Sender<CoordinatorEvent>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        Self {
            state_manager,
            event_tx,
            broadcast_tx,
        }
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/events", get(events))
        .route("/api/toggle", get(toggle).post(toggle))
        .route("/api/ondemand/toggle", get(toggle_on_demand).post(toggle_on_demand))
        .route("/api/ondemand/:id/play", get(play_show).post(play_show))
        .route("/api/seek/:secs", get(seek).post(seek))
        .route("/api/refetch", get(refetch).post(refetch))
        .route("/api/lifecycle/foreground", get(foreground).post(foreground))
        .route("/api/lifecycle/background", get(background).post(background))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(bind_address: String, port: u16, state: HttpState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn send_command(state: &HttpState, cmd: Command) -> StatusCode {
    let name = cmd.name();
    if state
        .event_tx
        .send(CoordinatorEvent::ClientCommand(cmd))
        .await
        .is_err()
    {
        error!("Failed to send {} command", name);
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn get_state(State(state): State<HttpState>) -> Json<CoordinatorState> {
    Json(state.state_manager.get_state().await)
}

/// Server-sent events: one event per broadcast, named after the change.
async fn events(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.broadcast_tx.subscribe();
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(msg) => return Some((Ok(sse_event(msg)), rx)),
                // A slow client just misses intermediate notifications.
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn sse_event(msg: BroadcastMessage) -> Event {
    match msg {
        BroadcastMessage::StateUpdated => Event::default().event("state").data("{}"),
        BroadcastMessage::NowPlayingUpdated => Event::default().event("now_playing").data("{}"),
        BroadcastMessage::RecentTracksUpdated => {
            Event::default().event("recent_tracks").data("{}")
        }
        BroadcastMessage::OnDemandUpdated => Event::default().event("on_demand").data("{}"),
        BroadcastMessage::Log(line) => Event::default().event("log").data(line),
    }
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle live");
    send_command(&state, Command::TogglePlayPause).await
}

async fn toggle_on_demand(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle on-demand");
    send_command(&state, Command::ToggleOnDemandPlayPause).await
}

async fn play_show(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    info!("HTTP API: Play on-demand show {}", id);
    let show = {
        let published = state.state_manager.get_state().await;
        match published.find_show(&id) {
            Some(show) => show.clone(),
            None => return StatusCode::NOT_FOUND,
        }
    };
    send_command(&state, Command::PlayOnDemandShow { show }).await
}

async fn seek(State(state): State<HttpState>, Path(secs): Path<f64>) -> StatusCode {
    if !secs.is_finite() || secs < 0.0 {
        return StatusCode::BAD_REQUEST;
    }
    info!("HTTP API: Seek to {}s", secs);
    send_command(&state, Command::SeekTo { seconds: secs }).await
}

async fn refetch(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Refetch");
    send_command(&state, Command::Refetch).await
}

async fn foreground(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Foreground).await
}

async fn background(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Background).await
}
