/// Coordinator: single-owner event loop for playback and now-playing state.
///
/// Every input arrives as a `CoordinatorEvent` on one mpsc channel: caller
/// commands, poll ticks, fetch completions, player status pushes and reconnect
/// deadlines.  The loop owns the playback state, the reconnect machine and
/// both poll timers; nothing else mutates them.
///
/// Fetches run as spawned tasks and post their result back into the loop, so
/// a poll only touches published state once it has settled.  After each
/// mutation the loop writes the `StateManager` and broadcasts
/// `BroadcastMessage::StateUpdated`.
use std::sync::Arc;

use sozo_proto::config::Config;
use sozo_proto::error::{CoordinatorError, FetchEndpoint, FetchError};
use sozo_proto::model::{
    NowPlayingSnapshot, OnDemandShow, PlaybackState, PlayerKind, PlayerStatus, ReconnectDecision,
    ReconnectState, RecentTrackEntry,
};
use sozo_proto::protocol::Command;
use sozo_proto::state::StateManager;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::api::StationApi;
use crate::player::AudioPlayer;
use crate::schedule::{schedule, PollTimer};
use crate::BroadcastMessage;


// ── CoordinatorEvent ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollSource {
    /// Now-playing snapshot and recent tracks (same endpoint, two fetches).
    NowPlaying,
    OnDemand,
}

/// All inputs into the coordinator loop.
#[derive(Debug)]
pub enum CoordinatorEvent {
    /// A command from the HTTP API or `main`.
    ClientCommand(Command),
    /// Timer tick.  `generation` identifies the `start()` that armed it.
    PollTick { source: PollSource, generation: u64 },
    NowPlayingFetched(Result<Option<NowPlayingSnapshot>, FetchError>),
    RecentTracksFetched(Result<Option<Vec<RecentTrackEntry>>, FetchError>),
    OnDemandFetched(Result<Vec<OnDemandShow>, FetchError>),
    /// Status pushed by one of the players.
    PlayerStatus { player: PlayerKind, status: PlayerStatus },
    /// Backoff elapsed for a scheduled live reconnect.
    ReconnectDue { generation: u64 },
    Shutdown,
}

// ── Coordinator ───────────────────────────────────────────────────────────────

pub struct Coordinator {
    config: Config,
    state_manager: Arc<StateManager>,
    live: Arc<dyn AudioPlayer>,
    on_demand: Arc<dyn AudioPlayer>,
    api: Arc<dyn StationApi>,
    /// Fetch tasks, timers and reconnect deadlines post back through this.
    event_tx: mpsc::Sender<CoordinatorEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,

    now_playing_timer: Option<PollTimer>,
    on_demand_timer: Option<PollTimer>,
    /// Bumped on every start/stop so queued ticks from old timers are dropped.
    timer_generation: u64,

    playback: PlaybackState,
    /// Last known "audible" flag per player.  Set optimistically by commands,
    /// corrected by status pushes.
    live_playing: bool,
    on_demand_playing: bool,

    reconnect: ReconnectState,
    reconnect_task: Option<AbortHandle>,
    reconnect_generation: u64,

    /// PlaybackState was PlayingLive when the app went to the background.
    was_live_on_background: bool,

    status_forwarders: Vec<JoinHandle<()>>,
}

impl Coordinator {
    pub fn new(
        config: Config,
        state_manager: Arc<StateManager>,
        live: Arc<dyn AudioPlayer>,
        on_demand: Arc<dyn AudioPlayer>,
        api: Arc<dyn StationApi>,
        event_tx: mpsc::Sender<CoordinatorEvent>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        let status_forwarders = vec![
            spawn_status_forwarder(PlayerKind::Live, live.subscribe(), event_tx.clone()),
            spawn_status_forwarder(PlayerKind::OnDemand, on_demand.subscribe(), event_tx.clone()),
        ];
        let reconnect = ReconnectState::new(config.reconnect.max_attempts);

        Self {
            config,
            state_manager,
            live,
            on_demand,
            api,
            event_tx,
            broadcast_tx,
            now_playing_timer: None,
            on_demand_timer: None,
            timer_generation: 0,
            playback: PlaybackState::Idle,
            live_playing: false,
            on_demand_playing: false,
            reconnect,
            reconnect_task: None,
            reconnect_generation: 0,
            was_live_on_background: false,
            status_forwarders,
        }
    }

    /// Borrow the state manager (for use by the HTTP server).
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run the event loop.  Returns when a `Shutdown` event is received or the
    /// event channel is closed.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoordinatorEvent>) -> anyhow::Result<()> {
        info!("Coordinator: starting event loop");
        self.publish_playback().await;

        loop {
            match event_rx.recv().await {
                None => {
                    info!("Coordinator: event channel closed, shutting down");
                    break;
                }
                Some(evt) => {
                    if !self.handle_event(evt).await {
                        break;
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Apply one event.  Returns `false` once the loop should exit.
    pub(crate) async fn handle_event(&mut self, evt: CoordinatorEvent) -> bool {
        match evt {
            CoordinatorEvent::Shutdown => {
                info!("Coordinator: shutdown requested");
                return false;
            }

            CoordinatorEvent::ClientCommand(cmd) => {
                info!("Coordinator: command {:?}", cmd);
                let operation = cmd.name();
                if let Err(e) = self.handle_command(cmd).await {
                    error!("Coordinator: {} failed: {:#}", operation, e);
                    self.record_error(CoordinatorError::operation(operation, &e)).await;
                }
            }

            CoordinatorEvent::PollTick { source, generation } => {
                if generation != self.timer_generation {
                    debug!("Coordinator: dropping stale {:?} tick (gen {})", source, generation);
                    return true;
                }
                match source {
                    PollSource::NowPlaying => self.poll_now_playing(),
                    PollSource::OnDemand => self.poll_on_demand().await,
                }
            }

            CoordinatorEvent::NowPlayingFetched(result) => self.apply_now_playing(result).await,
            CoordinatorEvent::RecentTracksFetched(result) => self.apply_recent_tracks(result).await,
            CoordinatorEvent::OnDemandFetched(result) => self.apply_on_demand(result).await,

            CoordinatorEvent::PlayerStatus { player, status } => match player {
                PlayerKind::Live => self.handle_live_status(status).await,
                PlayerKind::OnDemand => self.handle_on_demand_status(status).await,
            },

            CoordinatorEvent::ReconnectDue { generation } => {
                self.handle_reconnect_due(generation).await;
            }
        }
        true
    }

    async fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::Start => self.start().await,
            Command::Stop => self.stop().await,
            Command::TogglePlayPause => self.toggle_play_pause().await?,
            Command::PlayOnDemandShow { show } => self.play_on_demand_show(show).await?,
            Command::ToggleOnDemandPlayPause => self.toggle_on_demand_play_pause().await?,
            Command::SeekTo { seconds } => self.seek_to_position(seconds).await?,
            Command::Refetch => self.refetch().await,
            Command::Foreground => self.on_foreground().await?,
            Command::Background => self.on_background(),
        }
        Ok(())
    }

    // ── polling ───────────────────────────────────────────────────────────────

    /// Arm both poll timers, each firing once immediately.  A second call
    /// while both timers are running does nothing.
    async fn start(&mut self) {
        let running = |t: &Option<PollTimer>| t.as_ref().is_some_and(PollTimer::is_active);
        if running(&self.now_playing_timer) && running(&self.on_demand_timer) {
            debug!("Coordinator: already polling");
            return;
        }

        self.timer_generation += 1;
        let generation = self.timer_generation;
        let polling = &self.config.polling;

        // Assigning drops (and cancels) any half-alive timer left behind.
        self.now_playing_timer = Some(schedule(
            polling.now_playing_interval(),
            true,
            self.event_tx.clone(),
            move || CoordinatorEvent::PollTick {
                source: PollSource::NowPlaying,
                generation,
            },
        ));
        self.on_demand_timer = Some(schedule(
            polling.on_demand_interval(),
            true,
            self.event_tx.clone(),
            move || CoordinatorEvent::PollTick {
                source: PollSource::OnDemand,
                generation,
            },
        ));

        info!(
            "Coordinator: polling started (now-playing every {:?}, on-demand every {:?})",
            polling.now_playing_interval(),
            polling.on_demand_interval()
        );
        self.state_manager.set_polling(true).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    /// Cancel both timers.  In-flight fetches still land, but never re-arm.
    async fn stop(&mut self) {
        let had_timers = self.now_playing_timer.is_some() || self.on_demand_timer.is_some();
        if let Some(t) = self.now_playing_timer.take() {
            t.cancel();
        }
        if let Some(t) = self.on_demand_timer.take() {
            t.cancel();
        }
        self.timer_generation += 1;

        if had_timers {
            info!("Coordinator: polling stopped");
            self.state_manager.set_polling(false).await;
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }

    /// Poll every source once without touching the timers.
    async fn refetch(&mut self) {
        self.poll_now_playing();
        self.poll_on_demand().await;
    }

    fn poll_now_playing(&self) {
        let api = Arc::clone(&self.api);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_now_playing().await;
            let _ = tx.send(CoordinatorEvent::NowPlayingFetched(result)).await;
        });

        let api = Arc::clone(&self.api);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_recent_tracks().await;
            let _ = tx.send(CoordinatorEvent::RecentTracksFetched(result)).await;
        });
    }

    async fn poll_on_demand(&self) {
        self.state_manager.set_loading_on_demand(true).await;
        let api = Arc::clone(&self.api);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_on_demand_shows().await;
            let _ = tx.send(CoordinatorEvent::OnDemandFetched(result)).await;
        });
    }

    async fn apply_now_playing(&mut self, result: Result<Option<NowPlayingSnapshot>, FetchError>) {
        match result {
            Ok(snapshot) => {
                let mut changed = self
                    .state_manager
                    .clear_fetch_error(FetchEndpoint::NowPlaying)
                    .await;
                match snapshot {
                    Some(s) => {
                        if self.state_manager.publish_now_playing(s).await {
                            let _ = self.broadcast_tx.send(BroadcastMessage::NowPlayingUpdated);
                            changed = true;
                        }
                    }
                    None => debug!("Coordinator: station reported nothing on air"),
                }
                if changed {
                    let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
                }
            }
            Err(e) => {
                warn!("Coordinator: now-playing fetch failed: {}", e);
                self.record_error(CoordinatorError::fetch(FetchEndpoint::NowPlaying, &e))
                    .await;
            }
        }
    }

    async fn apply_recent_tracks(
        &mut self,
        result: Result<Option<Vec<RecentTrackEntry>>, FetchError>,
    ) {
        // Errors broadcast through record_error; everything else only when
        // the published state actually moved.
        let mut changed = false;
        match result {
            Ok(tracks) => {
                changed |= self
                    .state_manager
                    .clear_fetch_error(FetchEndpoint::RecentTracks)
                    .await;
                if let Some(tracks) = tracks {
                    if self.state_manager.publish_recent_tracks(tracks).await {
                        let _ = self.broadcast_tx.send(BroadcastMessage::RecentTracksUpdated);
                        changed = true;
                    }
                }
            }
            Err(e) => {
                warn!("Coordinator: recent tracks fetch failed: {}", e);
                self.record_error(CoordinatorError::fetch(FetchEndpoint::RecentTracks, &e))
                    .await;
            }
        }
        changed |= self.state_manager.set_loading(false).await;
        if changed {
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }

    async fn apply_on_demand(&mut self, result: Result<Vec<OnDemandShow>, FetchError>) {
        match result {
            Ok(shows) => {
                debug!("Coordinator: {} on-demand shows", shows.len());
                self.state_manager.set_on_demand_shows(shows).await;
                self.state_manager.clear_fetch_error(FetchEndpoint::OnDemand).await;
            }
            Err(e) => {
                warn!("Coordinator: on-demand fetch failed: {}", e);
                self.state_manager.set_on_demand_shows(Vec::new()).await;
                self.record_error(CoordinatorError::fetch(FetchEndpoint::OnDemand, &e))
                    .await;
            }
        }
        self.state_manager.set_loading_on_demand(false).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::OnDemandUpdated);
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    // ── playback commands ─────────────────────────────────────────────────────

    /// Live counts as active while we intend it to play, including while a
    /// reconnect is pending.
    fn live_active(&self) -> bool {
        self.live_playing || self.playback.is_live()
    }

    async fn toggle_play_pause(&mut self) -> anyhow::Result<()> {
        if self.on_demand_playing {
            info!("Coordinator: stopping on-demand playback for live toggle");
            self.on_demand.pause().await?;
            self.on_demand_playing = false;
            self.playback = PlaybackState::Idle;
            self.publish_playback().await;
        }

        if self.live_active() {
            // Pause is stop for a live stream: the next start reconnects.
            info!("Coordinator: stopping live stream");
            self.cancel_reconnect();
            self.live.pause().await?;
            self.live_playing = false;
            self.playback = PlaybackState::Idle;
        } else {
            info!("Coordinator: starting live stream (fresh connection)");
            self.cancel_reconnect();
            self.reconnect.reset();
            self.live.load(&self.config.station.stream_url).await?;
            self.live.play().await?;
            self.live_playing = true;
            self.playback = PlaybackState::PlayingLive;
            self.state_manager
                .clear_error_if(|e| e.is_playback_from(PlayerKind::Live))
                .await;
        }
        self.publish_playback().await;
        Ok(())
    }

    async fn play_on_demand_show(&mut self, show: OnDemandShow) -> anyhow::Result<()> {
        info!("Coordinator: playing on-demand show {} ({})", show.id, show.title);

        // The show never starts over a live stream that failed to stop.
        let live_was_active = self.live_active();
        if live_was_active {
            self.live.pause().await?;
            self.cancel_reconnect();
            self.live_playing = false;
        }

        let started = async {
            self.on_demand.load(&show.download_url).await?;
            self.on_demand.play().await
        }
        .await;

        if let Err(e) = started {
            if live_was_active {
                // Pause dropped the connection; reload to get back to the live edge.
                let url = self.config.station.stream_url.clone();
                let resumed = async {
                    self.live.load(&url).await?;
                    self.live.play().await
                }
                .await;
                match resumed {
                    Ok(()) => self.live_playing = true,
                    Err(resume_err) => warn!("Coordinator: failed to resume live: {:#}", resume_err),
                }
            }
            self.publish_playback().await;
            return Err(e);
        }

        self.on_demand_playing = true;
        self.playback = PlaybackState::on_demand(show);
        self.state_manager
            .clear_error_if(|e| e.is_playback_from(PlayerKind::OnDemand))
            .await;
        self.publish_playback().await;
        Ok(())
    }

    /// Pause or resume the current show without reloading it.
    async fn toggle_on_demand_play_pause(&mut self) -> anyhow::Result<()> {
        if self.playback.current_show().is_none() {
            debug!("Coordinator: no current show to toggle");
            return Ok(());
        }

        if self.live_playing {
            self.cancel_reconnect();
            self.live.pause().await?;
            self.live_playing = false;
        }

        if self.on_demand_playing {
            self.on_demand.pause().await?;
            self.on_demand_playing = false;
        } else {
            self.on_demand.play().await?;
            self.on_demand_playing = true;
        }
        self.publish_playback().await;
        Ok(())
    }

    async fn seek_to_position(&mut self, seconds: f64) -> anyhow::Result<()> {
        if self.playback.current_show().is_none() {
            debug!("Coordinator: seek without a current show ignored");
            return Ok(());
        }
        let target = seconds.max(0.0);
        self.on_demand.seek(target).await?;
        if let PlaybackState::PlayingOnDemand { position_secs, .. } = &mut self.playback {
            *position_secs = target;
        }
        self.publish_playback().await;
        Ok(())
    }

    // ── lifecycle ─────────────────────────────────────────────────────────────

    fn on_background(&mut self) {
        self.was_live_on_background = self.playback.is_live();
        debug!(
            "Coordinator: backgrounded (live={})",
            self.was_live_on_background
        );
    }

    /// Resume (not reconnect) a live stream the OS interrupted while we were
    /// in the background.
    async fn on_foreground(&mut self) -> anyhow::Result<()> {
        let resume = std::mem::take(&mut self.was_live_on_background)
            && self.playback.is_live()
            && !self.live_playing;
        if resume {
            info!("Coordinator: foregrounded, resuming live stream");
            self.live.play().await?;
            self.live_playing = true;
            self.publish_playback().await;
        }
        Ok(())
    }

    // ── player status ─────────────────────────────────────────────────────────

    async fn handle_live_status(&mut self, status: PlayerStatus) {
        if let Some(message) = status.error {
            self.handle_live_error(message).await;
            return;
        }
        if status.finished {
            // A live stream never ends on its own; treat EOF as a dropped connection.
            self.handle_live_error("live stream ended".to_string()).await;
            return;
        }

        if status.playing == self.live_playing && self.reconnect.attempts == 0 {
            return;
        }
        self.live_playing = status.playing;
        if status.playing && self.playback.is_live() && self.reconnect.attempts > 0 {
            info!("Coordinator: live stream recovered");
            self.reconnect.reset();
        }
        self.publish_playback().await;
    }

    async fn handle_live_error(&mut self, message: String) {
        self.live_playing = false;
        if !self.playback.is_live() {
            debug!("Coordinator: live error outside live playback ignored: {}", message);
            return;
        }

        warn!("Coordinator: live stream error: {}", message);
        match self.reconnect.record_error() {
            ReconnectDecision::Retry { attempt } => {
                self.state_manager
                    .clear_error_if(|e| e.is_playback_from(PlayerKind::Live))
                    .await;
                if self.config.reconnect.force_reload {
                    self.schedule_reconnect(attempt);
                } else {
                    // The player retries on its own; just reflect it.
                    self.reconnect.mark_reconnecting();
                }
            }
            ReconnectDecision::GiveUp => {
                warn!(
                    "Coordinator: giving up on live stream after {} attempts",
                    self.reconnect.max_attempts
                );
                self.cancel_reconnect();
                self.playback = PlaybackState::Idle;
                if let Err(e) = self.live.pause().await {
                    debug!("Coordinator: pause after give-up failed: {:#}", e);
                }
                self.record_error(CoordinatorError::playback(PlayerKind::Live, message))
                    .await;
            }
            ReconnectDecision::Ignore => {}
        }
        self.publish_playback().await;
    }

    fn schedule_reconnect(&mut self, attempt: u32) {
        self.cancel_reconnect();
        self.reconnect_generation += 1;
        let generation = self.reconnect_generation;
        let delay = self.config.reconnect.backoff(attempt);
        info!("Coordinator: live reconnect attempt {} in {:?}", attempt, delay);

        let tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CoordinatorEvent::ReconnectDue { generation }).await;
        });
        self.reconnect_task = Some(handle.abort_handle());
    }

    fn cancel_reconnect(&mut self) {
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
        self.reconnect_generation += 1;
    }

    async fn handle_reconnect_due(&mut self, generation: u64) {
        if generation != self.reconnect_generation || !self.playback.is_live() {
            debug!("Coordinator: stale reconnect deadline dropped");
            return;
        }
        self.reconnect_task = None;
        self.reconnect.mark_reconnecting();
        self.publish_playback().await;

        let url = self.config.station.stream_url.clone();
        let result = async {
            self.live.load(&url).await?;
            self.live.play().await
        }
        .await;

        match result {
            Ok(()) => {
                debug!("Coordinator: live stream reloaded");
                self.live_playing = true;
                self.publish_playback().await;
            }
            Err(e) => self.handle_live_error(format!("{:#}", e)).await,
        }
    }

    async fn handle_on_demand_status(&mut self, status: PlayerStatus) {
        if let Some(message) = status.error {
            warn!("Coordinator: on-demand player error: {}", message);
            self.on_demand_playing = false;
            self.record_error(CoordinatorError::playback(PlayerKind::OnDemand, message))
                .await;
            self.publish_playback().await;
            return;
        }

        if status.finished {
            info!("Coordinator: on-demand show finished");
            self.on_demand_playing = false;
            if self.playback.current_show().is_some() {
                self.playback = PlaybackState::Idle;
            }
            self.publish_playback().await;
            return;
        }

        self.on_demand_playing = status.playing;
        if status.playing {
            if let PlaybackState::PlayingOnDemand {
                position_secs,
                duration_secs,
                ..
            } = &mut self.playback
            {
                *position_secs = status.current_time;
                *duration_secs = status.duration;
            }
        }
        self.publish_playback().await;
    }

    // ── publishing ────────────────────────────────────────────────────────────

    async fn publish_playback(&self) {
        self.state_manager
            .set_playback(
                self.playback.clone(),
                self.live_playing,
                self.on_demand_playing,
                self.reconnect.clone(),
            )
            .await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn record_error(&self, err: CoordinatorError) {
        self.state_manager.set_error(Some(err)).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    // ── cleanup ───────────────────────────────────────────────────────────────

    async fn cleanup(&mut self) {
        info!("Coordinator: cleanup, stopping timers and players");
        self.stop().await;
        self.cancel_reconnect();
        for task in self.status_forwarders.drain(..) {
            task.abort();
        }
        self.live.shutdown().await;
        self.on_demand.shutdown().await;
    }
}

/// Relay one player's status pushes into the loop.
fn spawn_status_forwarder(
    player: PlayerKind,
    mut status_rx: broadcast::Receiver<PlayerStatus>,
    event_tx: mpsc::Sender<CoordinatorEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(status) => {
                    if event_tx
                        .send(CoordinatorEvent::PlayerStatus { player, status })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("{} player status lagged, {} updates dropped", player, n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
