use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::CoordinatorError;
use crate::model::{
    NowPlayingSnapshot, OnDemandShow, PlaybackState, ReconnectState, RecentTrackEntry,
};

/// Commands accepted by the coordinator loop, from the HTTP API or `main`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Begin polling (idempotent).
    Start,
    /// Cancel the poll timers.
    Stop,
    TogglePlayPause,
    PlayOnDemandShow { show: OnDemandShow },
    ToggleOnDemandPlayPause,
    SeekTo { seconds: f64 },
    /// One-shot poll of every source, outside the timer cadence.
    Refetch,
    /// App lifecycle: came back to the foreground.
    Foreground,
    /// App lifecycle: went to the background.
    Background,
}

impl Command {
    /// Operation name used when a failed command is recorded as an error.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::TogglePlayPause => "toggle play/pause",
            Command::PlayOnDemandShow { .. } => "play on-demand show",
            Command::ToggleOnDemandPlayPause => "toggle on-demand play/pause",
            Command::SeekTo { .. } => "seek",
            Command::Refetch => "refetch",
            Command::Foreground => "foreground resume",
            Command::Background => "background",
        }
    }
}

/// Everything a caller can observe.  `rev` is a monotonically increasing
/// counter incremented on every change.
///
/// Metadata is held behind `Arc` so that a de-duplicated poll leaves the
/// published value untouched: callers can compare pointers to detect change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorState {
    #[serde(default)]
    pub rev: u64,
    pub now_playing: Option<Arc<NowPlayingSnapshot>>,
    pub recent_tracks: Option<Arc<Vec<RecentTrackEntry>>>,
    pub on_demand_shows: Arc<Vec<OnDemandShow>>,
    /// True until the first recent-tracks poll settles.
    pub loading: bool,
    /// True while an on-demand listing fetch is in flight.
    pub loading_on_demand: bool,
    pub error: Option<CoordinatorError>,
    pub playback: PlaybackState,
    /// Live player is audible.
    pub is_playing: bool,
    pub is_playing_on_demand: bool,
    pub reconnect: ReconnectState,
    /// Poll timers are armed.
    pub polling: bool,
}

impl Default for CoordinatorState {
    fn default() -> Self {
        Self {
            rev: 1,
            now_playing: None,
            recent_tracks: None,
            on_demand_shows: Arc::new(Vec::new()),
            loading: true,
            loading_on_demand: true,
            error: None,
            playback: PlaybackState::Idle,
            is_playing: false,
            is_playing_on_demand: false,
            reconnect: ReconnectState::default(),
            polling: false,
        }
    }
}

impl CoordinatorState {
    pub fn current_show(&self) -> Option<&OnDemandShow> {
        self.playback.current_show()
    }

    pub fn playback_position(&self) -> f64 {
        self.playback.position_secs()
    }

    pub fn playback_duration(&self) -> f64 {
        self.playback.duration_secs()
    }

    pub fn find_show(&self, id: &str) -> Option<&OnDemandShow> {
        self.on_demand_shows.iter().find(|s| s.id == id)
    }
}
