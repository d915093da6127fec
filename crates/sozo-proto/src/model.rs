use serde::{Deserialize, Serialize};

// ── Metadata ──────────────────────────────────────────────────────────────────

/// What the station says is on air right now.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NowPlayingSnapshot {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Resolved artwork URL; never empty once mapped.
    pub image_url: String,
    pub genre: String,
    /// "Artist - Title" display line.
    pub text: String,
    /// Unix timestamp at which the track started.
    pub played_at: i64,
    pub elapsed_secs: i64,
    pub remaining_secs: i64,
    pub duration_secs: i64,
    pub listener_count: u64,
    #[serde(default)]
    pub station_shortcode: String,
}

impl NowPlayingSnapshot {
    /// Two snapshots describe the same play when title, artist and start time
    /// match.  Counters (elapsed, listeners) are ignored.
    pub fn same_play(&self, other: &Self) -> bool {
        self.title == other.title && self.artist == other.artist && self.played_at == other.played_at
    }
}

/// One row of the station's song history, most recent first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecentTrackEntry {
    /// Display text, "Artist - Title" unless the station provides its own.
    pub title: String,
    pub song_title: String,
    pub artist: String,
    pub album: String,
    pub artwork_url: Option<String>,
    pub played_at: i64,
    pub duration_secs: i64,
    #[serde(default)]
    pub playlist: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OnDemandShow {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub image_url: Option<String>,
    pub text: String,
    pub genre: String,
    pub lyrics: String,
    /// Absolute URL of the audio file.
    pub download_url: String,
}

// ── Playback ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerKind {
    Live,
    OnDemand,
}

impl std::fmt::Display for PlayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerKind::Live => f.write_str("live"),
            PlayerKind::OnDemand => f.write_str("on-demand"),
        }
    }
}

/// Status pushed by an audio player.
///
/// `error` and `finished` are edge-triggered: a player reports each error or
/// end-of-file once, in a single status value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub error: Option<String>,
    pub finished: bool,
}

impl PlayerStatus {
    pub fn playing() -> Self {
        Self {
            playing: true,
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn finished() -> Self {
        Self {
            finished: true,
            ..Self::default()
        }
    }
}

/// What the coordinator believes is audible.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    PlayingLive,
    PlayingOnDemand {
        show: OnDemandShow,
        position_secs: f64,
        duration_secs: f64,
    },
}

impl PlaybackState {
    pub fn on_demand(show: OnDemandShow) -> Self {
        PlaybackState::PlayingOnDemand {
            show,
            position_secs: 0.0,
            duration_secs: 0.0,
        }
    }

    pub fn current_show(&self) -> Option<&OnDemandShow> {
        match self {
            PlaybackState::PlayingOnDemand { show, .. } => Some(show),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, PlaybackState::PlayingLive)
    }

    /// Position of the current show; 0 outside on-demand playback.
    pub fn position_secs(&self) -> f64 {
        match self {
            PlaybackState::PlayingOnDemand { position_secs, .. } => *position_secs,
            _ => 0.0,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        match self {
            PlaybackState::PlayingOnDemand { duration_secs, .. } => *duration_secs,
            _ => 0.0,
        }
    }
}

// ── Reconnect ─────────────────────────────────────────────────────────────────

/// Live stream connection phase.
///
/// Transitions:
///   Connected -> Error -> Reconnecting -> Connected | GivenUp
///   GivenUp -> Connected (only through an explicit user restart)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectPhase {
    #[default]
    Connected,
    /// Error seen, retry not yet issued.
    Error,
    Reconnecting,
    GivenUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry { attempt: u32 },
    GiveUp,
    /// Already given up; wait for the user.
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectState {
    pub attempts: u32,
    pub max_attempts: u32,
    pub phase: ReconnectPhase,
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self::new(5)
    }
}

impl ReconnectState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts: max_attempts.max(1),
            phase: ReconnectPhase::Connected,
        }
    }

    pub fn record_error(&mut self) -> ReconnectDecision {
        if self.phase == ReconnectPhase::GivenUp {
            return ReconnectDecision::Ignore;
        }
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            self.attempts = 0;
            self.phase = ReconnectPhase::GivenUp;
            ReconnectDecision::GiveUp
        } else {
            self.phase = ReconnectPhase::Error;
            ReconnectDecision::Retry {
                attempt: self.attempts,
            }
        }
    }

    pub fn mark_reconnecting(&mut self) {
        if self.phase != ReconnectPhase::GivenUp {
            self.phase = ReconnectPhase::Reconnecting;
        }
    }

    /// Player reported audio flowing, or the user restarted the stream.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.phase = ReconnectPhase::Connected;
    }
}
