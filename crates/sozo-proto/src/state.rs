use crate::error::{CoordinatorError, FetchEndpoint};
use crate::model::{
    NowPlayingSnapshot, OnDemandShow, PlaybackState, ReconnectState, RecentTrackEntry,
};
use crate::protocol::CoordinatorState;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Published view of the coordinator.  Only the coordinator loop writes;
/// the HTTP API and any other observer read snapshots via `get_state`.
///
/// Every write happens under a single lock acquisition, so a reader never
/// sees a half-applied poll.
pub struct StateManager {
    state: Arc<RwLock<CoordinatorState>>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(CoordinatorState::default())),
        }
    }

    pub async fn get_state(&self) -> CoordinatorState {
        self.state.read().await.clone()
    }

    /// Replace the snapshot unless it describes the same play as the one
    /// already published.  Returns whether anything changed.
    pub async fn publish_now_playing(&self, snapshot: NowPlayingSnapshot) -> bool {
        let mut state = self.state.write().await;
        if let Some(prev) = state.now_playing.as_deref() {
            if prev.same_play(&snapshot) {
                return false;
            }
        }
        debug!(
            "now playing: {} - {} (played_at={})",
            snapshot.artist, snapshot.title, snapshot.played_at
        );
        state.now_playing = Some(Arc::new(snapshot));
        state.rev += 1;
        true
    }

    /// Replace the history unless its length and head `played_at` match the
    /// published list.
    pub async fn publish_recent_tracks(&self, tracks: Vec<RecentTrackEntry>) -> bool {
        let mut state = self.state.write().await;
        let unchanged = state.recent_tracks.as_deref().is_some_and(|prev| {
            prev.len() == tracks.len()
                && prev.first().map(|t| t.played_at) == tracks.first().map(|t| t.played_at)
        });
        if unchanged {
            return false;
        }
        state.recent_tracks = Some(Arc::new(tracks));
        state.rev += 1;
        true
    }

    pub async fn set_on_demand_shows(&self, shows: Vec<OnDemandShow>) {
        let mut state = self.state.write().await;
        state.on_demand_shows = Arc::new(shows);
        state.rev += 1;
    }

    /// Returns whether the flag flipped.
    pub async fn set_loading(&self, loading: bool) -> bool {
        let mut state = self.state.write().await;
        if state.loading == loading {
            return false;
        }
        state.loading = loading;
        state.rev += 1;
        true
    }

    pub async fn set_loading_on_demand(&self, loading: bool) {
        let mut state = self.state.write().await;
        if state.loading_on_demand != loading {
            state.loading_on_demand = loading;
            state.rev += 1;
        }
    }

    pub async fn set_error(&self, error: Option<CoordinatorError>) {
        let mut state = self.state.write().await;
        state.error = error;
        state.rev += 1;
    }

    /// A successful poll only clears an error raised by the same endpoint;
    /// playback and operation errors stay visible.  Returns whether an error
    /// was cleared.
    pub async fn clear_fetch_error(&self, endpoint: FetchEndpoint) -> bool {
        let mut state = self.state.write().await;
        if state
            .error
            .as_ref()
            .is_some_and(|e| e.is_fetch_from(endpoint))
        {
            state.error = None;
            state.rev += 1;
            return true;
        }
        false
    }

    pub async fn clear_error_if<F>(&self, pred: F)
    where
        F: FnOnce(&CoordinatorError) -> bool,
    {
        let mut state = self.state.write().await;
        if state.error.as_ref().is_some_and(pred) {
            state.error = None;
            state.rev += 1;
        }
    }

    pub async fn set_playback(
        &self,
        playback: PlaybackState,
        is_playing: bool,
        is_playing_on_demand: bool,
        reconnect: ReconnectState,
    ) {
        let mut state = self.state.write().await;
        state.playback = playback;
        state.is_playing = is_playing;
        state.is_playing_on_demand = is_playing_on_demand;
        state.reconnect = reconnect;
        state.rev += 1;
    }

    pub async fn set_polling(&self, polling: bool) {
        let mut state = self.state.write().await;
        state.polling = polling;
        state.rev += 1;
    }
}
