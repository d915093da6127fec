use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::PlayerKind;

/// Failure of a single poll against the station API.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("station API returned status {0}")]
    Status(u16),

    #[error("invalid response body: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Which polled endpoint a fetch error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchEndpoint {
    NowPlaying,
    RecentTracks,
    OnDemand,
}

impl std::fmt::Display for FetchEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchEndpoint::NowPlaying => f.write_str("now-playing"),
            FetchEndpoint::RecentTracks => f.write_str("recent-tracks"),
            FetchEndpoint::OnDemand => f.write_str("on-demand"),
        }
    }
}

/// The latest error, as published to callers.  Never fatal.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details", rename_all = "snake_case")]
pub enum CoordinatorError {
    #[error("{endpoint} fetch failed: {message}")]
    Fetch {
        endpoint: FetchEndpoint,
        message: String,
    },

    #[error("{player} player error: {message}")]
    Playback { player: PlayerKind, message: String },

    #[error("{operation} failed: {message}")]
    Operation { operation: String, message: String },
}

impl CoordinatorError {
    pub fn fetch(endpoint: FetchEndpoint, err: &FetchError) -> Self {
        CoordinatorError::Fetch {
            endpoint,
            message: err.to_string(),
        }
    }

    pub fn playback(player: PlayerKind, message: impl Into<String>) -> Self {
        CoordinatorError::Playback {
            player,
            message: message.into(),
        }
    }

    pub fn operation(operation: &str, err: &anyhow::Error) -> Self {
        CoordinatorError::Operation {
            operation: operation.to_string(),
            message: format!("{:#}", err),
        }
    }

    pub fn is_fetch_from(&self, endpoint: FetchEndpoint) -> bool {
        matches!(self, CoordinatorError::Fetch { endpoint: e, .. } if *e == endpoint)
    }

    pub fn is_playback_from(&self, player: PlayerKind) -> bool {
        matches!(self, CoordinatorError::Playback { player: p, .. } if *p == player)
    }
}
