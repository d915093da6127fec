//! Station API payloads (AzuraCast shape) and their mapping into the
//! coordinator's model.
//!
//! The wire structs are deliberately lenient: every field is optional or
//! defaulted, because a missing field must degrade to a placeholder rather
//! than fail the whole poll.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::config::StationConfig;
use crate::model::{NowPlayingSnapshot, OnDemandShow, RecentTrackEntry};

const UNKNOWN_TITLE: &str = "Unknown Title";
const UNKNOWN_ARTIST: &str = "Unknown Artist";

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct NowPlayingResponse {
    #[serde(default)]
    pub station: Option<StationDescriptor>,
    #[serde(default)]
    pub listeners: Option<Listeners>,
    #[serde(default)]
    pub now_playing: Option<CurrentPlay>,
    #[serde(default)]
    pub song_history: Option<Vec<HistoryItem>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StationDescriptor {
    #[serde(default)]
    pub shortcode: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// AzuraCast reports an object; older payloads carry a bare count.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Listeners {
    Count(u64),
    Detail {
        #[serde(default)]
        current: u64,
        #[serde(default)]
        total: u64,
        #[serde(default)]
        unique: u64,
    },
}

impl Listeners {
    pub fn current(&self) -> u64 {
        match self {
            Listeners::Count(n) => *n,
            Listeners::Detail { current, total, .. } => {
                if *current > 0 {
                    *current
                } else {
                    *total
                }
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CurrentPlay {
    #[serde(default)]
    pub song: Option<Song>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub played_at: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub elapsed: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub remaining: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub duration: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct Song {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub art: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub lyrics: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryItem {
    #[serde(default)]
    pub song: Song,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub played_at: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub duration: i64,
    #[serde(default)]
    pub playlist: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OnDemandItem {
    pub track_id: TrackId,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub media: Song,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TrackId {
    Number(u64),
    Text(String),
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackId::Number(n) => write!(f, "{}", n),
            TrackId::Text(s) => f.write_str(s),
        }
    }
}

/// Timestamps and counters: `null` or an unparseable value reads as 0 instead
/// of rejecting the payload.  Numeric strings and floats are accepted.
fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

// ── Mapping ───────────────────────────────────────────────────────────────────

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn or_default(value: Option<&str>, fallback: &str) -> String {
    non_empty(value).unwrap_or(fallback).to_string()
}

fn display_text(song: &Song, artist: &str, title: &str) -> String {
    non_empty(song.text.as_deref())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} - {}", artist, title))
}

/// URI-encode an artwork URL the way a browser would: already valid URLs are
/// normalised (spaces and non-ASCII percent-encoded, existing escapes kept).
pub fn encode_uri(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Artwork fallback chain: track art, first history entry's art, the
/// station's generic art endpoint, then the configured default.
pub fn resolve_artwork(response: &NowPlayingResponse, station: &StationConfig) -> String {
    let track_art = response
        .now_playing
        .as_ref()
        .and_then(|np| np.song.as_ref())
        .and_then(|song| non_empty(song.art.as_deref()))
        .map(str::to_string);

    let history_art = || {
        response
            .song_history
            .as_ref()
            .and_then(|h| h.first())
            .and_then(|item| non_empty(item.song.art.as_deref()))
            .map(str::to_string)
    };

    let station_art = || {
        response
            .station
            .as_ref()
            .and_then(|s| non_empty(s.shortcode.as_deref()))
            .map(|code| station.station_art_url(code))
    };

    let chosen = track_art
        .or_else(history_art)
        .or_else(station_art)
        .unwrap_or_else(|| station.default_artwork_url.clone());

    encode_uri(&chosen)
}

/// Returns `None` when nothing is on air (no current song object).
pub fn now_playing_snapshot(
    response: &NowPlayingResponse,
    station: &StationConfig,
) -> Option<NowPlayingSnapshot> {
    let current = response.now_playing.as_ref()?;
    let song = current.song.as_ref()?;

    let title = or_default(song.title.as_deref(), UNKNOWN_TITLE);
    let artist = or_default(song.artist.as_deref(), UNKNOWN_ARTIST);

    Some(NowPlayingSnapshot {
        text: display_text(song, &artist, &title),
        album: or_default(song.album.as_deref(), ""),
        genre: or_default(song.genre.as_deref(), ""),
        image_url: resolve_artwork(response, station),
        played_at: current.played_at,
        elapsed_secs: current.elapsed,
        remaining_secs: current.remaining,
        duration_secs: current.duration,
        listener_count: response.listeners.as_ref().map(Listeners::current).unwrap_or(0),
        station_shortcode: response
            .station
            .as_ref()
            .and_then(|s| s.shortcode.clone())
            .unwrap_or_default(),
        title,
        artist,
    })
}

/// Song history in API order (most recent first).  `None` when the payload has
/// no history list at all, as opposed to an empty one.
pub fn recent_tracks(response: &NowPlayingResponse) -> Option<Vec<RecentTrackEntry>> {
    let history = response.song_history.as_ref()?;
    Some(
        history
            .iter()
            .map(|item| {
                let song_title = or_default(item.song.title.as_deref(), UNKNOWN_TITLE);
                let artist = or_default(item.song.artist.as_deref(), UNKNOWN_ARTIST);
                RecentTrackEntry {
                    title: display_text(&item.song, &artist, &song_title),
                    album: or_default(item.song.album.as_deref(), ""),
                    artwork_url: non_empty(item.song.art.as_deref()).map(str::to_string),
                    played_at: item.played_at,
                    duration_secs: item.duration,
                    playlist: or_default(item.playlist.as_deref(), ""),
                    song_title,
                    artist,
                }
            })
            .collect(),
    )
}

pub fn on_demand_shows(items: &[OnDemandItem], station: &StationConfig) -> Vec<OnDemandShow> {
    items
        .iter()
        .map(|item| {
            let media = &item.media;
            let title = or_default(media.title.as_deref(), UNKNOWN_TITLE);
            let artist = or_default(media.artist.as_deref(), UNKNOWN_ARTIST);
            OnDemandShow {
                id: item.track_id.to_string(),
                text: display_text(media, &artist, &title),
                album: or_default(media.album.as_deref(), ""),
                image_url: non_empty(media.art.as_deref()).map(str::to_string),
                genre: or_default(media.genre.as_deref(), ""),
                lyrics: or_default(media.lyrics.as_deref(), ""),
                download_url: station.absolute_url(&item.download_url),
                title,
                artist,
            }
        })
        .collect()
}
