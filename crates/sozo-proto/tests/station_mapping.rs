//! Maps a full AzuraCast now-playing payload through the station module and
//! publishes it, checking the de-duplication rules end to end.

use serde_json::json;
use sozo_proto::config::StationConfig;
use sozo_proto::state::StateManager;
use sozo_proto::station::{now_playing_snapshot, recent_tracks, NowPlayingResponse};

fn payload(played_at: i64, elapsed: i64) -> serde_json::Value {
    json!({
        "station": {
            "id": 4,
            "name": "SOZO Radio",
            "shortcode": "joel_jones",
            "listen_url": "https://stream.casthost.net/listen/joel_jones/radio.mp3"
        },
        "listeners": { "total": 21, "unique": 18, "current": 18 },
        "live": { "is_live": false, "streamer_name": "" },
        "now_playing": {
            "sh_id": 991,
            "played_at": played_at,
            "duration": 245,
            "playlist": "Daytime",
            "is_request": false,
            "elapsed": elapsed,
            "remaining": 245 - elapsed,
            "song": {
                "id": "f0a1",
                "text": "Grace Band - New Morning",
                "artist": "Grace Band",
                "title": "New Morning",
                "album": "Sunrise",
                "genre": "Gospel",
                "lyrics": "",
                "art": "https://stream.casthost.net/api/station/joel_jones/art/f0a1-1700000000.jpg"
            }
        },
        "song_history": [
            {
                "sh_id": 990,
                "played_at": played_at - 200,
                "duration": 200,
                "playlist": "Daytime",
                "song": { "title": "Still Waters", "artist": "Hope Choir", "art": "" }
            },
            {
                "sh_id": 989,
                "played_at": played_at - 420,
                "duration": 220,
                "song": { "title": "Psalm 121", "artist": "Hope Choir", "album": "Psalms" }
            }
        ]
    })
}

fn parse(value: serde_json::Value) -> NowPlayingResponse {
    serde_json::from_value(value).expect("payload should parse")
}

#[test]
fn maps_full_payload() {
    let station = StationConfig::default();
    let resp = parse(payload(1_700_000_000, 40));

    let snap = now_playing_snapshot(&resp, &station).expect("song on air");
    assert_eq!(snap.title, "New Morning");
    assert_eq!(snap.artist, "Grace Band");
    assert_eq!(snap.genre, "Gospel");
    assert_eq!(snap.listener_count, 18);
    assert_eq!(snap.elapsed_secs, 40);
    assert_eq!(snap.remaining_secs, 205);
    assert_eq!(snap.station_shortcode, "joel_jones");
    assert!(snap.image_url.ends_with("f0a1-1700000000.jpg"));

    let tracks = recent_tracks(&resp).expect("history present");
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].title, "Hope Choir - Still Waters");
    assert_eq!(tracks[0].artwork_url, None);
    assert_eq!(tracks[1].album, "Psalms");
    assert!(tracks[0].played_at > tracks[1].played_at);
}

#[tokio::test]
async fn republishes_only_on_new_play() {
    let station = StationConfig::default();
    let sm = StateManager::new();

    let first = now_playing_snapshot(&parse(payload(1_700_000_000, 10)), &station).unwrap();
    assert!(sm.publish_now_playing(first).await);
    let rev = sm.get_state().await.rev;

    // Same play, later in the track: counters differ but nothing is published.
    let later = now_playing_snapshot(&parse(payload(1_700_000_000, 15)), &station).unwrap();
    assert!(!sm.publish_now_playing(later).await);
    let state = sm.get_state().await;
    assert_eq!(state.rev, rev);
    assert_eq!(state.now_playing.as_ref().unwrap().elapsed_secs, 10);

    let next = now_playing_snapshot(&parse(payload(1_700_000_245, 0)), &station).unwrap();
    assert!(sm.publish_now_playing(next).await);

    let history = recent_tracks(&parse(payload(1_700_000_245, 5))).unwrap();
    assert!(sm.publish_recent_tracks(history).await);
    let history = recent_tracks(&parse(payload(1_700_000_245, 10))).unwrap();
    assert!(!sm.publish_recent_tracks(history).await);
}
