//! In-memory fakes for the player and station API seams.

use async_trait::async_trait;
use sozo_proto::error::FetchError;
use sozo_proto::model::{NowPlayingSnapshot, OnDemandShow, PlayerKind, PlayerStatus, RecentTrackEntry};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify};

use crate::api::StationApi;
use crate::player::AudioPlayer;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Load(PlayerKind, String),
    Play(PlayerKind),
    Pause(PlayerKind),
    Seek(PlayerKind, f64),
}

/// Shared between both players so tests can assert cross-player ordering.
pub type CallLog = Arc<Mutex<Vec<Call>>>;

pub fn new_call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub struct FakePlayer {
    kind: PlayerKind,
    log: CallLog,
    fail: AtomicBool,
    status_tx: broadcast::Sender<PlayerStatus>,
}

impl FakePlayer {
    pub fn new(kind: PlayerKind, log: CallLog) -> Arc<Self> {
        let (status_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            kind,
            log,
            fail: AtomicBool::new(false),
            status_tx,
        })
    }

    /// Make every subsequent call fail (still logged).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn emit(&self, status: PlayerStatus) {
        let _ = self.status_tx.send(status);
    }

    fn record(&self, call: Call) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(call);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("{} player unavailable", self.kind);
        }
        Ok(())
    }
}

#[async_trait]
impl AudioPlayer for FakePlayer {
    async fn load(&self, url: &str) -> anyhow::Result<()> {
        self.record(Call::Load(self.kind, url.to_string()))
    }

    async fn play(&self) -> anyhow::Result<()> {
        self.record(Call::Play(self.kind))
    }

    async fn pause(&self) -> anyhow::Result<()> {
        self.record(Call::Pause(self.kind))
    }

    async fn seek(&self, position_secs: f64) -> anyhow::Result<()> {
        self.record(Call::Seek(self.kind, position_secs))
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerStatus> {
        self.status_tx.subscribe()
    }
}

pub fn calls(log: &CallLog) -> Vec<Call> {
    log.lock().unwrap().clone()
}

pub fn calls_for(log: &CallLog, kind: PlayerKind) -> Vec<Call> {
    calls(log)
        .into_iter()
        .filter(|c| match c {
            Call::Load(k, _) | Call::Play(k) | Call::Pause(k) | Call::Seek(k, _) => *k == kind,
        })
        .collect()
}

#[derive(Default)]
pub struct FakeStationApi {
    pub now_playing_calls: AtomicUsize,
    pub recent_calls: AtomicUsize,
    pub on_demand_calls: AtomicUsize,
    now_playing: Mutex<Option<NowPlayingSnapshot>>,
    recent: Mutex<Option<Vec<RecentTrackEntry>>>,
    shows: Mutex<Vec<OnDemandShow>>,
    fail_now_playing: AtomicBool,
    fail_on_demand: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeStationApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_now_playing(&self, snapshot: NowPlayingSnapshot) {
        *self.now_playing.lock().unwrap() = Some(snapshot);
    }

    pub fn set_recent(&self, tracks: Vec<RecentTrackEntry>) {
        *self.recent.lock().unwrap() = Some(tracks);
    }

    pub fn set_shows(&self, shows: Vec<OnDemandShow>) {
        *self.shows.lock().unwrap() = shows;
    }

    pub fn fail_now_playing(&self, fail: bool) {
        self.fail_now_playing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_on_demand(&self, fail: bool) {
        self.fail_on_demand.store(fail, Ordering::SeqCst);
    }

    /// Park every later fetch until `notify_waiters` is called on the
    /// returned gate.
    pub fn hold_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    async fn pass_gate(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl StationApi for FakeStationApi {
    async fn fetch_now_playing(&self) -> Result<Option<NowPlayingSnapshot>, FetchError> {
        self.now_playing_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        if self.fail_now_playing.load(Ordering::SeqCst) {
            return Err(FetchError::Status(503));
        }
        Ok(self.now_playing.lock().unwrap().clone())
    }

    async fn fetch_recent_tracks(&self) -> Result<Option<Vec<RecentTrackEntry>>, FetchError> {
        self.recent_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        if self.fail_now_playing.load(Ordering::SeqCst) {
            return Err(FetchError::Status(503));
        }
        Ok(self.recent.lock().unwrap().clone())
    }

    async fn fetch_on_demand_shows(&self) -> Result<Vec<OnDemandShow>, FetchError> {
        self.on_demand_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        if self.fail_on_demand.load(Ordering::SeqCst) {
            return Err(FetchError::Status(500));
        }
        Ok(self.shows.lock().unwrap().clone())
    }
}
