/// mpv-backed `AudioPlayer`.
///
/// Architecture (one per player, so live and on-demand never share a process):
///
/// ```text
///   MpvPlayer::ensure_handle()
///         │
///         ├── MpvDriver::spawn_and_connect()
///         │       ├── writer_task   ← PendingRequest via mpsc, serialised → socket
///         │       └── reader_task   ← JSON lines from socket
///         │                              ├── response (request_id) → oneshot
///         │                              └── event / property-change → event_tx
///         └── status_task           ← MpvEvent → StatusTracker → broadcast<PlayerStatus>
/// ```
///
/// The process is spawned lazily on first use and respawned when it has died.
use async_trait::async_trait;
use serde_json::{json, Value};
use sozo_proto::model::{PlayerKind, PlayerStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::player::AudioPlayer;

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;
pub const OBS_TIME_POS: u64 = 3;
pub const OBS_DURATION: u64 = 4;

/// Minimum movement of time-pos before a new status is pushed.
const POSITION_STEP_SECS: f64 = 1.0;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load(&self, url: &str) -> anyhow::Result<()> {
        // Load paused so that play() is the only thing that starts audio.
        self.set_pause(true).await?;
        self.send(json!(["loadfile", url, "replace"])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn seek_to(&self, secs: f64) -> anyhow::Result<()> {
        self.send(json!(["set_property", "time-pos", secs])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        let _ = self.send(json!(["stop"])).await;
        Ok(())
    }

    /// Must be called after every fresh connection.
    pub async fn observe_properties(&self) {
        let props = [
            (OBS_CORE_IDLE, "core-idle"),
            (OBS_PAUSE, "pause"),
            (OBS_TIME_POS, "time-pos"),
            (OBS_DURATION, "duration"),
        ];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns one mpv child process.
pub struct MpvDriver {
    kind: PlayerKind,
    socket_name: String,
    process: Option<tokio::process::Child>,
    volume: f32,
}

impl MpvDriver {
    pub fn new(kind: PlayerKind, volume: f32) -> Self {
        Self {
            kind,
            socket_name: sozo_proto::platform::mpv_socket_name(kind),
            process: None,
            volume,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        let mpv_binary = sozo_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        info!("mpv[{}]: spawning new process", self.kind);
        let vol_arg = format!(
            "--volume={}",
            (self.volume * 100.0).clamp(0.0, 100.0).round() as i64
        );
        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--quiet")
            .arg(sozo_proto::platform::mpv_socket_arg(self.kind))
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;
        self.spawn_process()?;

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv[{}]: connected to IPC socket", self.kind);
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.spawn_process()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv[{}]: connected to named pipe", self.kind);
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    }
                } else {
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── status translation ────────────────────────────────────────────────────────

/// Folds mpv property changes into `PlayerStatus` pushes.
#[derive(Debug, Default)]
pub struct StatusTracker {
    core_idle: Option<bool>,
    pause: bool,
    time_pos: f64,
    duration: f64,
    last: Option<PlayerStatus>,
}

impl StatusTracker {
    fn current(&self) -> PlayerStatus {
        PlayerStatus {
            playing: self.core_idle == Some(false) && !self.pause,
            current_time: self.time_pos,
            duration: self.duration,
            error: None,
            finished: false,
        }
    }

    fn reset_timeline(&mut self) {
        self.core_idle = Some(true);
        self.time_pos = 0.0;
        self.duration = 0.0;
    }

    /// Returns a status to push, or `None` when nothing caller-visible moved.
    pub fn apply(&mut self, evt: &MpvEvent) -> Option<PlayerStatus> {
        if let Some((obs_id, data)) = evt.as_property_change() {
            match obs_id {
                OBS_CORE_IDLE => self.core_idle = data.as_bool(),
                OBS_PAUSE => self.pause = data.as_bool().unwrap_or(false),
                OBS_TIME_POS => self.time_pos = data.as_f64().unwrap_or(0.0),
                OBS_DURATION => self.duration = data.as_f64().unwrap_or(0.0),
                _ => return None,
            }
            return self.diff();
        }

        match evt.event_name() {
            Some("end-file") => {
                let reason = evt.raw.get("reason").and_then(|v| v.as_str()).unwrap_or("unknown");
                debug!("mpv: end-file reason={}", reason);
                self.reset_timeline();
                let status = match reason {
                    "eof" => PlayerStatus::finished(),
                    "error" | "network" => {
                        let message = evt
                            .raw
                            .get("file_error")
                            .and_then(|v| v.as_str())
                            .unwrap_or(reason);
                        PlayerStatus::failed(format!("playback ended: {}", message))
                    }
                    _ => return self.diff(),
                };
                self.last = Some(self.current());
                Some(status)
            }
            _ => None,
        }
    }

    fn diff(&mut self) -> Option<PlayerStatus> {
        let now = self.current();
        let changed = match &self.last {
            None => true,
            Some(prev) => {
                prev.playing != now.playing
                    || prev.duration != now.duration
                    || (prev.current_time - now.current_time).abs() >= POSITION_STEP_SECS
            }
        };
        if changed {
            self.last = Some(now.clone());
            Some(now)
        } else {
            None
        }
    }

    pub fn is_playing(&self) -> bool {
        self.current().playing
    }
}

// ── player ────────────────────────────────────────────────────────────────────

struct Connection {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
}

pub struct MpvPlayer {
    kind: PlayerKind,
    conn: Mutex<Connection>,
    status_tx: broadcast::Sender<PlayerStatus>,
}

impl MpvPlayer {
    pub fn new(kind: PlayerKind, volume: f32) -> Self {
        let (status_tx, _) = broadcast::channel(64);
        Self {
            kind,
            conn: Mutex::new(Connection {
                driver: MpvDriver::new(kind, volume),
                handle: None,
            }),
            status_tx,
        }
    }

    async fn ensure_handle(&self) -> anyhow::Result<MpvHandle> {
        let mut conn = self.conn.lock().await;

        if conn.handle.is_some() && !conn.driver.process_alive() {
            warn!("mpv[{}]: process died, dropping handle", self.kind);
            conn.handle = None;
        }

        if let Some(handle) = conn.handle.clone() {
            return Ok(handle);
        }

        let (event_tx, event_rx) = mpsc::channel::<MpvEvent>(64);
        let handle = conn.driver.spawn_and_connect(event_tx).await?;
        handle.observe_properties().await;
        tokio::spawn(status_task(self.kind, event_rx, self.status_tx.clone()));

        conn.handle = Some(handle.clone());
        Ok(handle)
    }
}

async fn status_task(
    kind: PlayerKind,
    mut event_rx: mpsc::Receiver<MpvEvent>,
    status_tx: broadcast::Sender<PlayerStatus>,
) {
    let mut tracker = StatusTracker::default();
    while let Some(evt) = event_rx.recv().await {
        if let Some(status) = tracker.apply(&evt) {
            let _ = status_tx.send(status);
        }
    }
    // Reader gone: mpv exited or the socket broke mid-playback.
    if tracker.is_playing() {
        warn!("mpv[{}]: IPC closed while playing", kind);
        let _ = status_tx.send(PlayerStatus::failed("mpv IPC connection closed"));
    }
}

#[async_trait]
impl AudioPlayer for MpvPlayer {
    async fn load(&self, url: &str) -> anyhow::Result<()> {
        info!("mpv[{}]: load {}", self.kind, url);
        self.ensure_handle().await?.load(url).await
    }

    async fn play(&self) -> anyhow::Result<()> {
        self.ensure_handle().await?.set_pause(false).await
    }

    async fn pause(&self) -> anyhow::Result<()> {
        let handle = self.conn.lock().await.handle.clone();
        match handle {
            Some(h) => h.set_pause(true).await,
            None => Ok(()),
        }
    }

    async fn seek(&self, position_secs: f64) -> anyhow::Result<()> {
        self.ensure_handle().await?.seek_to(position_secs).await
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerStatus> {
        self.status_tx.subscribe()
    }

    async fn shutdown(&self) {
        let mut conn = self.conn.lock().await;
        if let Some(handle) = conn.handle.take() {
            let _ = handle.stop().await;
        }
        conn.driver.kill().await;
        info!("mpv[{}]: shut down", self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(id: u64, data: Value) -> MpvEvent {
        MpvEvent {
            raw: json!({ "event": "property-change", "id": id, "data": data }),
        }
    }

    fn end_file(reason: &str) -> MpvEvent {
        MpvEvent {
            raw: json!({ "event": "end-file", "reason": reason, "file_error": "loading failed" }),
        }
    }

    #[test]
    fn playing_requires_audio_and_no_pause() {
        let mut t = StatusTracker::default();
        let s = t.apply(&prop(OBS_PAUSE, json!(false))).unwrap();
        assert!(!s.playing);
        let s = t.apply(&prop(OBS_CORE_IDLE, json!(false))).unwrap();
        assert!(s.playing);
        let s = t.apply(&prop(OBS_PAUSE, json!(true))).unwrap();
        assert!(!s.playing);
    }

    #[test]
    fn small_position_moves_are_coalesced() {
        let mut t = StatusTracker::default();
        t.apply(&prop(OBS_CORE_IDLE, json!(false)));
        assert!(t.apply(&prop(OBS_TIME_POS, json!(0.4))).is_none());
        let s = t.apply(&prop(OBS_TIME_POS, json!(1.2))).unwrap();
        assert_eq!(s.current_time, 1.2);
        assert!(t.apply(&prop(OBS_TIME_POS, json!(1.9))).is_none());
        let s = t.apply(&prop(OBS_DURATION, json!(600.0))).unwrap();
        assert_eq!(s.duration, 600.0);
    }

    #[test]
    fn end_file_maps_to_finished_or_error() {
        let mut t = StatusTracker::default();
        t.apply(&prop(OBS_CORE_IDLE, json!(false)));
        let s = t.apply(&end_file("eof")).unwrap();
        assert!(s.finished);
        assert!(!t.is_playing());

        let s = t.apply(&end_file("error")).unwrap();
        assert_eq!(s.error.as_deref(), Some("playback ended: loading failed"));
        assert!(!s.finished);
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let mut t = StatusTracker::default();
        let evt = MpvEvent {
            raw: json!({ "event": "file-loaded" }),
        };
        assert!(t.apply(&evt).is_none());
        assert!(t.apply(&prop(99, json!(1))).is_none());
    }
}
