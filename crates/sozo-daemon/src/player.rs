//! Audio player seam.  The coordinator drives two of these (live stream and
//! on-demand) and learns about their state only through `subscribe()`.

use async_trait::async_trait;
use sozo_proto::model::PlayerStatus;
use tokio::sync::broadcast;

#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Replace the current source.  Playback does not start until `play()`.
    async fn load(&self, url: &str) -> anyhow::Result<()>;

    async fn play(&self) -> anyhow::Result<()>;

    async fn pause(&self) -> anyhow::Result<()>;

    async fn seek(&self, position_secs: f64) -> anyhow::Result<()>;

    /// Status pushes.  Each subscriber sees every status sent after it
    /// subscribed.
    fn subscribe(&self) -> broadcast::Receiver<PlayerStatus>;

    /// Release the underlying player on daemon exit.
    async fn shutdown(&self) {}
}
