//! Station API client.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sozo_proto::config::{PollingConfig, StationConfig};
use sozo_proto::error::FetchError;
use sozo_proto::model::{NowPlayingSnapshot, OnDemandShow, RecentTrackEntry};
use sozo_proto::station::{self, NowPlayingResponse, OnDemandItem};
use tracing::debug;

/// The three polled data sources.  Implementations return mapped model values;
/// a `None` means the station answered but had nothing to report.
#[async_trait]
pub trait StationApi: Send + Sync {
    async fn fetch_now_playing(&self) -> Result<Option<NowPlayingSnapshot>, FetchError>;

    async fn fetch_recent_tracks(&self) -> Result<Option<Vec<RecentTrackEntry>>, FetchError>;

    async fn fetch_on_demand_shows(&self) -> Result<Vec<OnDemandShow>, FetchError>;
}

pub struct HttpStationApi {
    client: reqwest::Client,
    station: StationConfig,
}

impl HttpStationApi {
    pub fn new(station: StationConfig, polling: &PollingConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("sozo-daemon/", env!("CARGO_PKG_VERSION")))
            .timeout(polling.request_timeout())
            .build()?;
        Ok(Self { client, station })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn now_playing_response(&self) -> Result<NowPlayingResponse, FetchError> {
        self.get_json(&self.station.now_playing_url()).await
    }
}

#[async_trait]
impl StationApi for HttpStationApi {
    async fn fetch_now_playing(&self) -> Result<Option<NowPlayingSnapshot>, FetchError> {
        let resp = self.now_playing_response().await?;
        Ok(station::now_playing_snapshot(&resp, &self.station))
    }

    async fn fetch_recent_tracks(&self) -> Result<Option<Vec<RecentTrackEntry>>, FetchError> {
        let resp = self.now_playing_response().await?;
        Ok(station::recent_tracks(&resp))
    }

    async fn fetch_on_demand_shows(&self) -> Result<Vec<OnDemandShow>, FetchError> {
        let items: Vec<OnDemandItem> = self.get_json(&self.station.on_demand_url()).await?;
        Ok(station::on_demand_shows(&items, &self.station))
    }
}
