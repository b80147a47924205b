//! Adapter between a media-control service and the aggregator.
//!
//! The service itself (discovery, pairing, its wire protocol) lives behind
//! [`MediaService`]; this module only maps its zones onto registry channels
//! and now-playing records.

use super::{AudioSource, Playout, SourceError, TransportCode};
use crate::registry::ChannelRegistry;
use playout_proto::config::MediaServiceConfig;
use playout_proto::protocol::{Channel, ChannelKind, PlayState};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NowPlaying {
    pub artist: String,
    pub album: String,
    pub track: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaZone {
    pub id: String,
    pub display_name: String,
    pub state: PlayState,
    pub shuffle: bool,
    pub repeat: bool,
    pub now_playing: Option<NowPlaying>,
}

#[async_trait::async_trait]
pub trait MediaService: Send + Sync {
    async fn list_zones(&self) -> Result<Vec<MediaZone>, SourceError>;

    async fn current_state(&self, zone_id: &str) -> Result<MediaZone, SourceError> {
        self.list_zones()
            .await?
            .into_iter()
            .find(|z| z.id == zone_id)
            .ok_or_else(|| SourceError::UnknownChannel("media service".into(), zone_id.to_string()))
    }

    async fn transport(&self, zone_id: &str, code: TransportCode) -> Result<(), SourceError>;

    /// Push notifications carrying the ids of zones whose state changed.
    fn subscribe(&self) -> broadcast::Receiver<Vec<String>>;
}

pub struct MediaServiceSource<M> {
    service: M,
    config: MediaServiceConfig,
}

impl<M: MediaService> MediaServiceSource<M> {
    pub fn new(service: M, config: MediaServiceConfig) -> Self {
        Self { service, config }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<String>> {
        self.service.subscribe()
    }

    async fn sync(&self, registry: &ChannelRegistry) -> Result<Vec<MediaZone>, SourceError> {
        let zones = self.service.list_zones().await?;
        let online: Vec<(String, String)> = zones
            .iter()
            .map(|z| (z.id.clone(), z.display_name.clone()))
            .collect();
        registry
            .sync_channels(ChannelKind::MediaService, |_| true, &online)
            .await;
        for zone in &zones {
            registry.set_play_state(&zone.id, zone.state).await;
            registry.set_shuffle(&zone.id, zone.shuffle).await;
            registry.set_repeat(&zone.id, zone.repeat).await;
        }
        Ok(zones)
    }
}

#[async_trait::async_trait]
impl<M: MediaService> AudioSource for MediaServiceSource<M> {
    fn name(&self) -> &str {
        "media-service"
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::MediaService
    }

    fn force_updates(&self) -> bool {
        self.config.force_update
    }

    fn force_active_zone_only(&self) -> bool {
        self.config.force_active_zone_only
    }

    async fn refresh_channels(&self, registry: &ChannelRegistry) -> Result<(), SourceError> {
        let zones = self.sync(registry).await?;
        debug!("Media service: {} zones", zones.len());
        Ok(())
    }

    async fn now_playing(&self, registry: &ChannelRegistry) -> Result<Vec<Playout>, SourceError> {
        let zones = self.sync(registry).await?;
        let selected = registry.selected_id().await;

        let mut playouts: Vec<Playout> = zones
            .into_iter()
            .filter(|z| z.state == PlayState::Playing)
            .filter_map(|z| {
                let now = z.now_playing?;
                Some(Playout {
                    channel_id: z.id,
                    origin: None,
                    zone: z.display_name,
                    artist: now.artist,
                    album: now.album,
                    track: now.track,
                })
            })
            .collect();
        // The controlled zone leads.
        if let Some(selected) = selected {
            if let Some(idx) = playouts.iter().position(|p| p.channel_id == selected) {
                let first = playouts.remove(idx);
                playouts.insert(0, first);
            }
        }
        Ok(playouts)
    }

    async fn is_available(&self) -> bool {
        match self.service.list_zones().await {
            Ok(zones) => zones.iter().any(|z| z.state == PlayState::Playing),
            Err(e) => {
                debug!("Media service probe: {}", e);
                false
            }
        }
    }

    async fn transport(&self, channel: &Channel, code: TransportCode) -> Result<(), SourceError> {
        let zone = self.service.current_state(&channel.id).await?;
        let redundant = matches!(
            (code, zone.state),
            (TransportCode::Play, PlayState::Playing) | (TransportCode::Stop, PlayState::Stopped)
        );
        if redundant {
            debug!("Media service: '{}' already {:?}", zone.display_name, zone.state);
            return Ok(());
        }
        self.service.transport(&channel.id, code).await
    }
}
