//! Content sources feeding the aggregator.
//!
//! Audio sources own registry channels and report what is playing on them.
//! Fragment sources (weather, feeds) contribute non-audio content and keep
//! their own refresh timers, so a build only formats cached data.

pub mod media;
pub mod message;
pub mod rss;
pub mod weather;
pub mod webserver;

use crate::registry::ChannelRegistry;
use playout_proto::protocol::{Channel, ChannelKind, DisplayPayload, OutputMode};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("{0} is offline")]
    Offline(String),
    #[error("{0} timed out")]
    Timeout(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed response from {source_name}: {detail}")]
    Malformed { source_name: String, detail: String },
    #[error("{0} does not know channel '{1}'")]
    UnknownChannel(String, String),
}

/// Transport command as understood by the players.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCode {
    Play,
    Stop,
    Next,
    Previous,
    Shuffle(bool),
}

impl TransportCode {
    /// Code posted to a now-playing webserver.
    pub fn as_code(&self) -> &'static str {
        match self {
            TransportCode::Play => "play",
            TransportCode::Stop => "stop",
            TransportCode::Next => "next",
            TransportCode::Previous => "previous",
            TransportCode::Shuffle(true) => "shuffle",
            TransportCode::Shuffle(false) => "noshuffle",
        }
    }
}

/// One now-playing record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Playout {
    /// Registry channel this record belongs to.
    pub channel_id: String,
    /// Webserver name for webserver channels.
    pub origin: Option<String>,
    pub zone: String,
    pub artist: String,
    pub album: String,
    pub track: String,
}

#[async_trait::async_trait]
pub trait AudioSource: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ChannelKind;

    /// Changes on this source may interrupt the current playout.
    fn force_updates(&self) -> bool;

    /// Only changes on the selected control channel interrupt.
    fn force_active_zone_only(&self) -> bool;

    /// Discover channels and sync them into the registry.
    async fn refresh_channels(&self, registry: &ChannelRegistry) -> Result<(), SourceError>;

    /// Everything currently playing, channels synced on the way.
    async fn now_playing(&self, registry: &ChannelRegistry) -> Result<Vec<Playout>, SourceError>;

    /// Cheap check whether any of this source's channels plays.
    async fn is_available(&self) -> bool;

    async fn transport(&self, channel: &Channel, code: TransportCode) -> Result<(), SourceError>;
}

/// Non-audio content for the rotation.
#[async_trait::async_trait]
pub trait FragmentSource: Send + Sync {
    fn name(&self) -> &str;

    /// Format the cached content as separate segments of the rotation.
    async fn fragments(&self, mode: OutputMode) -> Result<Vec<DisplayPayload>, SourceError>;
}
