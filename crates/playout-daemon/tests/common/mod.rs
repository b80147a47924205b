#![allow(dead_code)]

use playout_daemon::estimator::RenderParams;
use playout_daemon::registry::ChannelRegistry;
use playout_daemon::renderer::{RenderOutcome, Renderer, SimulatedMatrix};
use playout_daemon::sources::media::{MediaService, MediaZone, NowPlaying};
use playout_daemon::sources::{AudioSource, FragmentSource, Playout, SourceError, TransportCode};
use playout_proto::protocol::{Channel, ChannelKind, DisplayPayload, OutputMode, PlayState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;

/// One channel of a [`FakeAudio`] source.
#[derive(Debug, Clone)]
pub struct FakeChannel {
    pub id: String,
    pub playing: bool,
    pub artist: String,
    pub track: String,
}

impl FakeChannel {
    pub fn playing(id: &str, artist: &str, track: &str) -> Self {
        Self {
            id: id.to_string(),
            playing: true,
            artist: artist.to_string(),
            track: track.to_string(),
        }
    }

    pub fn stopped(id: &str) -> Self {
        Self {
            id: id.to_string(),
            playing: false,
            artist: String::new(),
            track: String::new(),
        }
    }
}

/// Scriptable audio source.
pub struct FakeAudio {
    pub kind: ChannelKind,
    pub force: bool,
    pub active_only: bool,
    pub channels: Mutex<Vec<FakeChannel>>,
    pub fail: Mutex<bool>,
    pub delay: Mutex<Duration>,
    pub transports: Mutex<Vec<(String, TransportCode)>>,
}

impl FakeAudio {
    pub fn new(kind: ChannelKind, channels: Vec<FakeChannel>) -> Self {
        Self {
            kind,
            force: true,
            active_only: false,
            channels: Mutex::new(channels),
            fail: Mutex::new(false),
            delay: Mutex::new(Duration::ZERO),
            transports: Mutex::new(Vec::new()),
        }
    }

    pub fn set_channels(&self, channels: Vec<FakeChannel>) {
        *self.channels.lock().unwrap() = channels;
    }

    pub fn set_track(&self, id: &str, track: &str) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(channel) = channels.iter_mut().find(|c| c.id == id) {
            channel.track = track.to_string();
        }
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn transports(&self) -> Vec<(String, TransportCode)> {
        self.transports.lock().unwrap().clone()
    }

    async fn sync(&self, registry: &ChannelRegistry) -> Result<Vec<FakeChannel>, SourceError> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.fail.lock().unwrap() {
            return Err(SourceError::Offline("fake".into()));
        }
        let channels = self.channels.lock().unwrap().clone();
        let online: Vec<(String, String)> =
            channels.iter().map(|c| (c.id.clone(), c.id.clone())).collect();
        registry.sync_channels(self.kind, |_| true, &online).await;
        for channel in &channels {
            let state = if channel.playing {
                PlayState::Playing
            } else {
                PlayState::Stopped
            };
            registry.set_play_state(&channel.id, state).await;
        }
        Ok(channels)
    }
}

#[async_trait::async_trait]
impl AudioSource for FakeAudio {
    fn name(&self) -> &str {
        "fake"
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn force_updates(&self) -> bool {
        self.force
    }

    fn force_active_zone_only(&self) -> bool {
        self.active_only
    }

    async fn refresh_channels(&self, registry: &ChannelRegistry) -> Result<(), SourceError> {
        self.sync(registry).await.map(|_| ())
    }

    async fn now_playing(&self, registry: &ChannelRegistry) -> Result<Vec<Playout>, SourceError> {
        let channels = self.sync(registry).await?;
        Ok(channels
            .into_iter()
            .filter(|c| c.playing)
            .map(|c| Playout {
                zone: c.id.clone(),
                channel_id: c.id,
                origin: None,
                artist: c.artist,
                album: String::new(),
                track: c.track,
            })
            .collect())
    }

    async fn is_available(&self) -> bool {
        !*self.fail.lock().unwrap() && self.channels.lock().unwrap().iter().any(|c| c.playing)
    }

    async fn transport(&self, channel: &Channel, code: TransportCode) -> Result<(), SourceError> {
        self.transports
            .lock()
            .unwrap()
            .push((channel.id.clone(), code));
        Ok(())
    }
}

/// Fragment source returning fixed text.
pub struct FakeFragment {
    pub text: String,
    pub panic: bool,
}

impl FakeFragment {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            panic: false,
        }
    }
}

#[async_trait::async_trait]
impl FragmentSource for FakeFragment {
    fn name(&self) -> &str {
        "fragment"
    }

    async fn fragments(&self, mode: OutputMode) -> Result<Vec<DisplayPayload>, SourceError> {
        if self.panic {
            panic!("fragment source exploded");
        }
        Ok(vec![match mode {
            OutputMode::Flat => DisplayPayload::FlatText(self.text.clone()),
            OutputMode::Lines => DisplayPayload::LineSet(vec![self.text.clone()]),
        }])
    }
}

/// In-memory media-control service.
pub struct FakeMediaService {
    pub zones: Mutex<Vec<MediaZone>>,
    pub changes: broadcast::Sender<Vec<String>>,
    pub transports: Mutex<Vec<(String, TransportCode)>>,
}

impl FakeMediaService {
    pub fn new(zones: Vec<MediaZone>) -> Self {
        let (changes, _) = broadcast::channel(8);
        Self {
            zones: Mutex::new(zones),
            changes,
            transports: Mutex::new(Vec::new()),
        }
    }
}

pub fn media_zone(id: &str, name: &str, playing: Option<(&str, &str)>) -> MediaZone {
    MediaZone {
        id: id.to_string(),
        display_name: name.to_string(),
        state: if playing.is_some() {
            PlayState::Playing
        } else {
            PlayState::Stopped
        },
        shuffle: false,
        repeat: false,
        now_playing: playing.map(|(artist, track)| NowPlaying {
            artist: artist.to_string(),
            album: String::new(),
            track: track.to_string(),
        }),
    }
}

/// Shared handle so a test keeps mutating zones after the adapter owns one.
#[derive(Clone)]
pub struct MediaHandle(pub Arc<FakeMediaService>);

#[async_trait::async_trait]
impl MediaService for MediaHandle {
    async fn list_zones(&self) -> Result<Vec<MediaZone>, SourceError> {
        Ok(self.0.zones.lock().unwrap().clone())
    }

    async fn transport(&self, zone_id: &str, code: TransportCode) -> Result<(), SourceError> {
        self.0
            .transports
            .lock()
            .unwrap()
            .push((zone_id.to_string(), code));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Vec<String>> {
        self.0.changes.subscribe()
    }
}

/// Matrix whose status line can be held mid-draw, like a slow device bus.
pub struct GatedMatrix {
    pub matrix: SimulatedMatrix,
    hold: AtomicBool,
    release: Notify,
}

impl GatedMatrix {
    pub fn new(matrix: SimulatedMatrix) -> Self {
        Self {
            matrix,
            hold: AtomicBool::new(false),
            release: Notify::new(),
        }
    }

    /// Block the next status draws until [`GatedMatrix::release`].
    pub fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }
}

#[async_trait::async_trait]
impl Renderer for GatedMatrix {
    async fn render(
        &self,
        payload: &DisplayPayload,
        params: &RenderParams,
        cancel: &CancellationToken,
    ) -> anyhow::Result<RenderOutcome> {
        self.matrix.render(payload, params, cancel).await
    }

    async fn show_status(&self, text: &str) -> anyhow::Result<()> {
        if self.hold.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        self.matrix.show_status(text).await
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.matrix.clear().await
    }
}
