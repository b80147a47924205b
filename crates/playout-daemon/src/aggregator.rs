//! Content Aggregator: one build of the next payload from every source.
//!
//! Precedence per build:
//! 1. an exclusive operator message replaces everything else;
//! 2. audio fragments are always included;
//! 3. non-audio fragments (operator message, weather, feeds, date/time)
//!    only when the music-required / exclusive-audio settings allow it.
//!
//! Sources that fail or time out contribute nothing and are logged.

use crate::registry::ChannelRegistry;
use crate::sources::message::MessageBoard;
use crate::sources::{AudioSource, FragmentSource, Playout};
use chrono::{DateTime, Local};
use futures_util::future::join_all;
use playout_proto::config::{Config, DateTimeConfig, DisplayConfig, LanguageConfig};
use playout_proto::protocol::{DisplayPayload, MessageMode, OperatorMessage, OutputMode};
use playout_proto::text::{text_width_px, to_ascii, wrap_into};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of one build.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub payload: DisplayPayload,
    /// Differs from the previous build's payload.
    pub changed: bool,
    /// A forced build saw a new playout on a channel allowed to interrupt.
    pub control_changed: bool,
    pub audio_empty: bool,
    pub took: Duration,
}

impl Aggregation {
    /// Stand-in for a build that failed outright.
    pub fn failed(mode: OutputMode, took: Duration) -> Self {
        Self {
            payload: DisplayPayload::empty(mode),
            changed: false,
            control_changed: false,
            audio_empty: true,
            took,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub display: DisplayConfig,
    pub language: LanguageConfig,
    pub datetime: DateTimeConfig,
    pub music_required: bool,
    pub exclusive_audio_mode: bool,
    pub source_timeout: Duration,
}

impl AggregatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            display: config.display.clone(),
            language: config.language.clone(),
            datetime: config.datetime.clone(),
            music_required: config.schedule.music_required,
            exclusive_audio_mode: config.schedule.exclusive_audio_mode,
            source_timeout: Duration::from_secs(config.schedule.source_timeout_secs.max(1)),
        }
    }

    fn mode(&self) -> OutputMode {
        self.display.output_mode
    }

    fn width(&self) -> u32 {
        self.display.device_width_px()
    }

    fn ascii(&self, text: &str) -> String {
        to_ascii(text, &self.language.conversions)
    }
}

/// Whether non-audio content joins this round.
pub fn show_non_audio(music_required: bool, exclusive_audio_mode: bool, audio_empty: bool) -> bool {
    (!exclusive_audio_mode && !music_required)
        || (exclusive_audio_mode && audio_empty)
        || (music_required && !audio_empty)
}

// ── payload assembly ──────────────────────────────────────────────────────────

struct PayloadBuilder {
    mode: OutputMode,
    joiner: String,
    flat: String,
    lines: Vec<String>,
}

impl PayloadBuilder {
    fn new(mode: OutputMode, joiner: String) -> Self {
        Self {
            mode,
            joiner,
            flat: String::new(),
            lines: Vec::new(),
        }
    }

    /// Flat segments are joined with the separator, line blocks with a
    /// blank line.
    fn push(&mut self, fragment: DisplayPayload) {
        match fragment {
            DisplayPayload::FlatText(text) if !text.is_empty() => {
                if !self.flat.is_empty() {
                    self.flat.push_str(&self.joiner);
                }
                self.flat.push_str(&text);
            }
            DisplayPayload::LineSet(lines) if !lines.is_empty() => {
                if !self.lines.is_empty() {
                    self.lines.push(String::new());
                }
                self.lines.extend(lines);
            }
            _ => {}
        }
    }

    fn is_empty(&self) -> bool {
        match self.mode {
            OutputMode::Flat => self.flat.is_empty(),
            OutputMode::Lines => self.lines.is_empty(),
        }
    }

    fn finish(self) -> DisplayPayload {
        match self.mode {
            OutputMode::Flat => DisplayPayload::FlatText(self.flat),
            OutputMode::Lines => DisplayPayload::LineSet(self.lines),
        }
    }
}

/// `label: value` on one line when it fits, else the label on its own line
/// followed by the wrapped value.
fn push_labelled(label: &str, value: &str, width: u32, lines: &mut Vec<String>) {
    let joined = format!("{}: {}", label, value);
    if text_width_px(&joined) > width {
        lines.push(label.to_string());
        wrap_into(value, width, lines);
    } else {
        wrap_into(&joined, width, lines);
    }
}

/// One now-playing record as a fragment.  `first` marks the first audio
/// fragment of the build, which carries the headline.
pub fn format_playout(
    playout: &Playout,
    controlled: bool,
    first: bool,
    settings: &AggregatorSettings,
) -> DisplayPayload {
    let display = &settings.display;
    let msg = |key: &str| settings.language.message(key);
    let marker = if controlled { "[*] " } else { "" };

    match settings.mode() {
        OutputMode::Flat => {
            let mut text = String::new();
            if first && !display.playing_headline.is_empty() {
                text.push_str(&display.playing_headline);
                text.push_str(": ");
            }
            if display.show_zone {
                if let Some(origin) = &playout.origin {
                    text.push_str(&format!("{}: {} => ", msg("Source"), origin));
                }
                text.push_str(&format!("{}: {}{} => ", msg("Zone"), marker, playout.zone));
            }
            if !playout.artist.is_empty() {
                text.push_str(&format!("{}: \"{}\" / ", msg("Artist"), playout.artist));
            }
            if display.show_album && !playout.album.is_empty() {
                text.push_str(&format!("{}: \"{}\" / ", msg("Album"), playout.album));
            }
            text.push_str(&format!("{}: \"{}\"", msg("Track"), playout.track));
            DisplayPayload::FlatText(settings.ascii(&text))
        }
        OutputMode::Lines => {
            let width = settings.width();
            let ascii = |s: &str| settings.ascii(s);
            let mut lines = Vec::new();
            if first && !display.playing_headline.is_empty() {
                wrap_into(&ascii(&display.playing_headline), width, &mut lines);
            }
            if display.show_zone {
                if let Some(origin) = &playout.origin {
                    push_labelled(&msg("Source"), &ascii(origin), width, &mut lines);
                }
                push_labelled(
                    &format!("{}{}", marker, msg("Zone")),
                    &ascii(&playout.zone),
                    width,
                    &mut lines,
                );
            }
            let labels = display.show_music_labels;
            if !playout.artist.is_empty() {
                if labels {
                    lines.push(format!("< {} >", msg("Artist")));
                }
                wrap_into(&ascii(&playout.artist), width, &mut lines);
            }
            if display.show_album && !playout.album.is_empty() {
                if labels {
                    lines.push(format!("< {} >", msg("Album")));
                }
                wrap_into(&ascii(&playout.album), width, &mut lines);
            }
            if labels {
                lines.push(format!("< {} >", msg("Track")));
                wrap_into(&ascii(&playout.track), width, &mut lines);
            } else {
                wrap_into(&ascii(&format!("=> {}", playout.track)), width, &mut lines);
            }
            DisplayPayload::LineSet(lines)
        }
    }
}

pub fn format_message(message: &OperatorMessage, settings: &AggregatorSettings) -> DisplayPayload {
    let text = settings.ascii(&message.text);
    match settings.mode() {
        OutputMode::Flat if message.mode == MessageMode::Exclusive => {
            DisplayPayload::FlatText(format!("{}{}", settings.display.joiner(), text))
        }
        OutputMode::Flat => DisplayPayload::FlatText(text),
        OutputMode::Lines => {
            let mut lines = Vec::new();
            wrap_into(&format!("> {}", text), settings.width(), &mut lines);
            DisplayPayload::LineSet(lines)
        }
    }
}

pub fn format_datetime(now: DateTime<Local>, settings: &AggregatorSettings) -> DisplayPayload {
    let language = &settings.language;
    let text = if settings.datetime.only_time {
        format!("{}: {}", language.message("time"), now.format("%H:%M:%S"))
    } else {
        format!("{}: {}", language.message("date"), now.format("%Y-%m-%d %H:%M:%S"))
    };
    match settings.mode() {
        OutputMode::Flat => DisplayPayload::FlatText(text),
        OutputMode::Lines => {
            let mut lines = Vec::new();
            wrap_into(&text, settings.width(), &mut lines);
            DisplayPayload::LineSet(lines)
        }
    }
}

// ── aggregator ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct BuildState {
    last_payload: Option<DisplayPayload>,
    /// Last seen playout per channel, pruned to what is playing.
    playouts: HashMap<String, Playout>,
}

pub struct Aggregator {
    settings: AggregatorSettings,
    registry: Arc<ChannelRegistry>,
    audio: Vec<Arc<dyn AudioSource>>,
    fragments: Vec<Arc<dyn FragmentSource>>,
    messages: Arc<MessageBoard>,
    /// Held for a whole build, so builds never interleave.
    state: Mutex<BuildState>,
}

impl Aggregator {
    pub fn new(
        settings: AggregatorSettings,
        registry: Arc<ChannelRegistry>,
        audio: Vec<Arc<dyn AudioSource>>,
        fragments: Vec<Arc<dyn FragmentSource>>,
        messages: Arc<MessageBoard>,
    ) -> Self {
        Self {
            settings,
            registry,
            audio,
            fragments,
            messages,
            state: Mutex::new(BuildState::default()),
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.settings.mode()
    }

    pub fn audio_sources(&self) -> &[Arc<dyn AudioSource>] {
        &self.audio
    }

    /// Payload standing in for an operator message that preempts playout.
    pub fn message_payload(&self, message: &OperatorMessage) -> DisplayPayload {
        format_message(message, &self.settings)
    }

    pub async fn aggregate(&self, force: bool) -> Aggregation {
        let started = Instant::now();
        let mut state = self.state.lock().await;
        let settings = &self.settings;
        let mode = settings.mode();

        // ── audio ──
        let mut playing: Vec<(Playout, bool, bool)> = Vec::new();
        // Queried concurrently, results kept in source order.
        let results = join_all(self.audio.iter().map(|source| {
            tokio::time::timeout(settings.source_timeout, source.now_playing(&self.registry))
        }))
        .await;
        for (source, result) in self.audio.iter().zip(results) {
            let playouts = match result {
                Ok(Ok(playouts)) => playouts,
                Ok(Err(e)) => {
                    warn!("Aggregator: {} failed: {}", source.name(), e);
                    continue;
                }
                Err(_) => {
                    warn!("Aggregator: {} timed out after {:?}", source.name(), settings.source_timeout);
                    continue;
                }
            };
            for playout in playouts {
                playing.push((
                    playout,
                    source.force_updates(),
                    source.force_active_zone_only(),
                ));
            }
        }

        // Sources are done touching the registry; format against one view.
        let selected = self.registry.selected_id().await;
        let mut control_changed = false;
        let mut seen = HashMap::new();
        let mut builder = PayloadBuilder::new(mode, settings.display.joiner());

        for (idx, (playout, force_updates, active_only)) in playing.into_iter().enumerate() {
            let controlled = selected.as_deref() == Some(playout.channel_id.as_str());
            builder.push(format_playout(&playout, controlled, idx == 0, settings));

            let is_new = state.playouts.get(&playout.channel_id) != Some(&playout);
            if is_new && force && force_updates && (!active_only || controlled) {
                debug!("Aggregator: playout changed on '{}'", playout.channel_id);
                control_changed = true;
            }
            seen.insert(playout.channel_id.clone(), playout);
        }
        state.playouts = seen;
        let audio_empty = builder.is_empty();

        // ── non-audio ──
        let message = self.messages.get().await;
        let payload = match message {
            Some(message) if message.mode == MessageMode::Exclusive => {
                format_message(&message, settings)
            }
            message => {
                if show_non_audio(settings.music_required, settings.exclusive_audio_mode, audio_empty) {
                    if let Some(message) = message {
                        builder.push(format_message(&message, settings));
                    }
                    let results = join_all(self.fragments.iter().map(|source| {
                        tokio::time::timeout(settings.source_timeout, source.fragments(mode))
                    }))
                    .await;
                    for (source, result) in self.fragments.iter().zip(results) {
                        match result {
                            Ok(Ok(fragments)) => fragments.into_iter().for_each(|f| builder.push(f)),
                            Ok(Err(e)) => warn!("Aggregator: {} failed: {}", source.name(), e),
                            Err(_) => warn!("Aggregator: {} timed out", source.name()),
                        }
                    }
                    if settings.datetime.enabled {
                        builder.push(format_datetime(Local::now(), settings));
                    }
                }
                builder.finish()
            }
        };

        let changed = state.last_payload.as_ref() != Some(&payload);
        state.last_payload = Some(payload.clone());
        let took = started.elapsed();
        debug!(
            "Aggregator: build done in {:?} (changed={}, force={}, control_changed={})",
            took, changed, force, control_changed
        );

        Aggregation {
            payload,
            changed,
            control_changed,
            audio_empty,
            took,
        }
    }
}
