use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;
use crate::protocol::OutputMode;

/// Rejected live-control input.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown live control '{0}'")]
    UnknownControl(String),
    #[error("invalid value '{value}' for {control}")]
    InvalidValue { control: String, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub zone_control: ZoneControlConfig,
    #[serde(default)]
    pub webservers: WebserversConfig,
    #[serde(default)]
    pub media_service: MediaServiceConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub rss: RssConfig,
    #[serde(default)]
    pub datetime: DateTimeConfig,
    #[serde(default)]
    pub language: LanguageConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub control_surface: ControlSurfaceConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

// ── display ───────────────────────────────────────────────────────────────────

/// Geometry and scrolling parameters of the LED matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Number of chained 8x8 modules.
    #[serde(default = "default_modules")]
    pub modules: u32,
    #[serde(default)]
    pub output_mode: OutputMode,
    /// Milliseconds per pixel column in flat scrolling.
    #[serde(default = "default_scroll_delay_ms")]
    pub scroll_delay_ms: f64,
    /// Milliseconds per pixel row in vertical scrolling.
    #[serde(default = "default_vertical_scroll_delay_ms")]
    pub vertical_scroll_delay_ms: f64,
    /// Seconds each line rests before the next one scrolls in.
    #[serde(default = "default_line_hold_secs")]
    pub line_hold_secs: f64,
    #[serde(default = "default_contrast")]
    pub contrast: u8,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default)]
    pub playing_headline: String,
    #[serde(default = "default_true")]
    pub show_zone: bool,
    #[serde(default = "default_true")]
    pub show_album: bool,
    /// Prefix artist/album/track blocks with a label line in line mode.
    #[serde(default)]
    pub show_music_labels: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            modules: default_modules(),
            output_mode: OutputMode::default(),
            scroll_delay_ms: default_scroll_delay_ms(),
            vertical_scroll_delay_ms: default_vertical_scroll_delay_ms(),
            line_hold_secs: default_line_hold_secs(),
            contrast: default_contrast(),
            separator: default_separator(),
            playing_headline: String::new(),
            show_zone: true,
            show_album: true,
            show_music_labels: false,
        }
    }
}

impl DisplayConfig {
    pub fn device_width_px(&self) -> u32 {
        self.modules * 8
    }

    /// Flat scroll speed in pixels per second. A zero delay scrolls as fast
    /// as the renderer ticks, modelled as one pixel per millisecond.
    pub fn scroll_speed_px_per_sec(&self) -> f64 {
        if self.scroll_delay_ms <= 0.0 {
            1000.0
        } else {
            1000.0 / self.scroll_delay_ms
        }
    }

    /// Time one line occupies in vertical mode: the rest period plus the
    /// eight pixel rows it takes to scroll in.
    pub fn line_hold(&self) -> Duration {
        let secs = self.line_hold_secs.max(0.0) + self.vertical_scroll_delay_ms.max(0.0) / 1000.0 * 8.0;
        Duration::from_secs_f64(secs)
    }

    /// Separator with surrounding spaces, as placed between flat segments.
    pub fn joiner(&self) -> String {
        format!(" {} ", self.separator)
    }

    /// Apply a runtime tweak coming from the admin surface.
    pub fn apply_live_control(&mut self, control: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            control: control.to_string(),
            value: value.to_string(),
        };
        match control {
            "led_scroll_delay" => {
                let v: f64 = value.trim().parse().map_err(|_| invalid())?;
                if v < 0.0 {
                    return Err(invalid());
                }
                self.scroll_delay_ms = v;
            }
            "led_vertical_scroll_delay" => {
                let v: f64 = value.trim().parse().map_err(|_| invalid())?;
                if v < 0.0 {
                    return Err(invalid());
                }
                self.vertical_scroll_delay_ms = v;
            }
            "vertical_scroll_delay" => {
                let v: u32 = value.trim().parse().map_err(|_| invalid())?;
                self.line_hold_secs = v as f64;
            }
            "led_contrast" => {
                let v: u8 = value.trim().parse().map_err(|_| invalid())?;
                if v == 0 {
                    return Err(invalid());
                }
                self.contrast = v;
            }
            other => return Err(ConfigError::UnknownControl(other.to_string())),
        }
        Ok(())
    }
}

// ── schedule ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Show nothing but the clock unless some audio zone is playing.
    #[serde(default)]
    pub music_required: bool,
    /// Suppress non-audio content while audio is playing.
    #[serde(default)]
    pub exclusive_audio_mode: bool,
    /// Minimum time left before the natural swap for an interrupt to count.
    #[serde(default = "default_interrupt_margin_secs")]
    pub interrupt_margin_secs: f64,
    /// Delay before re-aggregating after an empty round.
    #[serde(default = "default_empty_retry_secs")]
    pub empty_retry_secs: u64,
    /// Age after which the last fetch is considered stale.
    #[serde(default = "default_stale_fetch_secs")]
    pub stale_fetch_secs: u64,
    /// Upper bound for a single source query during a build.
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            music_required: false,
            exclusive_audio_mode: false,
            interrupt_margin_secs: default_interrupt_margin_secs(),
            empty_retry_secs: default_empty_retry_secs(),
            stale_fetch_secs: default_stale_fetch_secs(),
            source_timeout_secs: default_source_timeout_secs(),
            tick_millis: default_tick_millis(),
        }
    }
}

// ── clock ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    #[serde(default = "default_true")]
    pub show: bool,
    /// Show the clock as soon as nothing plays, skipping the idle wait.
    #[serde(default)]
    pub without_idle_time: bool,
    #[serde(default = "default_refresh_per_second")]
    pub refresh_per_second: u32,
    #[serde(default = "default_max_idle_time_secs")]
    pub max_idle_time_secs: u64,
    #[serde(default = "default_max_show_time_secs")]
    pub max_show_time_secs: u64,
    /// Period of the audio availability probe while the clock runs.
    #[serde(default = "default_audioinfo_interval_secs")]
    pub audioinfo_interval_secs: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            show: true,
            without_idle_time: false,
            refresh_per_second: default_refresh_per_second(),
            max_idle_time_secs: default_max_idle_time_secs(),
            max_show_time_secs: default_max_show_time_secs(),
            audioinfo_interval_secs: default_audioinfo_interval_secs(),
        }
    }
}

// ── zone control ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneControlConfig {
    /// Default control zone: a webserver channel id such as
    /// `MacStudio-Spotify`, or a media-service zone display name.
    #[serde(default)]
    pub control_zone: String,
    #[serde(default = "default_zone_control_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub map_names: bool,
    /// Substring replacements that shorten zone names on narrow matrices.
    #[serde(default)]
    pub name_map: BTreeMap<String, String>,
}

impl Default for ZoneControlConfig {
    fn default() -> Self {
        Self {
            control_zone: String::new(),
            timeout_secs: default_zone_control_timeout_secs(),
            map_names: false,
            name_map: BTreeMap::new(),
        }
    }
}

// ── sources ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebserverZone {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebserversConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Poll for playout changes and interrupt the current message.
    #[serde(default = "default_true")]
    pub force_update: bool,
    /// Only changes on the selected control channel interrupt.
    #[serde(default)]
    pub force_active_zone_only: bool,
    #[serde(default = "default_webcheck_interval_secs")]
    pub webcheck_interval_secs: u64,
    #[serde(default = "default_head_timeout_secs")]
    pub head_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub zones: Vec<WebserverZone>,
}

impl Default for WebserversConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            force_update: true,
            force_active_zone_only: false,
            webcheck_interval_secs: default_webcheck_interval_secs(),
            head_timeout_secs: default_head_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            zones: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaServiceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub force_update: bool,
    #[serde(default)]
    pub force_active_zone_only: bool,
}

impl Default for MediaServiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            force_update: true,
            force_active_zone_only: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_weather_api_url")]
    pub api_url: String,
    #[serde(default = "default_weather_update_interval_mins")]
    pub update_interval_mins: u64,
    #[serde(default = "default_true")]
    pub with_feel_temperature: bool,
    #[serde(default = "default_true")]
    pub with_rain: bool,
    #[serde(default = "default_true")]
    pub with_wind_speed: bool,
    #[serde(default = "default_true")]
    pub with_wind_direction: bool,
    #[serde(default)]
    pub with_humidity: bool,
    #[serde(default)]
    pub with_pressure: bool,
    #[serde(default)]
    pub with_clouds: bool,
    #[serde(default)]
    pub with_snow: bool,
    #[serde(default)]
    pub with_uv: bool,
    #[serde(default)]
    pub with_sunrise: bool,
    #[serde(default)]
    pub with_sunset: bool,
    #[serde(default = "default_true")]
    pub with_description: bool,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            location: String::new(),
            api_key: String::new(),
            api_url: default_weather_api_url(),
            update_interval_mins: default_weather_update_interval_mins(),
            with_feel_temperature: true,
            with_rain: true,
            with_wind_speed: true,
            with_wind_direction: true,
            with_humidity: false,
            with_pressure: false,
            with_clouds: false,
            with_snow: false,
            with_uv: false,
            with_sunrise: false,
            with_sunset: false,
            with_description: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RssFeed {
    pub name: String,
    #[serde(default = "default_feed_count")]
    pub count: usize,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rss_refresh_interval_mins")]
    pub refresh_interval_mins: u64,
    #[serde(default)]
    pub feeds: Vec<RssFeed>,
}

impl Default for RssConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            refresh_interval_mins: default_rss_refresh_interval_mins(),
            feeds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateTimeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub only_time: bool,
}

impl Default for DateTimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            only_time: true,
        }
    }
}

// ── language ──────────────────────────────────────────────────────────────────

/// Translations and character conversions applied to everything shown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Sixteen compass point names, starting at north.
    #[serde(default = "default_compass")]
    pub compass: Vec<String>,
    /// UI label translations, looked up by their English key.
    #[serde(default)]
    pub messages: BTreeMap<String, String>,
    /// Per-character replacements applied before ASCII folding.
    #[serde(default = "default_conversions")]
    pub conversions: BTreeMap<String, String>,
    #[serde(default)]
    pub weather_properties: BTreeMap<String, String>,
    #[serde(default)]
    pub weather_descriptions: BTreeMap<String, String>,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            compass: default_compass(),
            messages: BTreeMap::new(),
            conversions: default_conversions(),
            weather_properties: BTreeMap::new(),
            weather_descriptions: BTreeMap::new(),
        }
    }
}

impl LanguageConfig {
    pub fn message(&self, key: &str) -> String {
        lookup(&self.messages, key)
    }

    pub fn weather_property(&self, key: &str) -> String {
        lookup(&self.weather_properties, key)
    }

    pub fn weather_description(&self, key: &str) -> String {
        lookup(&self.weather_descriptions, key.trim())
    }

    /// Compass point for a wind direction in degrees.
    pub fn compass_point(&self, degrees: f64) -> String {
        if self.compass.is_empty() {
            return format!("{:.0}", degrees);
        }
        let idx = ((degrees / 22.5) + 0.5) as usize % self.compass.len();
        self.compass[idx].clone()
    }
}

fn lookup(map: &BTreeMap<String, String>, key: &str) -> String {
    map.get(key).cloned().unwrap_or_else(|| key.to_string())
}

// ── surfaces ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlSurfaceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_control_port")]
    pub port: u16,
}

impl Default for ControlSurfaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: default_control_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ── defaults ──────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_modules() -> u32 {
    8
}

fn default_scroll_delay_ms() -> f64 {
    30.0
}

fn default_vertical_scroll_delay_ms() -> f64 {
    40.0
}

fn default_line_hold_secs() -> f64 {
    2.0
}

fn default_contrast() -> u8 {
    16
}

fn default_separator() -> String {
    "+++".to_string()
}

fn default_interrupt_margin_secs() -> f64 {
    2.0
}

fn default_empty_retry_secs() -> u64 {
    15
}

fn default_stale_fetch_secs() -> u64 {
    60
}

fn default_source_timeout_secs() -> u64 {
    10
}

fn default_tick_millis() -> u64 {
    1000
}

fn default_refresh_per_second() -> u32 {
    2
}

fn default_max_idle_time_secs() -> u64 {
    5 * 60
}

fn default_max_show_time_secs() -> u64 {
    15 * 60
}

fn default_audioinfo_interval_secs() -> u64 {
    10
}

fn default_zone_control_timeout_secs() -> u64 {
    10
}

fn default_webcheck_interval_secs() -> u64 {
    5
}

fn default_head_timeout_secs() -> u64 {
    2
}

fn default_request_timeout_secs() -> u64 {
    3
}

fn default_weather_api_url() -> String {
    "https://api.weatherbit.io/v2.0/current".to_string()
}

fn default_weather_update_interval_mins() -> u64 {
    30
}

fn default_feed_count() -> usize {
    3
}

fn default_rss_refresh_interval_mins() -> u64 {
    20
}

fn default_conversions() -> BTreeMap<String, String> {
    [("ä", "ae"), ("ö", "oe"), ("ü", "ue"), ("Ä", "Ae"), ("Ö", "Oe"), ("Ü", "Ue"), ("ß", "ss")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn default_compass() -> Vec<String> {
    [
        "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW",
        "NW", "NNW",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_control_port() -> u16 {
    platform::CONTROL_TCP_PORT
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from an explicit path, writing defaults there when it is missing.
    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
