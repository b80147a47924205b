//! Current weather from a weatherbit-compatible API, refreshed on its own
//! timer and formatted from cache.

use super::{FragmentSource, SourceError};
use chrono::{Local, NaiveTime, TimeZone, Utc};
use playout_proto::config::{LanguageConfig, WeatherConfig};
use playout_proto::protocol::{DisplayPayload, OutputMode};
use playout_proto::text::{to_ascii, wrap_into};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    #[serde(default)]
    data: Vec<Observation>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Observation {
    pub temp: f64,
    pub app_temp: f64,
    /// Relative humidity, percent.
    pub rh: f64,
    /// Pressure, mb.
    pub pres: f64,
    /// Wind speed, m/s.
    pub wind_spd: f64,
    /// Wind direction, degrees.
    pub wind_dir: f64,
    pub clouds: f64,
    pub uv: f64,
    /// mm/hr
    pub snow: f64,
    /// mm/hr
    pub precip: f64,
    /// UTC, `HH:MM`.
    pub sunrise: String,
    pub sunset: String,
    pub weather: Conditions,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Conditions {
    pub description: String,
}

/// `HH:MM` in UTC to local `HH:MM`, on today's date.
fn utc_to_local_hm(hm: &str) -> Option<String> {
    let time = NaiveTime::parse_from_str(hm.trim(), "%H:%M").ok()?;
    let utc = Utc.from_utc_datetime(&Utc::now().date_naive().and_time(time));
    Some(utc.with_timezone(&Local).format("%H:%M").to_string())
}

fn trim_number(value: f64) -> String {
    format!("{}", (value * 10.0).round() / 10.0)
}

/// Weather segments in display order.  The first one names the location.
pub fn weather_parts(
    obs: &Observation,
    config: &WeatherConfig,
    language: &LanguageConfig,
) -> Vec<String> {
    let prop = |key: &str| language.weather_property(key);
    let degree = prop("C");
    let mut parts = vec![
        format!("{} {}", prop("Weather"), config.location),
        format!("{} {}", trim_number(obs.temp), degree),
    ];

    if config.with_feel_temperature {
        parts.push(format!(
            "{} {} {}",
            prop("Feel Temperature"),
            trim_number(obs.app_temp),
            degree
        ));
    }
    if config.with_rain && obs.precip > 0.0 {
        parts.push(format!("{}: {} mm/hr", prop("Rain"), trim_number(obs.precip)));
    }
    let wind_kmh = (obs.wind_spd * 3600.0 / 1000.0) as i64;
    let direction = language.compass_point(obs.wind_dir);
    match (config.with_wind_speed, config.with_wind_direction) {
        (true, true) => parts.push(format!(
            "{}: {} km/h {} {}",
            prop("Wind"),
            wind_kmh,
            prop("Direction"),
            direction
        )),
        (true, false) => parts.push(format!("{}: {} km/h", prop("Wind"), wind_kmh)),
        (false, true) => parts.push(format!(
            "{} {} {}",
            prop("Wind"),
            prop("Direction"),
            direction
        )),
        (false, false) => {}
    }
    if config.with_humidity {
        parts.push(format!("{}: {}%", prop("Humidity"), trim_number(obs.rh)));
    }
    if config.with_pressure {
        parts.push(format!("{}: {} hPa", prop("Pressure"), trim_number(obs.pres)));
    }
    if config.with_clouds && obs.clouds > 0.0 {
        parts.push(format!("{}: {}%", prop("Clouds"), trim_number(obs.clouds)));
    }
    if config.with_snow && obs.snow > 0.0 {
        parts.push(format!("{}: {} mm/hr", prop("Snow"), trim_number(obs.snow)));
    }
    if config.with_uv {
        parts.push(format!("UV (0-11): {}", obs.uv.round() as i64));
    }
    if config.with_sunrise {
        if let Some(sunrise) = utc_to_local_hm(&obs.sunrise) {
            parts.push(format!("{}: {} {}", prop("Sunrise"), sunrise, language.message("h")));
        }
    }
    if config.with_sunset {
        if let Some(sunset) = utc_to_local_hm(&obs.sunset) {
            parts.push(format!("{}: {} {}", prop("Sunset"), sunset, language.message("h")));
        }
    }
    if config.with_description && !obs.weather.description.trim().is_empty() {
        parts.push(language.weather_description(&obs.weather.description));
    }
    parts
}

pub fn format_weather(
    obs: &Observation,
    config: &WeatherConfig,
    language: &LanguageConfig,
    mode: OutputMode,
    width_px: u32,
) -> DisplayPayload {
    let parts: Vec<String> = weather_parts(obs, config, language)
        .iter()
        .map(|p| to_ascii(p, &language.conversions))
        .collect();
    match mode {
        OutputMode::Flat => {
            // "Weather Berlin: 21 C, Feel Temperature 20 C, ..."
            let mut text = String::new();
            for (idx, part) in parts.iter().enumerate() {
                match idx {
                    0 => text.push_str(part),
                    1 => {
                        text.push_str(": ");
                        text.push_str(part);
                    }
                    _ => {
                        text.push_str(", ");
                        text.push_str(part);
                    }
                }
            }
            DisplayPayload::FlatText(text)
        }
        OutputMode::Lines => {
            let mut lines = Vec::new();
            for part in &parts {
                wrap_into(part, width_px, &mut lines);
            }
            DisplayPayload::LineSet(lines)
        }
    }
}

pub struct WeatherSource {
    client: reqwest::Client,
    config: WeatherConfig,
    language: LanguageConfig,
    width_px: u32,
    cache: RwLock<Option<Observation>>,
}

impl WeatherSource {
    pub fn new(config: WeatherConfig, language: LanguageConfig, width_px: u32) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            config,
            language,
            width_px,
            cache: RwLock::new(None),
        })
    }

    pub async fn set_observation(&self, obs: Observation) {
        *self.cache.write().await = Some(obs);
    }

    pub async fn refresh(&self) -> Result<(), SourceError> {
        let response: WeatherResponse = self
            .client
            .get(&self.config.api_url)
            .query(&[
                ("city", self.config.location.as_str()),
                ("key", self.config.api_key.as_str()),
                ("units", "M"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let obs = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::Malformed {
                source_name: "weather".to_string(),
                detail: "no observation in response".to_string(),
            })?;
        debug!("Weather: {} C in {}", obs.temp, self.config.location);
        self.set_observation(obs).await;
        Ok(())
    }

    /// Refresh now and then every `update_interval_mins`.
    pub fn spawn_refresh(self: Arc<Self>) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.update_interval_mins.max(1) * 60);
        tokio::spawn(async move {
            info!("Weather: refreshing every {:?}", interval);
            loop {
                if let Err(e) = self.refresh().await {
                    warn!("Weather refresh failed: {}", e);
                }
                tokio::time::sleep(interval).await;
            }
        })
    }
}

#[async_trait::async_trait]
impl FragmentSource for WeatherSource {
    fn name(&self) -> &str {
        "weather"
    }

    async fn fragments(&self, mode: OutputMode) -> Result<Vec<DisplayPayload>, SourceError> {
        Ok(self
            .cache
            .read()
            .await
            .iter()
            .map(|obs| format_weather(obs, &self.config, &self.language, mode, self.width_px))
            .collect())
    }
}
