//! Polled now-playing webservers.
//!
//! Each configured webserver reports a JSON array with one entry per
//! player (`Spotify`, `Apple Music`).  An entry carrying `status` is idle or
//! not running; the others are playing.  The players become registry
//! channels named `<webserver>-<player>` while the webserver answers.

use super::{AudioSource, Playout, SourceError, TransportCode};
use crate::registry::ChannelRegistry;
use playout_proto::config::{WebserverZone, WebserversConfig};
use playout_proto::protocol::{Channel, ChannelKind, PlayState};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

pub const PLAYERS: [&str; 2] = ["Spotify", "Apple Music"];

pub fn channel_id(webserver: &str, player: &str) -> String {
    format!("{}-{}", webserver, player)
}

/// Split a channel id back into webserver name and player.
pub fn split_channel_id(id: &str) -> Option<(&str, &str)> {
    PLAYERS.iter().find_map(|player| {
        id.strip_suffix(player)
            .and_then(|rest| rest.strip_suffix('-'))
            .map(|name| (name, *player))
    })
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StatusEntry {
    pub zone: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub track: String,
    #[serde(default)]
    pub shuffle: Option<bool>,
    #[serde(default)]
    pub repeat: Option<bool>,
}

impl StatusEntry {
    pub fn is_playing(&self) -> bool {
        self.status.is_none()
    }

    /// Copy the reported player state onto channel `id`.  Modes the
    /// webserver leaves out keep their last known value.
    pub async fn record(&self, registry: &ChannelRegistry, id: &str) {
        let state = if self.is_playing() {
            PlayState::Playing
        } else {
            PlayState::Stopped
        };
        registry.set_play_state(id, state).await;
        if let Some(shuffle) = self.shuffle {
            registry.set_shuffle(id, shuffle).await;
        }
        if let Some(repeat) = self.repeat {
            registry.set_repeat(id, repeat).await;
        }
    }
}

/// Parse a status body.  Anything that is not a JSON array of objects means
/// the webserver has nothing to say right now.
pub fn parse_status(webserver: &str, body: &str) -> Result<Vec<StatusEntry>, SourceError> {
    let body = body.trim();
    if !(body.starts_with("[{") && body.ends_with("}]")) {
        return Ok(Vec::new());
    }
    serde_json::from_str(body).map_err(|e| SourceError::Malformed {
        source_name: webserver.to_string(),
        detail: e.to_string(),
    })
}

pub struct WebserverSource {
    client: reqwest::Client,
    config: WebserversConfig,
}

impl WebserverSource {
    pub fn new(config: WebserversConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0")
            .connect_timeout(Duration::from_secs(config.head_timeout_secs.max(1)))
            .build()?;
        Ok(Self { client, config })
    }

    fn zone(&self, name: &str) -> Option<&WebserverZone> {
        self.config.zones.iter().find(|z| z.name == name)
    }

    async fn is_online(&self, zone: &WebserverZone) -> bool {
        self.client
            .head(&zone.url)
            .timeout(Duration::from_secs(self.config.head_timeout_secs))
            .send()
            .await
            .is_ok()
    }

    async fn fetch_status(&self, zone: &WebserverZone) -> Result<Vec<StatusEntry>, SourceError> {
        let response = self
            .client
            .get(&zone.url)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        parse_status(&zone.name, &body.replace('\n', ""))
    }

    async fn sync_zone(&self, registry: &ChannelRegistry, zone: &WebserverZone, online: bool) {
        let channels: Vec<(String, String)> = if online {
            PLAYERS
                .iter()
                .map(|player| {
                    let id = channel_id(&zone.name, player);
                    (id.clone(), id)
                })
                .collect()
        } else {
            Vec::new()
        };
        let prefix = format!("{}-", zone.name);
        registry
            .sync_channels(
                ChannelKind::Webserver,
                |id| id.starts_with(&prefix) && split_channel_id(id).is_some_and(|(n, _)| n == zone.name),
                &channels,
            )
            .await;
    }

    /// Configured zones, the one holding the control channel first.
    async fn ordered_zones(&self, registry: &ChannelRegistry) -> Vec<&WebserverZone> {
        let mut zones: Vec<&WebserverZone> = self.config.zones.iter().collect();
        if let Some(selected) = registry.selected_id().await {
            if let Some((name, _)) = split_channel_id(&selected) {
                if let Some(idx) = zones.iter().position(|z| z.name == name) {
                    let zone = zones.remove(idx);
                    zones.insert(0, zone);
                }
            }
        }
        zones
    }
}

#[async_trait::async_trait]
impl AudioSource for WebserverSource {
    fn name(&self) -> &str {
        "webserver"
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Webserver
    }

    fn force_updates(&self) -> bool {
        self.config.force_update
    }

    fn force_active_zone_only(&self) -> bool {
        self.config.force_active_zone_only
    }

    async fn refresh_channels(&self, registry: &ChannelRegistry) -> Result<(), SourceError> {
        for zone in &self.config.zones {
            let online = self.is_online(zone).await;
            debug!("Webserver {}: online={}", zone.name, online);
            self.sync_zone(registry, zone, online).await;
        }
        Ok(())
    }

    async fn now_playing(&self, registry: &ChannelRegistry) -> Result<Vec<Playout>, SourceError> {
        let mut playouts = Vec::new();
        for zone in self.ordered_zones(registry).await {
            let online = self.is_online(zone).await;
            self.sync_zone(registry, zone, online).await;
            if !online {
                debug!("Webserver {} is down", zone.name);
                continue;
            }

            let entries = match self.fetch_status(zone).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Webserver {}: {}", zone.name, e);
                    continue;
                }
            };

            for entry in entries {
                let id = channel_id(&zone.name, &entry.zone);
                entry.record(registry, &id).await;

                if let Some(status) = &entry.status {
                    debug!("Webserver {} ({}): {}", zone.name, entry.zone, status);
                    continue;
                }
                playouts.push(Playout {
                    channel_id: id,
                    origin: Some(zone.name.clone()),
                    zone: entry.zone,
                    artist: entry.artist,
                    album: entry.album,
                    track: entry.track,
                });
            }
        }
        Ok(playouts)
    }

    async fn is_available(&self) -> bool {
        for zone in &self.config.zones {
            if !self.is_online(zone).await {
                continue;
            }
            match self.fetch_status(zone).await {
                Ok(entries) if entries.iter().any(StatusEntry::is_playing) => return true,
                Ok(_) => {}
                Err(e) => debug!("Webserver {} probe: {}", zone.name, e),
            }
        }
        false
    }

    async fn transport(&self, channel: &Channel, code: TransportCode) -> Result<(), SourceError> {
        let (name, player) = split_channel_id(&channel.id)
            .ok_or_else(|| SourceError::UnknownChannel(self.name().to_string(), channel.id.clone()))?;
        let zone = self
            .zone(name)
            .ok_or_else(|| SourceError::UnknownChannel(self.name().to_string(), channel.id.clone()))?;

        debug!("Webserver {}: {} → {}", zone.name, player, code.as_code());
        self.client
            .post(&zone.url)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .form(&[("source", player), ("code", code.as_code())])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_ids() {
        assert_eq!(channel_id("MacStudio", "Apple Music"), "MacStudio-Apple Music");
        assert_eq!(
            split_channel_id("Mac-Studio-Spotify"),
            Some(("Mac-Studio", "Spotify"))
        );
        assert_eq!(split_channel_id("Den-Tidal"), None);
    }

    #[test]
    fn test_parse_status() {
        let body = r#"[{"zone": "Spotify", "artist": "Nina Simone", "album": "Pastel Blues", "track": "Sinnerman"},
                       {"zone": "Apple Music", "status": "not running"}]"#;
        let entries = parse_status("Den", body).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_playing());
        assert_eq!(entries[0].track, "Sinnerman");
        assert!(!entries[1].is_playing());
    }

    #[tokio::test]
    async fn test_entry_modes_reach_the_registry() {
        let registry = ChannelRegistry::new();
        registry
            .upsert_channel(ChannelKind::Webserver, "Den-Spotify", "Den-Spotify")
            .await;
        let body = r#"[{"zone": "Spotify", "artist": "Air", "track": "Sexy Boy", "shuffle": true, "repeat": false}]"#;
        let entries = parse_status("Den", body).unwrap();
        entries[0].record(&registry, "Den-Spotify").await;

        let channel = registry.get("Den-Spotify").await.unwrap();
        assert_eq!(channel.play_state, PlayState::Playing);
        assert!(channel.shuffle);
        assert!(!channel.repeat);
        // The next toggle sends the opposite of what the player reported.
        assert_eq!(registry.toggle_shuffle("Den-Spotify").await, Some(false));

        registry.set_repeat("Den-Spotify", true).await;
        let body = r#"[{"zone": "Spotify", "status": "paused"}]"#;
        parse_status("Den", body).unwrap()[0]
            .record(&registry, "Den-Spotify")
            .await;
        let channel = registry.get("Den-Spotify").await.unwrap();
        assert_eq!(channel.play_state, PlayState::Stopped);
        assert!(!channel.shuffle);
        assert!(channel.repeat);
    }

    #[test]
    fn test_parse_status_ignores_non_json() {
        assert!(parse_status("Den", "").unwrap().is_empty());
        assert!(parse_status("Den", "<html>503</html>").unwrap().is_empty());
        assert!(matches!(
            parse_status("Den", "[{broken}]"),
            Err(SourceError::Malformed { .. })
        ));
    }

    #[test]
    fn test_transport_codes() {
        assert_eq!(TransportCode::Shuffle(false).as_code(), "noshuffle");
        assert_eq!(TransportCode::Previous.as_code(), "previous");
    }
}
