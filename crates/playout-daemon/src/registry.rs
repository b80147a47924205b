//! Channel Registry: the known audio channels and the selected control
//! channel.
//!
//! Every mutation takes the write lock once and re-derives the selection
//! before releasing it, so no reader ever sees a registry whose selection
//! was computed against a half-applied update.

use playout_proto::protocol::{Channel, ChannelKind, PlayState};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),
    #[error("duplicate source name '{0}'")]
    DuplicateSource(String),
    #[error("source name must not be empty")]
    EmptySourceName,
}

/// Consistent view of the registry taken under a single read lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    pub channels: Vec<Channel>,
    pub selected: Option<String>,
}

impl RegistrySnapshot {
    pub fn selected_channel(&self) -> Option<&Channel> {
        let id = self.selected.as_deref()?;
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.as_deref() == Some(id)
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// Insertion order is the order the zone-control cursor walks.
    channels: Vec<Channel>,
    selected: Option<String>,
    /// Configured default, matched against webserver ids and media-service
    /// display names.  Consumed once it wins.
    preferred: Option<String>,
    /// Operator choice from an earlier run.  Ranks below `preferred` but
    /// above auto-selection; consumed once it wins.
    remembered: Option<String>,
    rev: u64,
}

impl Inner {
    fn position(&self, id: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.id == id)
    }

    fn find_default(&self, name: &str) -> Option<String> {
        self.channels
            .iter()
            .find(|c| match c.kind {
                ChannelKind::Webserver => c.id == name,
                ChannelKind::MediaService => c.display_name == name || c.id == name,
            })
            .map(|c| c.id.clone())
    }

    fn derive_selection(&mut self) {
        if let Some(id) = self.preferred.as_deref().and_then(|p| self.find_default(p)) {
            info!("Registry: control channel set to configured default '{}'", id);
            self.selected = Some(id);
            self.preferred = None;
            self.remembered = None;
            return;
        }

        if let Some(id) = self.remembered.as_deref().and_then(|r| self.find_default(r)) {
            info!("Registry: control channel restored to '{}'", id);
            self.selected = Some(id);
            self.remembered = None;
            return;
        }

        if self.selected.is_some() {
            return;
        }

        let pick = |kind: ChannelKind, playing_only: bool| {
            self.channels
                .iter()
                .find(|c| c.kind == kind && (!playing_only || c.is_playing()))
                .map(|c| c.id.clone())
        };

        let choice = pick(ChannelKind::MediaService, true)
            .or_else(|| pick(ChannelKind::Webserver, true))
            .or_else(|| pick(ChannelKind::Webserver, false))
            .or_else(|| pick(ChannelKind::MediaService, false));

        if let Some(id) = choice {
            info!("Registry: control channel auto-selected '{}'", id);
            self.selected = Some(id);
        }
    }

    fn remove_at(&mut self, idx: usize) -> Channel {
        let removed = self.channels.remove(idx);
        if self.selected.as_deref() == Some(removed.id.as_str()) {
            info!("Registry: selected channel '{}' went away", removed.id);
            self.selected = None;
        }
        removed
    }
}

#[derive(Debug, Default)]
pub struct ChannelRegistry {
    inner: RwLock<Inner>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the configured default channel.
    pub fn with_preferred(preferred: Option<String>) -> Self {
        Self::with_defaults(preferred, None)
    }

    /// Registry seeded with the configured default and the channel the
    /// operator chose last time.  The configured default always wins.
    pub fn with_defaults(preferred: Option<String>, remembered: Option<String>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                preferred: preferred.filter(|p| !p.is_empty()),
                remembered: remembered.filter(|r| !r.is_empty()),
                ..Default::default()
            }),
        }
    }

    /// Reject source configurations whose channel ids would collide.
    pub fn validate_source_names<'a>(
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), RegistryError> {
        let mut seen = std::collections::HashSet::new();
        for name in names {
            if name.trim().is_empty() {
                return Err(RegistryError::EmptySourceName);
            }
            if !seen.insert(name) {
                return Err(RegistryError::DuplicateSource(name.to_string()));
            }
        }
        Ok(())
    }

    /// Add a channel or refresh its display name.  Returns `true` when the
    /// channel is new.
    pub async fn upsert_channel(
        &self,
        kind: ChannelKind,
        id: &str,
        display_name: &str,
    ) -> bool {
        let mut inner = self.inner.write().await;
        let added = match inner.position(id) {
            Some(idx) => {
                let channel = &mut inner.channels[idx];
                if channel.display_name == display_name && channel.kind == kind {
                    return false;
                }
                channel.display_name = display_name.to_string();
                channel.kind = kind;
                false
            }
            None => {
                debug!("Registry: add {:?} channel '{}'", kind, id);
                inner.channels.push(Channel::new(kind, id, display_name));
                true
            }
        };
        inner.rev += 1;
        inner.derive_selection();
        added
    }

    pub async fn remove_channel(&self, id: &str) -> Option<Channel> {
        let mut inner = self.inner.write().await;
        let idx = inner.position(id)?;
        debug!("Registry: remove channel '{}'", id);
        let removed = inner.remove_at(idx);
        inner.rev += 1;
        inner.derive_selection();
        Some(removed)
    }

    /// Make the channels of `kind` owned by one source exactly `online`:
    /// new ones are added, missing ones removed, survivors keep their state.
    /// `owns` scopes removal to the ids this source is responsible for.
    pub async fn sync_channels(
        &self,
        kind: ChannelKind,
        owns: impl Fn(&str) -> bool,
        online: &[(String, String)],
    ) {
        let mut inner = self.inner.write().await;
        let before = inner.rev;

        let mut idx = 0;
        while idx < inner.channels.len() {
            let channel = &inner.channels[idx];
            let stale = channel.kind == kind
                && owns(&channel.id)
                && !online.iter().any(|(id, _)| *id == channel.id);
            if stale {
                let removed = inner.remove_at(idx);
                debug!("Registry: channel '{}' offline", removed.id);
                inner.rev += 1;
            } else {
                idx += 1;
            }
        }

        for (id, name) in online {
            match inner.position(id) {
                Some(idx) => {
                    if inner.channels[idx].display_name != *name {
                        inner.channels[idx].display_name = name.clone();
                        inner.rev += 1;
                    }
                }
                None => {
                    debug!("Registry: add {:?} channel '{}'", kind, id);
                    inner.channels.push(Channel::new(kind, id.as_str(), name.as_str()));
                    inner.rev += 1;
                }
            }
        }

        if inner.rev != before
            || inner.selected.is_none()
            || inner.preferred.is_some()
            || inner.remembered.is_some()
        {
            inner.derive_selection();
        }
    }

    pub async fn list_channels(&self) -> Vec<Channel> {
        self.inner.read().await.channels.clone()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .channels
            .iter()
            .map(|c| c.id.clone())
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<Channel> {
        let inner = self.inner.read().await;
        inner.position(id).map(|idx| inner.channels[idx].clone())
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.read().await.position(id).is_some()
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.read().await;
        RegistrySnapshot {
            channels: inner.channels.clone(),
            selected: inner.selected.clone(),
        }
    }

    pub async fn rev(&self) -> u64 {
        self.inner.read().await.rev
    }

    pub async fn selected_id(&self) -> Option<String> {
        self.inner.read().await.selected.clone()
    }

    pub async fn selected(&self) -> Option<Channel> {
        let inner = self.inner.read().await;
        let id = inner.selected.as_deref()?;
        inner.position(id).map(|idx| inner.channels[idx].clone())
    }

    /// Re-run auto-selection; a no-op while a channel is selected.
    pub async fn select_default_if_unset(&self) {
        let mut inner = self.inner.write().await;
        inner.derive_selection();
    }

    pub async fn select(&self, id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        if inner.position(id).is_none() {
            return Err(RegistryError::UnknownChannel(id.to_string()));
        }
        if inner.selected.as_deref() != Some(id) {
            info!("Registry: control channel → '{}'", id);
            inner.selected = Some(id.to_string());
            inner.rev += 1;
        }
        Ok(())
    }

    pub async fn set_play_state(&self, id: &str, state: PlayState) {
        self.update(id, |c| c.play_state = state).await;
    }

    pub async fn set_shuffle(&self, id: &str, shuffle: bool) {
        self.update(id, |c| c.shuffle = shuffle).await;
    }

    pub async fn set_repeat(&self, id: &str, repeat: bool) {
        self.update(id, |c| c.repeat = repeat).await;
    }

    /// Flip play/stop and return the new state.
    pub async fn toggle_play(&self, id: &str) -> Option<PlayState> {
        self.update(id, |c| {
            c.play_state = match c.play_state {
                PlayState::Playing => PlayState::Stopped,
                PlayState::Stopped => PlayState::Playing,
            };
            c.play_state
        })
        .await
    }

    /// Flip shuffle and return the new setting.
    pub async fn toggle_shuffle(&self, id: &str) -> Option<bool> {
        self.update(id, |c| {
            c.shuffle = !c.shuffle;
            c.shuffle
        })
        .await
    }

    async fn update<R>(&self, id: &str, f: impl FnOnce(&mut Channel) -> R) -> Option<R> {
        let mut inner = self.inner.write().await;
        let idx = inner.position(id)?;
        let out = f(&mut inner.channels[idx]);
        inner.rev += 1;
        // A state change can make a media zone the playing candidate.
        inner.derive_selection();
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry_with(channels: &[(ChannelKind, &str, PlayState)]) -> ChannelRegistry {
        let registry = ChannelRegistry::new();
        // Insert without triggering selection through the public path so
        // the scenario starts with nothing selected.
        {
            let mut inner = registry.inner.write().await;
            for (kind, id, state) in channels {
                let mut channel = Channel::new(*kind, *id, *id);
                channel.play_state = *state;
                inner.channels.push(channel);
            }
        }
        registry
    }

    #[tokio::test]
    async fn test_selects_playing_channel() {
        let registry = registry_with(&[
            (ChannelKind::MediaService, "A", PlayState::Stopped),
            (ChannelKind::MediaService, "B", PlayState::Playing),
        ])
        .await;
        assert_eq!(registry.selected_id().await, None);
        registry.select_default_if_unset().await;
        assert_eq!(registry.selected_id().await.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_precedence_order() {
        let registry = ChannelRegistry::new();
        registry
            .upsert_channel(ChannelKind::MediaService, "zone-1", "Kitchen")
            .await;
        // Only an idle media zone so far: it is the last-resort pick.
        assert_eq!(registry.selected_id().await.as_deref(), Some("zone-1"));

        registry.remove_channel("zone-1").await;
        assert_eq!(registry.selected_id().await, None);

        registry
            .upsert_channel(ChannelKind::MediaService, "zone-1", "Kitchen")
            .await;
        registry
            .upsert_channel(ChannelKind::Webserver, "Den-Spotify", "Den-Spotify")
            .await;
        // Selection is sticky once made.
        assert_eq!(registry.selected_id().await.as_deref(), Some("zone-1"));
    }

    #[tokio::test]
    async fn test_webserver_beats_idle_media_zone() {
        let registry = registry_with(&[
            (ChannelKind::MediaService, "zone-1", PlayState::Stopped),
            (ChannelKind::Webserver, "Den-Spotify", PlayState::Stopped),
        ])
        .await;
        registry.select_default_if_unset().await;
        assert_eq!(registry.selected_id().await.as_deref(), Some("Den-Spotify"));
    }

    #[tokio::test]
    async fn test_configured_default_wins_when_it_appears() {
        let registry = ChannelRegistry::with_preferred(Some("Living Room".into()));
        registry
            .upsert_channel(ChannelKind::Webserver, "Den-Spotify", "Den-Spotify")
            .await;
        assert_eq!(registry.selected_id().await.as_deref(), Some("Den-Spotify"));

        registry
            .upsert_channel(ChannelKind::MediaService, "out-17", "Living Room")
            .await;
        assert_eq!(registry.selected_id().await.as_deref(), Some("out-17"));

        // Consumed: a later manual choice is not overridden.
        registry.select("Den-Spotify").await.unwrap();
        registry
            .upsert_channel(ChannelKind::MediaService, "out-18", "Living Room 2")
            .await;
        assert_eq!(registry.selected_id().await.as_deref(), Some("Den-Spotify"));
    }

    #[tokio::test]
    async fn test_configured_default_beats_remembered_choice() {
        let registry = ChannelRegistry::with_defaults(
            Some("Loft-Spotify".into()),
            Some("Den-Spotify".into()),
        );
        registry
            .upsert_channel(ChannelKind::Webserver, "Den-Spotify", "Den-Spotify")
            .await;
        // Remembered choice holds until the configured default shows up.
        assert_eq!(registry.selected_id().await.as_deref(), Some("Den-Spotify"));
        registry
            .upsert_channel(ChannelKind::Webserver, "Loft-Spotify", "Loft-Spotify")
            .await;
        assert_eq!(registry.selected_id().await.as_deref(), Some("Loft-Spotify"));
    }

    #[tokio::test]
    async fn test_remembered_choice_beats_auto_selection() {
        let registry = ChannelRegistry::with_defaults(None, Some("Den-Spotify".into()));
        registry
            .upsert_channel(ChannelKind::Webserver, "Loft-Spotify", "Loft-Spotify")
            .await;
        registry.set_play_state("Loft-Spotify", PlayState::Playing).await;
        assert_eq!(registry.selected_id().await.as_deref(), Some("Loft-Spotify"));

        registry
            .upsert_channel(ChannelKind::Webserver, "Den-Spotify", "Den-Spotify")
            .await;
        assert_eq!(registry.selected_id().await.as_deref(), Some("Den-Spotify"));

        // Consumed once restored.
        registry.select("Loft-Spotify").await.unwrap();
        registry.remove_channel("Den-Spotify").await;
        registry
            .upsert_channel(ChannelKind::Webserver, "Den-Spotify", "Den-Spotify")
            .await;
        assert_eq!(registry.selected_id().await.as_deref(), Some("Loft-Spotify"));
    }

    #[tokio::test]
    async fn test_removing_selected_reselects() {
        let registry = ChannelRegistry::new();
        registry
            .upsert_channel(ChannelKind::Webserver, "Den-Spotify", "Den-Spotify")
            .await;
        registry
            .upsert_channel(ChannelKind::Webserver, "Den-Apple Music", "Den-Apple Music")
            .await;
        assert_eq!(registry.selected_id().await.as_deref(), Some("Den-Spotify"));

        registry.remove_channel("Den-Spotify").await;
        assert_eq!(
            registry.selected_id().await.as_deref(),
            Some("Den-Apple Music")
        );
    }

    #[tokio::test]
    async fn test_sync_channels_scoped_to_owner() {
        let registry = ChannelRegistry::new();
        registry
            .upsert_channel(ChannelKind::Webserver, "Den-Spotify", "Den-Spotify")
            .await;
        registry
            .upsert_channel(ChannelKind::Webserver, "Office-Spotify", "Office-Spotify")
            .await;
        registry.set_shuffle("Den-Spotify", true).await;

        // The Den webserver still reports Spotify and now Apple Music too.
        let online = vec![
            ("Den-Spotify".to_string(), "Den-Spotify".to_string()),
            ("Den-Apple Music".to_string(), "Den-Apple Music".to_string()),
        ];
        registry
            .sync_channels(ChannelKind::Webserver, |id| id.starts_with("Den-"), &online)
            .await;

        let ids = registry.ids().await;
        assert_eq!(ids, vec!["Den-Spotify", "Office-Spotify", "Den-Apple Music"]);
        assert_eq!(registry.get("Den-Spotify").await.map(|c| c.shuffle), Some(true));

        registry
            .sync_channels(ChannelKind::Webserver, |id| id.starts_with("Den-"), &[])
            .await;
        assert_eq!(registry.ids().await, vec!["Office-Spotify"]);
    }

    #[tokio::test]
    async fn test_toggles_and_unknown_select() {
        let registry = ChannelRegistry::new();
        registry
            .upsert_channel(ChannelKind::Webserver, "Den-Spotify", "Den-Spotify")
            .await;
        assert_eq!(
            registry.toggle_play("Den-Spotify").await,
            Some(PlayState::Playing)
        );
        assert_eq!(registry.toggle_shuffle("Den-Spotify").await, Some(true));
        assert_eq!(registry.toggle_play("nope").await, None);
        assert_eq!(
            registry.select("nope").await,
            Err(RegistryError::UnknownChannel("nope".into()))
        );
    }

    #[test]
    fn test_validate_source_names() {
        assert!(ChannelRegistry::validate_source_names(["Den", "Office"]).is_ok());
        assert_eq!(
            ChannelRegistry::validate_source_names(["Den", "Den"]),
            Err(RegistryError::DuplicateSource("Den".into()))
        );
        assert_eq!(
            ChannelRegistry::validate_source_names([" "]),
            Err(RegistryError::EmptySourceName)
        );
    }
}
