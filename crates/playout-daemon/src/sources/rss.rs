//! RSS 2.0 feeds, fetched on a timer and formatted from cache.

use super::{FragmentSource, SourceError};
use chrono::{DateTime, Local};
use playout_proto::config::{LanguageConfig, RssConfig, RssFeed};
use playout_proto::protocol::{DisplayPayload, OutputMode};
use playout_proto::text::{to_ascii, wrap_into};
use scraper::Html;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    #[serde(rename = "item", default)]
    items: Vec<FeedItem>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct FeedItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "pubDate", default)]
    pub pub_date: String,
}

pub fn parse_feed(name: &str, xml: &str) -> Result<Vec<FeedItem>, SourceError> {
    let rss: Rss = quick_xml::de::from_str(xml).map_err(|e| SourceError::Malformed {
        source_name: name.to_string(),
        detail: e.to_string(),
    })?;
    Ok(rss.channel.items)
}

/// Text content of an HTML summary, entities decoded and whitespace
/// collapsed.
fn summary_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn published(pub_date: &str, language: &LanguageConfig) -> String {
    match DateTime::parse_from_rfc2822(pub_date.trim()) {
        Ok(date) => date
            .with_timezone(&Local)
            .format(&format!(
                "%d.%m.%Y {} %H:%M {}",
                language.message("at"),
                language.message("h")
            ))
            .to_string(),
        Err(_) => String::new(),
    }
}

pub fn format_item(
    feed: &str,
    item: &FeedItem,
    language: &LanguageConfig,
    mode: OutputMode,
    width_px: u32,
) -> DisplayPayload {
    let published = published(&item.pub_date, language);
    let summary = summary_text(&item.description);
    let ascii = |s: &str| to_ascii(s, &language.conversions);
    match mode {
        OutputMode::Flat => {
            let head = if published.is_empty() {
                feed.to_string()
            } else {
                format!("{} @ {}", feed, published)
            };
            DisplayPayload::FlatText(ascii(&format!("{} => {}: {}", head, item.title, summary)))
        }
        OutputMode::Lines => {
            let mut lines = Vec::new();
            for part in [feed, published.as_str(), item.title.as_str(), summary.as_str()] {
                wrap_into(&ascii(part), width_px, &mut lines);
            }
            DisplayPayload::LineSet(lines)
        }
    }
}

pub struct RssSource {
    client: reqwest::Client,
    config: RssConfig,
    language: LanguageConfig,
    width_px: u32,
    /// Items per feed, in configured feed order.
    cache: RwLock<Vec<(String, Vec<FeedItem>)>>,
}

impl RssSource {
    pub fn new(config: RssConfig, language: LanguageConfig, width_px: u32) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            config,
            language,
            width_px,
            cache: RwLock::new(Vec::new()),
        })
    }

    async fn fetch(&self, feed: &RssFeed) -> Result<Vec<FeedItem>, SourceError> {
        let body = self
            .client
            .get(&feed.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let mut items = parse_feed(&feed.name, &body)?;
        items.truncate(feed.count);
        Ok(items)
    }

    /// Store items for `feed`, replacing what was cached for it.
    pub async fn store(&self, feed: &str, items: Vec<FeedItem>) {
        let mut cache = self.cache.write().await;
        match cache.iter_mut().find(|(name, _)| name.as_str() == feed) {
            Some(entry) => entry.1 = items,
            None => cache.push((feed.to_string(), items)),
        }
    }

    /// Feeds that fail keep their previous items.
    pub async fn refresh(&self) {
        for feed in &self.config.feeds {
            match self.fetch(feed).await {
                Ok(items) => {
                    debug!("RSS {}: {} items", feed.name, items.len());
                    self.store(&feed.name, items).await;
                }
                Err(e) => warn!("RSS {} refresh failed: {}", feed.name, e),
            }
        }
    }

    pub fn spawn_refresh(self: Arc<Self>) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.refresh_interval_mins.max(1) * 60);
        tokio::spawn(async move {
            info!("RSS: {} feeds, refreshing every {:?}", self.config.feeds.len(), interval);
            loop {
                self.refresh().await;
                tokio::time::sleep(interval).await;
            }
        })
    }
}

#[async_trait::async_trait]
impl FragmentSource for RssSource {
    fn name(&self) -> &str {
        "rss"
    }

    async fn fragments(&self, mode: OutputMode) -> Result<Vec<DisplayPayload>, SourceError> {
        let cache = self.cache.read().await;
        Ok(cache
            .iter()
            .flat_map(|(feed, items)| {
                items
                    .iter()
                    .map(move |item| format_item(feed, item, &self.language, mode, self.width_px))
            })
            .collect())
    }
}
