//! Feed source contracts + XMLTV parsing into the core `Feed` model.

use std::collections::HashMap;

use async_trait::async_trait;
use epgdesc_core::{Feed, FeedChannel, RawProgram};
use epgdesc_storage::{FeedFetcher, FetchError, Locator};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "epgdesc-feeds";

fn default_compressed() -> bool {
    true
}

/// One configured feed: where it lives and whether it is expected to be gzip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
    #[serde(default = "default_compressed")]
    pub compressed: bool,
}

impl FeedSpec {
    pub fn new(name: impl Into<String>, url: impl Into<String>, compressed: bool) -> Self {
        Self {
            name: Some(name.into()),
            url: url.into(),
            compressed,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }

    pub fn locator(&self) -> Locator {
        Locator::parse(&self.url)
    }
}

#[derive(Debug, Error)]
pub enum FeedParseError {
    #[error("malformed feed xml: {0}")]
    Xml(#[from] roxmltree::Error),
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] FeedParseError),
    #[error("loading {feed} was aborted")]
    Aborted { feed: String },
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn load(&self, spec: &FeedSpec) -> Result<Feed, FeedError>;
}

/// Retrieves feeds over HTTP or from disk and parses them as XMLTV.
#[derive(Debug, Clone)]
pub struct XmltvFeedSource {
    fetcher: FeedFetcher,
}

impl XmltvFeedSource {
    pub fn new(fetcher: FeedFetcher) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &FeedFetcher {
        &self.fetcher
    }
}

#[async_trait]
impl FeedSource for XmltvFeedSource {
    async fn load(&self, spec: &FeedSpec) -> Result<Feed, FeedError> {
        let doc = self.fetcher.fetch(&spec.locator(), spec.compressed).await?;
        let text = String::from_utf8_lossy(&doc.body);
        let feed = parse_xmltv(&text)?;
        debug!(
            feed = spec.display_name(),
            channels = feed.channels.len(),
            programs = feed.programs.len(),
            "parsed feed"
        );
        Ok(feed)
    }
}

fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn child_text(node: roxmltree::Node<'_, '_>, tag: &str) -> Option<String> {
    node.children()
        .find(|c| c.has_tag_name(tag))
        .and_then(|c| c.text())
        .and_then(text_or_none)
}

/// Parse an XMLTV document. Only whole-document failures are errors; individual
/// programmes with missing parts are kept with `None` fields for the caller to count.
pub fn parse_xmltv(text: &str) -> Result<Feed, FeedParseError> {
    let text = text.trim_start_matches('\u{feff}');
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    let doc = roxmltree::Document::parse_with_options(text, options)?;

    let channels = doc
        .descendants()
        .filter(|n| n.has_tag_name("channel"))
        .map(|n| FeedChannel {
            id: n.attribute("id").unwrap_or_default().trim().to_string(),
            display_names: n
                .children()
                .filter(|c| c.has_tag_name("display-name"))
                .filter_map(|c| c.text().and_then(text_or_none))
                .collect(),
        })
        .collect::<Vec<_>>();

    let primary_names: HashMap<&str, &str> = channels
        .iter()
        .filter_map(|c| Some((c.id.as_str(), c.primary_name()?)))
        .collect();

    let programs = doc
        .descendants()
        .filter(|n| n.has_tag_name("programme"))
        .map(|n| {
            let channel_id = n.attribute("channel").unwrap_or_default().trim().to_string();
            let channel_name = primary_names
                .get(channel_id.as_str())
                .map(|s| s.to_string())
                .unwrap_or_default();
            RawProgram {
                channel_id,
                channel_name,
                title: child_text(n, "title"),
                desc: child_text(n, "desc"),
            }
        })
        .collect();

    Ok(Feed { channels, programs })
}
