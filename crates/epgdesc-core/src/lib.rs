//! Core domain model and text reconciliation primitives for epgdesc.

use serde::{Deserialize, Serialize};

pub mod markup;
pub mod normalize;
pub mod store;
pub mod title;

pub use normalize::{normalize, normalize_channel};
pub use store::{DescriptionStore, SkipReason, UpsertOutcome};
pub use title::{clean_title, CleanedTitle};

pub const CRATE_NAME: &str = "epgdesc-core";

/// One merged synopsis entry. Display strings are first-seen; only `desc` is ever replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionRecord {
    pub channel: String,
    pub title: String,
    pub desc: String,
}

/// Merge identity of a program: normalized canonical channel + normalized cleaned title.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProgramKey {
    pub channel: String,
    pub title: String,
}

impl ProgramKey {
    pub fn new(canonical_channel: &str, cleaned_title: &str) -> Self {
        Self {
            channel: normalize_channel(canonical_channel),
            title: normalize(cleaned_title),
        }
    }
}

/// A `<channel>` entry of a schedule feed with its ordered display names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedChannel {
    pub id: String,
    pub display_names: Vec<String>,
}

impl FeedChannel {
    pub fn primary_name(&self) -> Option<&str> {
        self.display_names.first().map(String::as_str)
    }
}

/// Transient per-source program entry; discarded once absorbed or rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawProgram {
    pub channel_id: String,
    pub channel_name: String,
    pub title: Option<String>,
    pub desc: Option<String>,
}

/// Parsed schedule document: only the parts reconciliation needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub channels: Vec<FeedChannel>,
    pub programs: Vec<RawProgram>,
}
