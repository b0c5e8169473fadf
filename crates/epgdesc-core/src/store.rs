//! The merged description knowledge base and its merge policy.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::markup::repair;
use crate::{DescriptionRecord, ProgramKey};

/// Repaired descriptions shorter than this (in chars) carry no information.
pub const MIN_DESC_CHARS: usize = 5;

/// One stock "no synopsis" phrase.
const STOCK_PHRASE: &str = r"(?:暂无(?:节目)?(?:简介|介绍|描述|详情|信息)?(?:内容|信息)?|暂未(?:提供|收录)?(?:节目)?(?:简介|介绍|描述|详情|信息)|无(?:节目)?(?:简介|描述|介绍|详情|信息)|没有(?:节目)?(?:简介|描述|介绍)|本节目暂无(?:简介|介绍|描述)?|节目简介[:：]?\s*(?:无|暂无)|精彩节目[,，\s]*敬请(?:期待|关注)|敬请(?:期待|关注)|no\s+(?:description|synopsis|info(?:rmation)?)(?:\s+available)?|n/?a|none|null|tba|tbd)";

/// The whole description is stock phrases and punctuation, nothing else.
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^[\s\p{{P}}]*{STOCK_PHRASE}(?:[\s\p{{P}}]+{STOCK_PHRASE})*[\s\p{{P}}]*$"
    ))
    .expect("placeholder pattern compiles")
});

pub fn is_placeholder(desc: &str) -> bool {
    PLACEHOLDER.is_match(desc)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Absent, or shorter than [`MIN_DESC_CHARS`] after repair.
    TooShort,
    Placeholder,
    /// An existing record already holds an equal or longer synopsis.
    NotLonger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Extended,
    Skipped(SkipReason),
}

/// normalized channel -> normalized title -> record. The serialized form is the
/// persisted snapshot shape, so loading a snapshot needs no translation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptionStore {
    channels: BTreeMap<String, BTreeMap<String, DescriptionRecord>>,
}

impl DescriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one (channel, title, description) report.
    ///
    /// Keeps the first-seen display strings forever and only ever replaces `desc`
    /// with a strictly longer one, so replaying any report set converges.
    pub fn upsert(
        &mut self,
        canonical_channel: &str,
        cleaned_title: &str,
        raw_desc: Option<&str>,
    ) -> UpsertOutcome {
        let Some(raw_desc) = raw_desc else {
            return UpsertOutcome::Skipped(SkipReason::TooShort);
        };
        let desc = repair(raw_desc);
        let desc_chars = desc.chars().count();
        if desc_chars < MIN_DESC_CHARS {
            return UpsertOutcome::Skipped(SkipReason::TooShort);
        }
        if is_placeholder(&desc) {
            return UpsertOutcome::Skipped(SkipReason::Placeholder);
        }

        let key = ProgramKey::new(canonical_channel, cleaned_title);
        let programs = self.channels.entry(key.channel).or_default();
        match programs.get_mut(&key.title) {
            None => {
                // a channel keeps the display string of its first record
                let channel = programs
                    .values()
                    .next()
                    .map(|r| r.channel.clone())
                    .unwrap_or_else(|| canonical_channel.to_string());
                programs.insert(
                    key.title,
                    DescriptionRecord {
                        channel,
                        title: cleaned_title.to_string(),
                        desc,
                    },
                );
                UpsertOutcome::Inserted
            }
            Some(existing) if desc_chars > existing.desc.chars().count() => {
                existing.desc = desc;
                UpsertOutcome::Extended
            }
            Some(_) => UpsertOutcome::Skipped(SkipReason::NotLonger),
        }
    }

    pub fn get(&self, key: &ProgramKey) -> Option<&DescriptionRecord> {
        self.channels.get(&key.channel)?.get(&key.title)
    }

    pub fn lookup(&self, canonical_channel: &str, cleaned_title: &str) -> Option<&DescriptionRecord> {
        self.get(&ProgramKey::new(canonical_channel, cleaned_title))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.values().filter(|p| !p.is_empty()).count()
    }

    pub fn record_count(&self) -> usize {
        self.channels.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Records of one normalized channel key, ordered by normalized title.
    pub fn channel_records(&self, channel_key: &str) -> impl Iterator<Item = &DescriptionRecord> {
        self.channels
            .get(channel_key)
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    /// Display string shared by the records of one normalized channel key.
    pub fn channel_display(&self, channel_key: &str) -> Option<&str> {
        self.channel_records(channel_key).next().map(|r| r.channel.as_str())
    }

    /// (normalized channel, record count) for every non-empty channel.
    pub fn channel_sizes(&self) -> impl Iterator<Item = (&str, usize)> {
        self.channels
            .iter()
            .filter(|(_, programs)| !programs.is_empty())
            .map(|(key, programs)| (key.as_str(), programs.len()))
    }

    pub fn records(&self) -> impl Iterator<Item = (ProgramKey, &DescriptionRecord)> {
        self.channels.iter().flat_map(|(channel, programs)| {
            programs.iter().map(move |(title, record)| {
                (
                    ProgramKey {
                        channel: channel.clone(),
                        title: title.clone(),
                    },
                    record,
                )
            })
        })
    }
}
