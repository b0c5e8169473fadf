//! Per-feed ingestion into the shared description store.

use epgdesc_core::markup::repair;
use epgdesc_core::{clean_title, DescriptionStore, Feed, RawProgram, SkipReason, UpsertOutcome};
use serde::Serialize;

use crate::resolver::ChannelResolver;

/// Counters for one ingestion pass. Record-level rejections only show up here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub programs_seen: usize,
    pub out_of_scope: usize,
    pub malformed: usize,
    pub inserted: usize,
    pub extended: usize,
    pub too_short: usize,
    pub placeholder: usize,
    pub not_longer: usize,
    pub markup_repaired: usize,
    pub titles_cleaned: usize,
}

impl IngestStats {
    /// Records that changed the store (new + extended).
    pub fn absorbed(&self) -> usize {
        self.inserted + self.extended
    }

    pub fn skipped(&self) -> usize {
        self.too_short + self.placeholder + self.not_longer
    }

    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Extended => self.extended += 1,
            UpsertOutcome::Skipped(SkipReason::TooShort) => self.too_short += 1,
            UpsertOutcome::Skipped(SkipReason::Placeholder) => self.placeholder += 1,
            UpsertOutcome::Skipped(SkipReason::NotLonger) => self.not_longer += 1,
        }
    }

    pub fn merge(&mut self, other: &IngestStats) {
        self.programs_seen += other.programs_seen;
        self.out_of_scope += other.out_of_scope;
        self.malformed += other.malformed;
        self.inserted += other.inserted;
        self.extended += other.extended;
        self.too_short += other.too_short;
        self.placeholder += other.placeholder;
        self.not_longer += other.not_longer;
        self.markup_repaired += other.markup_repaired;
        self.titles_cleaned += other.titles_cleaned;
    }
}

/// Result of one configured source feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedOutcome {
    Absorbed(IngestStats),
    FeedFailed { reason: String },
}

impl FeedOutcome {
    pub fn absorbed(&self) -> usize {
        match self {
            Self::Absorbed(stats) => stats.absorbed(),
            Self::FeedFailed { .. } => 0,
        }
    }

    pub fn stats(&self) -> Option<&IngestStats> {
        match self {
            Self::Absorbed(stats) => Some(stats),
            Self::FeedFailed { .. } => None,
        }
    }
}

/// Absorb every in-scope program of `feed` into `store`.
pub fn ingest_feed(store: &mut DescriptionStore, resolver: &ChannelResolver, feed: &Feed) -> IngestStats {
    let mut stats = IngestStats::default();
    for program in &feed.programs {
        ingest_program(store, resolver, program, &mut stats);
    }
    stats
}

/// Returns the merge outcome, or `None` when the program was dropped before merging.
pub fn ingest_program(
    store: &mut DescriptionStore,
    resolver: &ChannelResolver,
    program: &RawProgram,
    stats: &mut IngestStats,
) -> Option<UpsertOutcome> {
    stats.programs_seen += 1;

    let Some(canonical) = resolver.resolve_program(program) else {
        stats.out_of_scope += 1;
        return None;
    };

    let (Some(raw_title), Some(raw_desc)) = (program.title.as_deref(), program.desc.as_deref()) else {
        stats.malformed += 1;
        return None;
    };

    let title = repair(raw_title);
    if title.is_empty() {
        stats.malformed += 1;
        return None;
    }
    let cleaned = clean_title(&title);
    if cleaned.modified {
        stats.titles_cleaned += 1;
    }

    if repair(raw_desc) != raw_desc {
        stats.markup_repaired += 1;
    }

    // upsert does the one repair of the stored text
    let outcome = store.upsert(canonical, &cleaned.title, Some(raw_desc));
    stats.record(outcome);
    Some(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use epgdesc_core::FeedChannel;

    fn resolver() -> ChannelResolver {
        ChannelResolver::build(&Feed {
            channels: vec![FeedChannel {
                id: "cctv1".into(),
                display_names: vec!["CCTV-1".into(), "中央一台".into()],
            }],
            programs: Vec::new(),
        })
    }

    fn program(channel: &str, title: Option<&str>, desc: Option<&str>) -> RawProgram {
        RawProgram {
            channel_id: format!("id-{channel}"),
            channel_name: channel.to_string(),
            title: title.map(str::to_string),
            desc: desc.map(str::to_string),
        }
    }

    #[test]
    fn aliases_and_title_noise_collapse_to_one_record() {
        let desc_a = "甲".repeat(40);
        let desc_b = "乙".repeat(60);
        let mut store = DescriptionStore::new();
        let resolver = resolver();

        let feed_a = Feed {
            channels: Vec::new(),
            programs: vec![program("中央一台", Some("新闻联播(1)"), Some(&desc_a))],
        };
        let feed_b = Feed {
            channels: Vec::new(),
            programs: vec![program("CCTV-1", Some("新闻联播 2024-05-01"), Some(&desc_b))],
        };

        let a = ingest_feed(&mut store, &resolver, &feed_a);
        assert_eq!(a.inserted, 1);
        let b = ingest_feed(&mut store, &resolver, &feed_b);
        assert_eq!(b.extended, 1);
        assert_eq!(b.titles_cleaned, 1);

        assert_eq!(store.record_count(), 1);
        let record = store.lookup("CCTV-1", "新闻联播").expect("record");
        assert_eq!(record.channel, "CCTV-1");
        assert_eq!(record.title, "新闻联播");
        assert_eq!(record.desc, desc_b);
    }

    #[test]
    fn out_of_scope_and_malformed_are_counted_not_merged() {
        let mut store = DescriptionStore::new();
        let feed = Feed {
            channels: Vec::new(),
            programs: vec![
                program("某地方台", Some("地方新闻"), Some("本地新闻资讯节目")),
                program("CCTV-1", None, Some("没有标题的节目简介")),
                program("CCTV-1", Some("焦点访谈"), None),
                program("CCTV-1", Some("&nbsp;"), Some("标题只有空白字符")),
            ],
        };
        let stats = ingest_feed(&mut store, &resolver(), &feed);
        assert_eq!(stats.programs_seen, 4);
        assert_eq!(stats.out_of_scope, 1);
        assert_eq!(stats.malformed, 3);
        assert_eq!(stats.absorbed(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn skip_reasons_and_repairs_are_tallied() {
        let mut store = DescriptionStore::new();
        let feed = Feed {
            channels: Vec::new(),
            programs: vec![
                program("CCTV-1", Some("天气预报"), Some("暂无节目简介")),
                program("CCTV-1", Some("动画"), Some("短")),
                program("CCTV-1", Some("电影"), Some("改编自&amp;lt;三体&amp;gt;的剧集")),
                program("CCTV-1", Some("电影"), Some("改编自三体")),
            ],
        };
        let stats = ingest_feed(&mut store, &resolver(), &feed);
        assert_eq!(stats.placeholder, 1);
        assert_eq!(stats.too_short, 1);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.not_longer, 1);
        assert_eq!(stats.markup_repaired, 1);
        assert_eq!(stats.skipped(), 3);
        assert_eq!(store.lookup("CCTV-1", "电影").unwrap().desc, "改编自《三体》的剧集");
    }

    #[test]
    fn program_on_unknown_display_name_is_dropped_even_if_id_matches() {
        let mut store = DescriptionStore::new();
        let mut stats = IngestStats::default();
        let uhd = RawProgram {
            channel_id: "CCTV-1".into(),
            channel_name: "CCTV1 4K超高清".into(),
            title: Some("新闻联播".into()),
            desc: Some("超高清频道播出的新闻节目".into()),
        };
        assert_eq!(ingest_program(&mut store, &resolver(), &uhd, &mut stats), None);
        assert_eq!(stats.out_of_scope, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn deeply_escaped_desc_is_repaired_exactly_once() {
        let mut nested = "&lt;流浪地球&gt;".to_string();
        for _ in 0..12 {
            nested = nested.replace('&', "&amp;");
        }
        let raw = format!("影片{nested}讲述了太阳即将毁灭的故事");

        let mut store = DescriptionStore::new();
        let mut stats = IngestStats::default();
        let feed_program = program("CCTV-1", Some("流浪地球"), Some(&raw));
        let outcome = ingest_program(&mut store, &resolver(), &feed_program, &mut stats);

        assert_eq!(outcome, Some(UpsertOutcome::Inserted));
        assert_eq!(stats.markup_repaired, 1);
        assert_eq!(store.lookup("CCTV-1", "流浪地球").unwrap().desc, repair(&raw));
    }

    #[test]
    fn feed_outcome_reports_absorbed_count() {
        let mut stats = IngestStats::default();
        stats.record(UpsertOutcome::Inserted);
        stats.record(UpsertOutcome::Extended);
        stats.record(UpsertOutcome::Skipped(SkipReason::NotLonger));
        assert_eq!(FeedOutcome::Absorbed(stats).absorbed(), 2);
        assert_eq!(
            FeedOutcome::FeedFailed {
                reason: "timeout".into()
            }
            .absorbed(),
            0
        );

        let mut total = IngestStats::default();
        total.merge(&stats);
        total.merge(&stats);
        assert_eq!(total.absorbed(), 4);
    }
}
