//! Program title cleaning: strip trailing date, episode and broadcast annotations.
//!
//! Rules run in a fixed order and each strips at most one suffix, so a later rule
//! only ever sees what the earlier ones left behind. A rule is a list of
//! alternative suffix patterns; the first alternative that matches wins.

use once_cell::sync::Lazy;
use regex::Regex;

/// Titles shorter than this (in chars) after cleaning are degenerate keys.
pub const MIN_TITLE_CHARS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Date,
    Episode,
    Year,
    BroadcastMarker,
    TrailingNumber,
}

/// One ordered stripping rule. Every pattern has a `cut` group reaching the end
/// of the title; the title is truncated at the start of that group.
pub struct SuffixRule {
    pub kind: RuleKind,
    pub reason: &'static str,
    patterns: Vec<Regex>,
}

impl SuffixRule {
    fn new(kind: RuleKind, reason: &'static str, patterns: &[&str]) -> Self {
        Self {
            kind,
            reason,
            patterns: patterns
                .iter()
                .map(|p| Regex::new(p).expect("title rule pattern compiles"))
                .collect(),
        }
    }

    /// Returns the title with this rule's suffix removed, or `None` if no pattern matched.
    pub fn strip<'a>(&self, title: &'a str) -> Option<&'a str> {
        self.patterns.iter().find_map(|pattern| {
            let cut = pattern.captures(title)?.name("cut")?.start();
            Some(trim_tail(&title[..cut]))
        })
    }
}

fn trim_tail(text: &str) -> &str {
    text.trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '_' | '|' | ':' | '：'))
}

pub static SUFFIX_RULES: Lazy<Vec<SuffixRule>> = Lazy::new(|| {
    vec![
        SuffixRule::new(
            RuleKind::Date,
            "trailing date",
            &[
                r"(?P<cut>[（(]\s*\d{4}[-./年]\d{1,2}[-./月]\d{1,2}日?\s*[)）])\s*$",
                r"(?:^|\D)(?P<cut>\d{4}[-./年]\d{1,2}[-./月]\d{1,2}日?)\s*$",
                r"(?:^|\D)(?P<cut>\d{8})\s*$",
                r"(?:^|\D)(?P<cut>\d{1,2}-\d{1,2})\s*$",
                r"(?:^|\D)(?P<cut>\d{1,2}月\d{1,2}日)\s*$",
            ],
        ),
        SuffixRule::new(
            RuleKind::Episode,
            "episode marker",
            &[
                r"(?P<cut>[（(]\s*第?\d{6,}期?\s*[)）])\s*$",
                r"(?P<cut>第?\d{6,}期?)\s*$",
                r"(?P<cut>第\s*\d+\s*[期集])\s*$",
                r"(?:^|[^A-Za-z])(?P<cut>(?i:ep?)\s*\d+)\s*$",
                r"(?P<cut>[（(]\s*\d{1,4}\s*[)）])\s*$",
                r"(?P<cut>第\s*\d+\s*回)\s*$",
            ],
        ),
        SuffixRule::new(
            RuleKind::Year,
            "trailing year",
            &[r"(?:^|\D)(?P<cut>(?:19|20)\d{2})\s*$"],
        ),
        SuffixRule::new(
            RuleKind::BroadcastMarker,
            "broadcast marker",
            &[r"(?P<cut>[（(\[【]?\s*(?:重播|首播|直播)\s*[)）\]】]?)\s*$"],
        ),
        SuffixRule::new(
            RuleKind::TrailingNumber,
            "trailing number",
            &[r"(?:^|\D)(?P<cut>\d{1,2})\s*$"],
        ),
    ]
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedTitle {
    pub title: String,
    pub modified: bool,
}

/// Strip trailing annotations; falls back to the trimmed original when cleaning
/// would leave fewer than [`MIN_TITLE_CHARS`] characters.
pub fn clean_title(raw: &str) -> CleanedTitle {
    let original = raw.trim();
    let mut current = original;

    for rule in SUFFIX_RULES.iter() {
        let Some(stripped) = rule.strip(current) else {
            continue;
        };
        if rule.kind == RuleKind::TrailingNumber && stripped.chars().count() < MIN_TITLE_CHARS {
            continue;
        }
        current = stripped;
    }

    if current.chars().count() < MIN_TITLE_CHARS {
        return CleanedTitle {
            title: original.to_string(),
            modified: false,
        };
    }

    CleanedTitle {
        title: current.to_string(),
        modified: current != original,
    }
}
