//! Channel identity resolution against the reference feed.

use std::collections::{BTreeSet, HashMap};

use epgdesc_core::{normalize_channel, Feed, RawProgram};

/// normalized alias -> canonical channel name. Rebuilt every run, read-only after.
#[derive(Debug, Clone, Default)]
pub struct ChannelResolver {
    aliases: HashMap<String, String>,
}

impl ChannelResolver {
    /// The first display name of each reference channel is canonical; every
    /// display name (the first included) becomes an alias for it.
    ///
    /// An alias shared by two reference channels resolves to the later one
    /// (last write wins). Possibly unintended, but existing snapshots were keyed
    /// this way.
    pub fn build(reference: &Feed) -> Self {
        let mut aliases = HashMap::new();
        for channel in &reference.channels {
            let Some(canonical) = channel.primary_name() else {
                continue;
            };
            for name in &channel.display_names {
                let key = normalize_channel(name);
                if key.is_empty() {
                    continue;
                }
                aliases.insert(key, canonical.to_string());
            }
        }
        Self { aliases }
    }

    /// `(canonical, true)` for an in-scope name, otherwise `(name, false)`.
    pub fn resolve<'a>(&'a self, name: &'a str) -> (&'a str, bool) {
        match self.aliases.get(&normalize_channel(name)) {
            Some(canonical) => (canonical.as_str(), true),
            None => (name, false),
        }
    }

    /// Canonical channel of a source program, looked up by its channel's display
    /// name only. The raw channel id is never matched.
    pub fn resolve_program<'a>(&'a self, program: &'a RawProgram) -> Option<&'a str> {
        match self.resolve(&program.channel_name) {
            (canonical, true) => Some(canonical),
            (_, false) => None,
        }
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    pub fn canonical_names(&self) -> BTreeSet<&str> {
        self.aliases.values().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
