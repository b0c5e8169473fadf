//! Matching keys for channel names and program titles.

/// Separators and paired brackets that never carry identity.
fn is_noise(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            '-' | '_'
                | '+'
                | '|'
                | '('
                | ')'
                | '（'
                | '）'
                | '['
                | ']'
                | '【'
                | '】'
                | '《'
                | '》'
                | '「'
                | '」'
                | '『'
                | '』'
        )
}

/// Canonicalize free text into a matching key. Never used for display.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !is_noise(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Same as [`normalize`], but colons are also dropped since feeds disagree on them.
pub fn normalize_channel(name: &str) -> String {
    text_without_colons(&normalize(name))
}

fn text_without_colons(key: &str) -> String {
    key.chars().filter(|c| !matches!(c, ':' | '：')).collect()
}
