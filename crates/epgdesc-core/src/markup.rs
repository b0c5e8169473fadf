//! Repair of nested character-entity escaping in synopsis text.

use html_escape::decode_html_entities;

/// Safety cap on decode passes; real feeds are a few layers deep at most.
pub const MAX_DECODE_PASSES: usize = 10;

/// Leftover markup and named entities rewritten after decoding converges.
const LITERAL_FIXUPS: &[(&str, &str)] = &[
    ("<", "《"),
    (">", "》"),
    ("&quot;", "\""),
    ("&apos;", "'"),
    ("&#39;", "'"),
    ("&nbsp;", " "),
    ("&amp;", "&"),
];

/// Decode repeatedly until a pass is a no-op, then restore citation brackets
/// and collapse whitespace.
pub fn repair(text: &str) -> String {
    let mut current = text.to_string();
    for _ in 0..MAX_DECODE_PASSES {
        let decoded = decode_html_entities(&current);
        if decoded == current {
            break;
        }
        current = decoded.into_owned();
    }

    for (from, to) in LITERAL_FIXUPS {
        if current.contains(from) {
            current = current.replace(from, to);
        }
    }

    current.split_whitespace().collect::<Vec<_>>().join(" ")
}
