//! Plain-text rendering and chunking.

use std::sync::LazyLock;

use regex::{Captures, Regex};

// Keeps <br>/<br/> (group 1) and matches every other tag (group 2); a
// two-group alternation avoids lookaround, which `regex` does not support.
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(<br\s*/?>)|(<[^>]*>)").unwrap());

/// Render an HTML message body as plain text: `<br>` variants become
/// newlines, every other tag is stripped, entities are unescaped.
pub fn render_plain(html: &str) -> String {
    let stripped = TAG_RE.replace_all(html, |caps: &Captures<'_>| {
        if caps.get(1).is_some() { "\n" } else { "" }
    });
    unescape_entities(&stripped)
}

/// Decode the HTML entities the server emits.
pub fn unescape_entities(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        // Entities are short; an unterminated or overlong one is literal.
        let Some(end) = rest.find(';').filter(|&e| e <= 8) else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };
        let entity = &rest[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" | "#39" => Some('\''),
            "nbsp" => Some(' '),
            _ => entity
                .strip_prefix('#')
                .and_then(|n| n.parse::<u32>().ok())
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Split `text` into chunks of at most `max_len` characters without
/// breaking words. A single word longer than `max_len` is hard-split.
pub fn split_into_chunks(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max_len {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let mut piece = String::new();
            for c in word.chars() {
                if piece.chars().count() == max_len {
                    chunks.push(std::mem::take(&mut piece));
                }
                piece.push(c);
            }
            current = piece;
            continue;
        }
        let needed = if current.is_empty() {
            word_len
        } else {
            current.chars().count() + 1 + word_len
        };
        if needed > max_len && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current.push_str(word);
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
