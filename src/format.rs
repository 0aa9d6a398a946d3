//! Reply text cleanup for speech output
//!
//! Replies are shown as markdown but spoken as plain prose. Formatting
//! markers are stripped and symbols a synthesizer would read literally are
//! spelled out or dropped.

use std::sync::LazyLock;

use regex::Regex;

/// `[text](url)` links
static LINK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("valid regex"));

/// Punctuation kept in spoken text
const SPOKEN_PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':', '\'', '"', '(', ')'];

/// Whether `text` carries markdown formatting worth rendering
#[must_use]
pub fn has_markdown(text: &str) -> bool {
    text.contains("**")
        || text.contains('`')
        || LINK_REGEX.is_match(text)
        || text.lines().any(|line| {
            let line = line.trim_start();
            line.starts_with('#')
                || line.starts_with("> ")
                || line.starts_with("- ")
                || line.starts_with("* ")
        })
}

/// Convert a markdown reply into text suitable for speech synthesis
#[must_use]
pub fn speakable(reply: &str) -> String {
    let mut spoken = String::with_capacity(reply.len());

    for line in reply.lines() {
        let line = strip_line_markers(line);
        if line.is_empty() {
            continue;
        }
        let line = LINK_REGEX.replace_all(line, "$1");

        for c in line.chars() {
            match c {
                '*' | '_' | '`' | '#' | '~' => {}
                '-' | '\u{2013}' | '\u{2014}' => spoken.push(' '),
                '\u{2018}' | '\u{2019}' => spoken.push('\''),
                '\u{201C}' | '\u{201D}' | '\u{201E}' => spoken.push('"'),
                '/' => spoken.push_str(" slash "),
                '&' => spoken.push_str(" and "),
                c if c.is_alphanumeric() || c.is_whitespace() => spoken.push(c),
                c if SPOKEN_PUNCTUATION.contains(&c) => spoken.push(c),
                _ => {}
            }
        }
        spoken.push(' ');
    }

    spoken.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop heading, quote and bullet markers at the start of a line
fn strip_line_markers(line: &str) -> &str {
    let mut line = line.trim();
    line = line.trim_start_matches('#').trim_start();
    line = line.trim_start_matches('>').trim_start();
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        line = rest;
    }
    line.trim()
}
