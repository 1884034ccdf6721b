/// Character mention detection
///
/// One whole-word, case-insensitive matcher shared by save-time derivation,
/// name highlighting and presentation emphasis so the three never disagree.
use crate::model::{Character, SceneSegment};
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span<'t> {
    Plain(&'t str),
    /// A matched name as written in the text, with the roster name it matched.
    Mention { text: &'t str, name: String },
}

#[derive(Debug, Clone)]
pub struct MentionMatcher {
    entries: Vec<(String, Regex)>,
    combined: Option<Regex>,
}

impl MentionMatcher {
    pub fn new(roster: &[Character]) -> Self {
        let mut entries = Vec::new();
        for character in roster {
            let name = character.name.trim();
            if name.is_empty() {
                continue;
            }
            match Regex::new(&whole_word_pattern(&[name])) {
                Ok(regex) => entries.push((name.to_string(), regex)),
                Err(err) => tracing::warn!(name, "skipping unmatchable character name: {err}"),
            }
        }

        // Longest names first so "Alexander" wins over "Alex" when both exist.
        let mut names: Vec<&str> = entries.iter().map(|(name, _)| name.as_str()).collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()));
        let combined = if names.is_empty() {
            None
        } else {
            Regex::new(&whole_word_pattern(&names)).ok()
        };

        Self { entries, combined }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `name` (a roster name) appears as a whole word in `text`.
    pub fn mentions(&self, text: &str, name: &str) -> bool {
        self.entries
            .iter()
            .any(|(entry, regex)| entry.eq_ignore_ascii_case(name.trim()) && regex.is_match(text))
    }

    /// Roster names mentioned in `text`, in roster order, without duplicates.
    pub fn mentioned(&self, text: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for (name, regex) in &self.entries {
            if regex.is_match(text) && !found.iter().any(|seen| seen == name) {
                found.push(name.clone());
            }
        }
        found
    }

    /// Splits `text` into plain runs and name mentions for display.
    pub fn highlight<'t>(&self, text: &'t str) -> Vec<Span<'t>> {
        let Some(combined) = &self.combined else {
            return if text.is_empty() { Vec::new() } else { vec![Span::Plain(text)] };
        };

        let mut spans = Vec::new();
        let mut cursor = 0;
        for found in combined.find_iter(text) {
            if found.start() > cursor {
                spans.push(Span::Plain(&text[cursor..found.start()]));
            }
            let matched = found.as_str();
            let name = self
                .entries
                .iter()
                .find(|(name, _)| name.to_lowercase() == matched.to_lowercase())
                .map(|(name, _)| name.clone())
                .unwrap_or_else(|| matched.to_string());
            spans.push(Span::Mention {
                text: matched,
                name,
            });
            cursor = found.end();
        }
        if cursor < text.len() {
            spans.push(Span::Plain(&text[cursor..]));
        }
        spans
    }
}

fn whole_word_pattern(names: &[&str]) -> String {
    let alternatives: Vec<String> = names.iter().map(|name| regex::escape(name)).collect();
    format!(r"(?i)\b(?:{})\b", alternatives.join("|"))
}

/// Names of roster characters mentioned anywhere in `text`.
pub fn detect_mentions(text: &str, roster: &[Character]) -> Vec<String> {
    MentionMatcher::new(roster).mentioned(text)
}

/// Roster entries mentioned in a segment's direction fields; these are the
/// characters emphasised while the scene is presented.
pub fn active_characters<'r>(segment: &SceneSegment, roster: &'r [Character]) -> Vec<&'r Character> {
    let matcher = MentionMatcher::new(roster);
    let text = segment.direction_text();
    roster
        .iter()
        .filter(|character| matcher.mentions(&text, &character.name))
        .collect()
}

/// Loose case-insensitive substring test used when picking conditioning
/// images for frame generation. Unlike [`MentionMatcher`] it also matches
/// inside longer words.
pub fn contains_name(text: &str, name: &str) -> bool {
    let name = name.trim();
    !name.is_empty() && text.to_lowercase().contains(&name.to_lowercase())
}

/// Appends `name` to a free-text field, separated by a space unless the
/// field is empty or already ends in one.
pub fn insert_mention(field: &str, name: &str) -> String {
    if field.is_empty() || field.ends_with(' ') {
        format!("{field}{name}")
    } else {
        format!("{field} {name}")
    }
}
