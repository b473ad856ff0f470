//! Efficient text processing utilities

use std::borrow::Cow;
use regex::Regex;
use lazy_static::lazy_static;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

pub struct TextUtils;

impl TextUtils {
    /// Collapse runs of whitespace (including newlines) to single spaces
    pub fn normalize_whitespace(text: &str) -> Cow<'_, str> {
        if WHITESPACE_REGEX.find_iter(text).any(|m| m.as_str() != " ") || text.trim() != text {
            Cow::Owned(WHITESPACE_REGEX.replace_all(text, " ").trim().to_string())
        } else {
            Cow::Borrowed(text)
        }
    }

    /// Truncate to at most `max_chars` characters, ending in "..." when cut
    pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
        if text.chars().count() <= max_chars {
            return Cow::Borrowed(text);
        }
        if max_chars <= 3 {
            return Cow::Borrowed("...");
        }
        let mut result: String = text.chars().take(max_chars - 3).collect();
        result.push_str("...");
        Cow::Owned(result)
    }

    /// Short content hash used to identify a response without storing a semantic key
    pub fn fingerprint(text: &str) -> String {
        blake3::hash(text.as_bytes()).to_hex().as_str()[..8].to_string()
    }

    /// Last four characters of an author id, enough to tell speakers apart in a transcript
    pub fn short_author(author_id: &str) -> Cow<'_, str> {
        let len = author_id.chars().count();
        if len <= 4 {
            Cow::Borrowed(author_id)
        } else {
            Cow::Owned(author_id.chars().skip(len - 4).collect())
        }
    }

    /// Human label for an age in days: "5h ago", "3d ago", "2w ago", "4mo ago"
    pub fn format_age(age_days: f64) -> String {
        let age_days = age_days.max(0.0);
        if age_days < 1.0 {
            format!("{}h ago", (age_days * 24.0) as i64)
        } else if age_days < 7.0 {
            format!("{}d ago", age_days as i64)
        } else if age_days < 30.0 {
            format!("{}w ago", (age_days / 7.0) as i64)
        } else {
            format!("{}mo ago", (age_days / 30.0) as i64)
        }
    }
}
