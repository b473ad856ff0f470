//! Tolerant extraction of a summary record from free-form summarizer output.
//!
//! Summarizer text is expected to *contain* a JSON object, not to *be* one.
//! Parsing never fails with an error; it reports how much it could recover.
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

pub const DEFAULT_TOPIC: &str = "General chat";
pub const DEFAULT_SUMMARY: &str = "Brief discussion";
pub const DEFAULT_IMPORTANCE: f64 = 0.5;
pub const MIN_IMPORTANCE: f64 = 0.1;
pub const MAX_IMPORTANCE: f64 = 1.0;

lazy_static! {
    static ref FENCE_REGEX: Regex = Regex::new(r"```[A-Za-z0-9_-]*").unwrap();
    static ref TRAILING_COMMA_REGEX: Regex = Regex::new(r",(\s*[}\]])").unwrap();
    static ref TOPIC_REGEX: Regex = Regex::new(r#""topic"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap();
    static ref SUMMARY_REGEX: Regex = Regex::new(r#""summary"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap();
    static ref IMPORTANCE_REGEX: Regex = Regex::new(r#""importance"\s*:\s*"?(-?[0-9]*\.?[0-9]+)"?"#).unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSummary {
    pub topic: String,
    pub summary: String,
    /// Always within [`MIN_IMPORTANCE`, `MAX_IMPORTANCE`]
    pub importance: f64,
    pub key_points: Vec<String>,
}

impl ParsedSummary {
    /// Summary text with key points appended, as stored on the chunk
    pub fn chunk_summary(&self) -> String {
        if self.key_points.is_empty() {
            self.summary.clone()
        } else {
            format!("{}\nKey points: {}", self.summary, self.key_points.join("; "))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// All required fields were present
    Complete(ParsedSummary),
    /// Something was recovered; the listed fields hold placeholders
    Partial {
        summary: ParsedSummary,
        defaulted: Vec<&'static str>,
    },
    /// Nothing usable in the text
    Unrecoverable,
}

pub fn clamp_importance(value: f64) -> f64 {
    if value.is_nan() {
        return DEFAULT_IMPORTANCE;
    }
    value.clamp(MIN_IMPORTANCE, MAX_IMPORTANCE)
}

pub fn parse_summary(raw: &str) -> ParseOutcome {
    let cleaned = strip_noise(raw);
    if cleaned.is_empty() {
        return ParseOutcome::Unrecoverable;
    }

    // An object without any summary field is an echo or an example, not the answer
    if let Some(object) = find_json_objects(&cleaned).into_iter().find(has_summary_field) {
        return from_object(&object);
    }

    debug!("No usable JSON object in summarizer output, trying field patterns");
    from_patterns(&cleaned)
}

/// Drop reasoning blocks (everything up to the last `</think>`) and code fences
fn strip_noise(raw: &str) -> String {
    let tail = match raw.rfind("</think>") {
        Some(idx) => &raw[idx + "</think>".len()..],
        None => raw,
    };
    FENCE_REGEX.replace_all(tail, "").trim().to_string()
}

/// Balanced top-level `{...}` spans that decode to JSON objects, in order of appearance
fn find_json_objects(text: &str) -> Vec<Map<String, Value>> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(begin) = start.take() {
                        if let Some(object) = decode_object(&text[begin..=idx]) {
                            objects.push(object);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    objects
}

fn decode_object(candidate: &str) -> Option<Map<String, Value>> {
    let decoded = serde_json::from_str::<Value>(candidate).or_else(|_| {
        let repaired = TRAILING_COMMA_REGEX.replace_all(candidate, "$1");
        serde_json::from_str::<Value>(&repaired)
    });
    match decoded {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn has_summary_field(object: &Map<String, Value>) -> bool {
    ["topic", "summary", "importance"].iter().any(|key| object.contains_key(*key))
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn from_object(object: &Map<String, Value>) -> ParseOutcome {
    let topic = non_empty_string(object.get("topic"));
    let summary = non_empty_string(object.get("summary"));
    let importance = number(object.get("importance"));
    let key_points = object
        .get("key_points")
        .and_then(Value::as_array)
        .map(|points| {
            points
                .iter()
                .filter_map(|p| p.as_str().map(str::trim).filter(|s| !s.is_empty()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    assemble(topic, summary, importance, key_points)
}

fn from_patterns(text: &str) -> ParseOutcome {
    let capture = |re: &Regex| re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string());
    let topic = capture(&*TOPIC_REGEX).map(|s| unescape(&s)).filter(|s| !s.trim().is_empty());
    let summary = capture(&*SUMMARY_REGEX).map(|s| unescape(&s)).filter(|s| !s.trim().is_empty());
    let importance = capture(&*IMPORTANCE_REGEX).and_then(|s| s.parse().ok());

    if topic.is_none() && summary.is_none() && importance.is_none() {
        return ParseOutcome::Unrecoverable;
    }
    assemble(topic, summary, importance, Vec::new())
}

fn unescape(fragment: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", fragment)).unwrap_or_else(|_| fragment.to_string())
}

fn assemble(
    topic: Option<String>,
    summary: Option<String>,
    importance: Option<f64>,
    key_points: Vec<String>,
) -> ParseOutcome {
    let mut defaulted = Vec::new();
    let topic = topic.unwrap_or_else(|| {
        defaulted.push("topic");
        DEFAULT_TOPIC.to_string()
    });
    let summary = summary.unwrap_or_else(|| {
        defaulted.push("summary");
        DEFAULT_SUMMARY.to_string()
    });
    let importance = clamp_importance(importance.unwrap_or_else(|| {
        defaulted.push("importance");
        DEFAULT_IMPORTANCE
    }));

    let parsed = ParsedSummary { topic, summary, importance, key_points };
    if defaulted.is_empty() {
        ParseOutcome::Complete(parsed)
    } else {
        ParseOutcome::Partial { summary: parsed, defaulted }
    }
}
