//! Keyword extraction used for chunk scoring

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    static ref WORD_REGEX: Regex = Regex::new(r"\b\w{3,}\b").unwrap();

    // Group chats in this deployment mix English and Russian
    static ref STOP_WORDS: HashSet<&'static str> = [
        "the", "and", "but", "for", "with", "are", "was", "were", "been", "being",
        "have", "has", "had", "does", "did", "will", "would", "shall", "should",
        "may", "might", "must", "can", "could", "you", "she", "they", "him", "her",
        "them", "your", "his", "its", "our", "their", "mine", "yours", "hers",
        "ours", "theirs", "this", "that", "these", "those", "not", "just", "also",
        "что", "это", "как", "где", "когда", "почему", "если", "уже", "еще", "для",
        "или", "нет", "так", "вот", "тут", "там", "был", "была", "было", "были",
    ]
    .into_iter()
    .collect();
}

/// Lowercase word tokens of at least `min_len` characters, minus stopwords
#[derive(Debug, Clone)]
pub struct KeywordExtractor {
    min_len: usize,
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self { min_len: 3 }
    }
}

impl KeywordExtractor {
    pub fn extract(&self, text: &str) -> HashSet<String> {
        let lower = text.to_lowercase();
        WORD_REGEX
            .find_iter(&lower)
            .map(|m| m.as_str())
            .filter(|word| word.chars().count() >= self.min_len)
            .filter(|word| !is_stop_word(word))
            .map(str::to_string)
            .collect()
    }
}

/// Expects an already lowercased word
fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(word)
}

/// |a ∩ b| / |a ∪ b|, zero when either side is empty
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(words: &[&str]) -> HashSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_extract_lowercases_and_filters() {
        let keywords = KeywordExtractor::default().extract("The Deploy went fine, and we ate pizza at 5pm");
        assert!(keywords.contains("deploy"));
        assert!(keywords.contains("pizza"));
        assert!(keywords.contains("5pm"));
        assert!(!keywords.contains("the"));
        assert!(!keywords.contains("and"));
        assert!(!keywords.contains("we"));
        assert!(!keywords.contains("at"));
    }

    #[test]
    fn test_extract_handles_cyrillic() {
        let keywords = KeywordExtractor::default().extract("Что это за проект? Проект горит!");
        assert_eq!(keywords, set(&["проект", "горит"]));
    }

    #[test]
    fn test_extract_empty_and_stopword_only_text() {
        let extractor = KeywordExtractor::default();
        assert!(extractor.extract("").is_empty());
        assert!(extractor.extract("the and but this that").is_empty());
    }

    #[test]
    fn test_stop_words_filtered_after_lowercasing() {
        assert!(is_stop_word("the"));
        assert!(!is_stop_word("rust"));
        let keywords = KeywordExtractor::default().extract("THE Rust Это");
        assert_eq!(keywords.len(), 1);
        assert!(keywords.contains("rust"));
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard(&set(&["a1x", "b2x"]), &set(&["b2x", "c3x"])), 1.0 / 3.0);
        assert_eq!(jaccard(&set(&["same"]), &set(&["same"])), 1.0);
        assert_eq!(jaccard(&set(&[]), &set(&["x"])), 0.0);
        assert_eq!(jaccard(&set(&[]), &set(&[])), 0.0);
    }
}
