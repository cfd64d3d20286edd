//! Transcript normalization
//!
//! Brings raw recognizer output into the form phrases are stored in:
//! lowercase, trimmed, with spoken numbers "zero" through "ten" replaced by digits.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static NUMBER_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(zero|one|two|three|four|five|six|seven|eight|nine|ten)\b")
        .unwrap_or_else(|e| unreachable!("number word pattern is valid: {e}"))
});

fn digit_for(word: &str) -> &'static str {
    match word {
        "zero" => "0",
        "one" => "1",
        "two" => "2",
        "three" => "3",
        "four" => "4",
        "five" => "5",
        "six" => "6",
        "seven" => "7",
        "eight" => "8",
        "nine" => "9",
        "ten" => "10",
        _ => unreachable!("pattern only matches number words"),
    }
}

/// Normalize a transcript for matching. Idempotent.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let trimmed = lowered.trim();
    NUMBER_WORDS
        .replace_all(trimmed, |caps: &Captures| digit_for(&caps[1]))
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercase_and_trim() {
        assert_eq!(normalize("  Turn LEFT  "), "turn left");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_number_words() {
        assert_eq!(normalize("Camera Three"), "camera 3");
        assert_eq!(normalize("one two ten"), "1 2 10");
        assert_eq!(normalize("zero"), "0");
    }

    #[test]
    fn test_number_words_need_word_boundaries() {
        assert_eq!(normalize("someone"), "someone");
        assert_eq!(normalize("tension"), "tension");
        assert_eq!(normalize("often nine"), "often 9");
    }

    #[test]
    fn test_idempotent() {
        for text in ["Ride On", "view seven", " U Turn ", "ten ten", "banana"] {
            let once = normalize(text);
            assert_eq!(normalize(&once), once);
        }
    }
}
