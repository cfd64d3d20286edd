//! Edit-distance helpers for phrase matching
//!
//! A spoken phrase is accepted fuzzily when it is within roughly 30% edits of
//! the registered phrase, with a floor of two edits for short phrases.

/// Largest edit distance accepted for a phrase of `phrase_len` characters
pub fn max_edits(phrase_len: usize) -> usize {
    (phrase_len * 3 / 10).max(2)
}

/// Edit distance between `phrase` and `transcript` if it is within the bound, else None
pub fn bounded_distance(phrase: &str, transcript: &str) -> Option<usize> {
    let distance = levenshtein(phrase, transcript);
    (distance <= max_edits(phrase.chars().count())).then_some(distance)
}

/// Calculate Levenshtein distance between two strings
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
