//! Near-duplicate detection for extracted memories.

use std::collections::HashSet;

/// Above this blended similarity two memories count as the same fact.
pub const DUPLICATE_THRESHOLD: f64 = 0.8;

/// Blended string similarity in [0, 1]: 30% word Jaccard, 50% normalized
/// Levenshtein, 20% character-bigram Jaccard. Containment short-circuits to
/// the length ratio.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let (len_a, len_b) = (a.chars().count(), b.chars().count());
    if a.contains(&b) || b.contains(&a) {
        return len_a.min(len_b) as f64 / len_a.max(len_b) as f64;
    }

    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    let word_score = jaccard(&words_a, &words_b);

    let max_len = len_a.max(len_b) as f64;
    let edit_score = 1.0 - levenshtein(&a, &b) as f64 / max_len;

    word_score * 0.3 + edit_score * 0.5 + bigram_similarity(&a, &b) * 0.2
}

/// Jaccard similarity of the two strings' character bigram sets.
pub fn bigram_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len() < 2 || b.len() < 2 {
        return if a == b { 1.0 } else { 0.0 };
    }
    let grams_a: HashSet<(char, char)> = a.windows(2).map(|w| (w[0], w[1])).collect();
    let grams_b: HashSet<(char, char)> = b.windows(2).map(|w| (w[0], w[1])).collect();
    jaccard(&grams_a, &grams_b)
}

fn jaccard<T: Eq + std::hash::Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != *cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Whether `candidate` repeats anything in `existing`: equal, contained in
/// either direction, or similar above [`DUPLICATE_THRESHOLD`].
pub fn is_duplicate<'a, I>(candidate: &str, existing: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    let candidate = candidate.trim().to_lowercase();
    existing.into_iter().any(|e| {
        let e = e.trim().to_lowercase();
        candidate == e
            || candidate.contains(&e)
            || e.contains(&candidate)
            || text_similarity(&candidate, &e) > DUPLICATE_THRESHOLD
    })
}
