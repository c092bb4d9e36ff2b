//! Weighted-ratio string similarity on a 0-100 scale.
//!
//! The score is the best of several views of the two strings: plain Indel
//! similarity, token-sorted and token-set similarity (scaled by 0.95), and,
//! when the lengths differ a lot, best-window partial similarity (scaled by
//! 0.9, or 0.6 for very different lengths).

use rapidfuzz::distance::indel;
use std::collections::BTreeSet;

const TOKEN_SCALE: f64 = 95.0;
const PARTIAL_SCALE: f64 = 90.0;
const LONG_PARTIAL_SCALE: f64 = 60.0;

fn scaled(score: f64, percent: f64) -> f64 {
    score * percent / 100.0
}

/// Indel similarity `2 * lcs / (|a| + |b|)`, 0-100.
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    indel::normalized_similarity(a.chars(), b.chars()) * 100.0
}

/// Best `ratio` of the shorter string against every equally long window of the longer.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let long_chars: Vec<char> = long.chars().collect();
    let width = short.chars().count();
    if width == 0 {
        return 0.0;
    }
    if width == long_chars.len() {
        return ratio(short, long);
    }

    long_chars
        .windows(width)
        .map(|w| ratio(short, &w.iter().collect::<String>()))
        .fold(0.0, f64::max)
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

/// Compares the shared tokens against each side's full token set; a string
/// whose tokens are a subset of the other's scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<&str> = a.split_whitespace().collect();
    let tb: BTreeSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let common: Vec<&str> = ta.intersection(&tb).copied().collect();
    let only_a: Vec<&str> = ta.difference(&tb).copied().collect();
    let only_b: Vec<&str> = tb.difference(&ta).copied().collect();

    if !common.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 100.0;
    }

    let base = common.join(" ");
    let join = |rest: &[&str]| {
        if base.is_empty() {
            rest.join(" ")
        } else {
            format!("{} {}", base, rest.join(" "))
        }
    };
    let with_a = join(&only_a[..]);
    let with_b = join(&only_b[..]);

    ratio(&base, &with_a)
        .max(ratio(&base, &with_b))
        .max(ratio(&with_a, &with_b))
}

/// Any shared token scores 100; otherwise the best window of the leftover tokens.
pub fn partial_token_set_ratio(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<&str> = a.split_whitespace().collect();
    let tb: BTreeSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    if ta.intersection(&tb).next().is_some() {
        return 100.0;
    }
    let only_a: Vec<&str> = ta.difference(&tb).copied().collect();
    let only_b: Vec<&str> = tb.difference(&ta).copied().collect();
    partial_ratio(&only_a.join(" "), &only_b.join(" "))
}

pub fn weighted_ratio(a: &str, b: &str) -> f64 {
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if len_a == 0 || len_b == 0 {
        return 0.0;
    }

    let len_ratio = len_a.max(len_b) as f64 / len_a.min(len_b) as f64;
    let direct = ratio(a, b);
    let token = token_sort_ratio(a, b).max(token_set_ratio(a, b));

    if len_ratio < 1.5 {
        return direct.max(scaled(token, TOKEN_SCALE));
    }

    let partial_scale = if len_ratio < 8.0 {
        PARTIAL_SCALE
    } else {
        LONG_PARTIAL_SCALE
    };
    let partial = scaled(partial_ratio(a, b), partial_scale);
    let partial_token = scaled(
        scaled(
            partial_ratio(&sorted_tokens(a), &sorted_tokens(b))
                .max(partial_token_set_ratio(a, b)),
            TOKEN_SCALE,
        ),
        partial_scale,
    );

    direct.max(partial).max(partial_token)
}

/// Index and score of the best-scoring choice; the first one wins ties.
pub fn best_match<'a, I>(query: &str, choices: I) -> Option<(usize, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(usize, f64)> = None;
    for (idx, choice) in choices.into_iter().enumerate() {
        let score = weighted_ratio(query, choice);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((idx, score));
        }
    }
    best
}
