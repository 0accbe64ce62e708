//! Text similarity for segment-to-reference matching.
//!
//! Both texts are normalized (lowercased, ASCII punctuation stripped)
//! before scoring. The score is the maximum of a whole-string measure and
//! a partial-substring measure, each in [0, 1], so a short diarized
//! fragment can still match a longer reference sentence that contains it.

use strsim::normalized_levenshtein;

/// Lowercase and strip ASCII punctuation, trimming surrounding whitespace.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Best normalized-Levenshtein score of the shorter string against every
/// equal-length character window of the longer one.
fn partial_similarity(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let (short, long) = if a_chars.len() <= b_chars.len() {
        (a_chars, b_chars)
    } else {
        (b_chars, a_chars)
    };

    if short.is_empty() {
        return if long.is_empty() { 1.0 } else { 0.0 };
    }

    let short: String = short.iter().collect();
    let mut best: f64 = 0.0;
    for window in long.windows(short.chars().count()) {
        let window: String = window.iter().collect();
        let score = normalized_levenshtein(&short, &window);
        if score > best {
            best = score;
        }
        if best >= 1.0 {
            break;
        }
    }
    best
}

/// Similarity between two already-normalized texts, scaled to [0, 1].
pub fn similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(a, b).max(partial_similarity(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_punctuation_and_case() {
        assert_eq!(
            normalize("Let's begin the meeting, now!"),
            "lets begin the meeting now"
        );
    }

    #[test]
    fn test_normalize_trims_whitespace() {
        assert_eq!(normalize("  hello there  "), "hello there");
    }

    #[test]
    fn test_identical_texts_score_one() {
        assert_eq!(similarity("hello world", "hello world"), 1.0);
    }

    #[test]
    fn test_substring_scores_one_via_partial() {
        // Whole-string distance is large, but an exact window exists.
        let score = similarity("hello", "well hello there everyone");
        assert!(score >= 0.999, "expected ~1.0, got {}", score);
    }

    #[test]
    fn test_three_edits_in_ten_chars_meets_threshold() {
        // Levenshtein distance 3 over length 10: score 0.7 exactly.
        let score = similarity("abcdefghij", "abcdefgxyz");
        assert!(score >= 0.7, "expected >= 0.7, got {}", score);
        assert!(score < 0.71, "expected ~0.7, got {}", score);
    }

    #[test]
    fn test_four_edits_in_ten_chars_below_threshold() {
        let score = similarity("abcdefghij", "abcdefwxyz");
        assert!(score < 0.7, "expected < 0.7, got {}", score);
    }

    #[test]
    fn test_unrelated_texts_score_low() {
        let score = similarity("quarterly revenue numbers", "zzzqqq");
        assert!(score < 0.5, "expected low score, got {}", score);
    }

    #[test]
    fn test_empty_against_nonempty() {
        assert_eq!(similarity("", "hello"), 0.0);
        assert_eq!(similarity("", ""), 1.0);
    }
}
