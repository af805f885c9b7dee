//! AMQP topic pattern matching.
//!
//! Patterns and routing keys are dot-separated words:
//! - `*` matches exactly one word
//! - `#` matches zero or more words, anywhere in the pattern
//! - any other word matches itself
//!
//! An empty routing key has zero words.

/// Check if `routing_key` matches topic `pattern`.
///
/// ```
/// use warren::sim::topic::topic_matches;
///
/// assert!(topic_matches("a.*.c", "a.b.c"));
/// assert!(!topic_matches("a.*.c", "a.b.b.c"));
/// assert!(topic_matches("a.#", "a"));
/// ```
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern = words(pattern);
    let key = words(routing_key);
    matches_words(&pattern, &key)
}

fn words(s: &str) -> Vec<&str> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.split('.').collect()
    }
}

fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => {
            // Adjacent hashes behave as one.
            if rest.first() == Some(&"#") {
                return matches_words(rest, key);
            }
            (0..=key.len()).any(|skip| matches_words(rest, &key[skip..]))
        }
        Some((&"*", rest)) => !key.is_empty() && matches_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && matches_words(rest, &key[1..]),
    }
}
