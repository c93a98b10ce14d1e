//! Single-wildcard glob matching for command patterns
//!
//! `*` is the only metacharacter and matches any run of characters,
//! including none. Matching is a linear scan with one saved star
//! checkpoint, so the worst case is `O(pattern.len() * value.len())`
//! no matter how many stars the pattern holds.

/// Match `value` against `pattern` over the full string.
///
/// A pattern without `*` only matches itself.
pub fn match_pattern(pattern: &str, value: &str) -> bool {
    let p = pattern.as_bytes();
    let v = value.as_bytes();

    let mut pi = 0;
    let mut vi = 0;
    // (pattern index just after the last star, value index it was tried at)
    let mut checkpoint: Option<(usize, usize)> = None;

    while vi < v.len() {
        if pi < p.len() && p[pi] == b'*' {
            pi += 1;
            checkpoint = Some((pi, vi));
        } else if pi < p.len() && p[pi] == v[vi] {
            pi += 1;
            vi += 1;
        } else if let Some((star_pi, star_vi)) = checkpoint {
            // Let the last star swallow one more byte and retry from there
            pi = star_pi;
            vi = star_vi + 1;
            checkpoint = Some((star_pi, vi));
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// Return the first pattern in `patterns` matching `value`.
pub fn first_match<'a>(patterns: &'a [String], value: &str) -> Option<&'a str> {
    patterns
        .iter()
        .find(|pattern| match_pattern(pattern, value))
        .map(String::as_str)
}
