//! Host pattern matching for `Host` and `Match` blocks
//!
//! Patterns support `*` (any run of characters), `?` (exactly one character)
//! and a leading `!` for negation. Comparison is ASCII case-insensitive.

/// Check a hostname against a `Host` line's pattern list.
///
/// The list matches when at least one positive pattern matches and no negated
/// pattern does. A list made only of negations never matches.
pub(crate) fn matches_host_patterns<S: AsRef<str>>(hostname: &str, patterns: &[S]) -> bool {
    let mut matched = false;
    for pattern in patterns {
        let pattern = pattern.as_ref();
        if let Some(negated) = pattern.strip_prefix('!') {
            if wildcard_match(hostname, negated) {
                return false;
            }
        } else if wildcard_match(hostname, pattern) {
            matched = true;
        }
    }
    matched
}

/// Check a value against a comma-separated pattern list as used by `Match`.
pub(crate) fn matches_pattern_list(value: &str, list: &str) -> bool {
    let patterns: Vec<&str> = list
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    matches_host_patterns(value, &patterns)
}

/// Glob-style match of `text` against `pattern`.
pub(crate) fn wildcard_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();
    let pattern: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();

    let (mut t, mut p) = (0, 0);
    // Position of the last `*` seen and the text index it is currently absorbing up to.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, absorbed)) => {
                    p = star + 1;
                    t = absorbed + 1;
                    backtrack = Some((star, absorbed + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}
