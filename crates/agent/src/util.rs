//! Text helpers shared by handlers and the controller

/// Words that approve a pending action, matched as case-insensitive substrings
pub const AFFIRMATIVES: &[&str] = &["yes", "ok", "allow", "approve", "go ahead"];

/// Longest prefix of `s` no longer than `max_bytes` that ends on a char boundary
pub fn truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// True when `message` contains any base affirmative or one of `extra`
pub fn is_affirmative(message: &str, extra: &[&str]) -> bool {
    let lowered = message.trim().to_lowercase();
    AFFIRMATIVES
        .iter()
        .chain(extra.iter())
        .any(|word| lowered.contains(word))
}

/// Split `text` into pieces of at most `max_chars` characters
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Shorten `s` to `max_chars` characters, marking the cut with "..."
pub fn snippet(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 3), "hel");
        // "é" is two bytes; cutting inside it backs off to the boundary
        assert_eq!(truncate("café", 4), "caf");
        assert_eq!(truncate("◆◆", 4), "◆");
        assert_eq!(truncate("", 0), "");
    }

    #[test]
    fn test_is_affirmative() {
        assert!(is_affirmative("Yes please", &[]));
        assert!(is_affirmative("  OK ", &[]));
        assert!(is_affirmative("go ahead and do it", &[]));
        assert!(!is_affirmative("no", &[]));
        assert!(!is_affirmative("sure", &[]));
        assert!(is_affirmative("sure", &["sure"]));
    }

    #[test]
    fn test_split_chunks() {
        let text = "a".repeat(1100);
        let chunks = split_chunks(&text, 500);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 500);
        assert_eq!(chunks[2].len(), 100);
        assert!(split_chunks("", 500).is_empty());

        let wide = "◆".repeat(501);
        let chunks = split_chunks(&wide, 500);
        assert_eq!(chunks[0].chars().count(), 500);
        assert_eq!(chunks[1], "◆");
    }

    #[test]
    fn test_snippet() {
        assert_eq!(snippet("short", 80), "short");
        let long = "x".repeat(100);
        let cut = snippet(&long, 80);
        assert_eq!(cut.chars().count(), 80);
        assert!(cut.ends_with("..."));
    }
}
