/// Truncate `text` to at most `max_chars` characters, appending a marker that
/// records the original and kept lengths. Shorter input is returned unchanged.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}\n\n[truncated: {total} chars -> {max_chars} chars]")
}

/// First `max_chars` characters, no marker.
pub fn prefix_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_truncation_when_within_limit() {
        assert_eq!(truncate_chars("hello", 5), "hello");
        assert_eq!(truncate_chars("", 10), "");
    }

    #[test]
    fn one_over_truncates_with_marker() {
        let input = "a".repeat(8001);
        let result = truncate_chars(&input, 8000);
        assert!(result.starts_with(&"a".repeat(8000)));
        assert!(result.ends_with("[truncated: 8001 chars -> 8000 chars]"));
    }

    #[test]
    fn counts_chars_not_bytes() {
        let input = "é".repeat(10);
        let result = truncate_chars(&input, 4);
        assert!(result.starts_with("éééé\n"));
        assert_eq!(prefix_chars(&input, 3), "ééé");
    }
}
