use anyhow::Result;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn sha256_hex(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Truncate `input` to at most `max_chars` Unicode characters, appending `…` when truncated.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    if input.chars().count() > max_chars {
        let mut s: String = input.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        input.to_string()
    }
}

/// Last `n` characters of `input`, never splitting a code point.
pub fn tail_chars(input: &str, n: usize) -> &str {
    let total = input.chars().count();
    if total <= n {
        return input;
    }
    match input.char_indices().nth(total - n) {
        Some((idx, _)) => &input[idx..],
        None => input,
    }
}

/// First `n` characters of `input`, never splitting a code point.
pub fn head_chars(input: &str, n: usize) -> &str {
    match input.char_indices().nth(n) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

/// Lowercase ASCII slug for file names, capped at `max_len` characters.
pub fn slugify(input: &str, max_len: usize) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= max_len {
            break;
        }
    }
    let trimmed = slug.trim_matches('-').to_string();
    if trimmed.is_empty() {
        "query".to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_slices_respect_multibyte_boundaries() {
        let text = "perché è così";
        assert_eq!(head_chars(text, 6), "perché");
        assert_eq!(tail_chars(text, 4), "così");
        assert_eq!(tail_chars("ab", 10), "ab");
        assert_eq!(head_chars("ab", 10), "ab");
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Who met at Via Roma?", 40), "who-met-at-via-roma");
        assert_eq!(slugify("???", 40), "query");
    }

    #[test]
    fn truncate_appends_ellipsis_only_when_needed() {
        assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc…");
        assert_eq!(truncate_with_ellipsis("abc", 3), "abc");
    }
}
