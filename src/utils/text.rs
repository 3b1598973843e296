/// Cut `s` to at most `max_chars` characters, marking the cut with `...`.
#[must_use]
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", s[..idx].trim_end()),
        None => s.to_string(),
    }
}

/// Longest prefix of `s` that fits in `max_bytes` without splitting a character.
fn floor_char_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    (0..=max_bytes)
        .rev()
        .find(|&idx| s.is_char_boundary(idx))
        .unwrap_or(0)
}

/// Split `text` into pieces of at most `max_bytes` UTF-8 bytes.
///
/// Pieces break after a newline when possible; a single line longer than
/// the budget is hard-split on a character boundary. Concatenating the
/// pieces yields `text` again.
#[must_use]
pub fn chunk_by_bytes(text: &str, max_bytes: usize) -> Vec<String> {
    if text.is_empty() || max_bytes == 0 {
        return Vec::new();
    }
    if text.len() <= max_bytes {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.split_inclusive('\n') {
        if current.len() + line.len() <= max_bytes {
            current.push_str(line);
            continue;
        }
        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        let mut rest = line;
        while rest.len() > max_bytes {
            let cut = floor_char_boundary(rest, max_bytes).max(
                rest.chars().next().map_or(rest.len(), char::len_utf8),
            );
            chunks.push(rest[..cut].to_string());
            rest = &rest[cut..];
        }
        current.push_str(rest);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
