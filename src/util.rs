//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Normalize an answer for exact comparison: trimmed and lowercased.
pub fn normalize_answer(s: &str) -> String {
  s.trim().to_lowercase()
}

/// Count whitespace-separated words. Paragraph markers like `[P3]` are not words.
pub fn word_count(text: &str) -> usize {
  text
    .split_whitespace()
    .filter(|w| !is_paragraph_marker(w))
    .count()
}

/// True for `[P1]`, `[P12]`, ...
pub fn is_paragraph_marker(s: &str) -> bool {
  let s = s.trim();
  s.len() > 3
    && s.starts_with("[P")
    && s.ends_with(']')
    && s[2..s.len() - 1].chars().all(|c| c.is_ascii_digit())
}

/// True if the trimmed text is empty.
pub fn is_blank(s: &str) -> bool {
  s.trim().is_empty()
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.chars().count() <= max {
    s.to_string()
  } else {
    let head: String = s.chars().take(max).collect();
    format!("{}… ({} bytes total)", head, s.len())
  }
}

/// `MM:SS` rendering of a second count.
pub fn format_mm_ss(seconds: u64) -> String {
  format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
