//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Model replies sometimes wrap JSON in a markdown code fence; return the inner text.
pub fn strip_code_fences(s: &str) -> &str {
  let t = s.trim();
  let Some(rest) = t.strip_prefix("```") else { return t };
  // Drop an optional language tag on the opening line.
  let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
  body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut cut = max;
  while !s.is_char_boundary(cut) {
    cut -= 1;
  }
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}
