//! Canonical group slugs and cohort value normalization.
//!
//! All functions here are pure: the same input always yields the same output,
//! so re-running against the same population resolves to the same groups.

/// Map a free-text category value to `[a-z0-9-]` with single dashes and no
/// leading/trailing dash. Empty or all-punctuation input yields `""`.
pub fn slug(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.trim().to_lowercase().chars() {
        let ch = if ch.is_whitespace() || ch == '_' { '-' } else { ch };
        match ch {
            'a'..='z' | '0'..='9' => out.push(ch),
            '-' if !out.is_empty() && !out.ends_with('-') => out.push('-'),
            _ => {}
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Department values: trimmed, lower-cased, then title-cased per word.
pub fn department_value(raw: &str) -> String {
    title_case(&raw.trim().to_lowercase())
}

/// Region values: trimmed and upper-cased.
pub fn region_value(raw: &str) -> String {
    raw.trim().to_uppercase()
}

fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut at_word_start = true;
    for ch in input.chars() {
        if ch.is_alphanumeric() || ch == '\'' {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.push(ch);
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}
