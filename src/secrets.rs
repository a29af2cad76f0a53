use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::EntireError;

const MIN_SECRET_LENGTH: usize = 20;
const MAX_SECRET_LENGTH: usize = 256;
const REDACT_VISIBLE_CHARS: usize = 4;

/// Well-known credential prefixes. Matched before the entropy pass so short
/// or structured keys are still caught.
static KNOWN_SECRET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        (sk-[A-Za-z0-9_-]{16,}) |
        (gh[pousr]_[A-Za-z0-9]{16,}) |
        (xox[baprs]-[A-Za-z0-9-]{10,}) |
        (AKIA[0-9A-Z]{16}) |
        (-----BEGIN\ [A-Z\ ]*PRIVATE\ KEY-----)
        ",
    )
    .expect("known-secret pattern is valid")
});

fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'_' | b'-' | b'.' | b'~')
}

/// Candidate token spans: maximal runs of token characters within the secret
/// length range.
fn extract_tokens(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if !is_token_char(bytes[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && is_token_char(bytes[i]) {
            i += 1;
        }
        if (MIN_SECRET_LENGTH..=MAX_SECRET_LENGTH).contains(&(i - start)) {
            tokens.push((start, i));
        }
    }
    tokens
}

/// Entropy heuristic for "does this token look machine-generated". Natural
/// words have few distinct characters, rare digits, and common bigrams;
/// credentials have the opposite profile.
fn looks_random(s: &[u8]) -> bool {
    let n = s.len();
    if n < MIN_SECRET_LENGTH {
        return false;
    }

    let mut seen = [false; 256];
    let mut distinct = 0usize;
    let mut digits = 0usize;
    let mut upper = 0usize;
    let mut lower = 0usize;
    for &b in s {
        if !seen[b as usize] {
            seen[b as usize] = true;
            distinct += 1;
        }
        if b.is_ascii_digit() {
            digits += 1;
        } else if b.is_ascii_uppercase() {
            upper += 1;
        } else if b.is_ascii_lowercase() {
            lower += 1;
        }
    }

    // Prose and identifiers reuse characters heavily; random base62 does not.
    let distinct_ratio = distinct as f64 / n as f64;
    if distinct_ratio < 0.55 {
        return false;
    }

    // Mixed character classes are the strongest signal. A lowercase-only run
    // with no digits is almost always a word, path segment, or slug.
    let classes = [digits > 0, upper > 0, lower > 0]
        .iter()
        .filter(|x| **x)
        .count();
    if classes < 2 {
        return false;
    }

    // Require digits to be interleaved, not a version-like suffix.
    let digit_ratio = digits as f64 / n as f64;
    if digit_ratio < 0.08 {
        return false;
    }

    true
}

fn redact_token(secret: &str) -> String {
    let len = secret.len();
    if len <= REDACT_VISIBLE_CHARS * 2 {
        return "*".repeat(len);
    }
    format!(
        "{}********{}",
        &secret[..REDACT_VISIBLE_CHARS],
        &secret[len - REDACT_VISIBLE_CHARS..]
    )
}

/// Redact all detected secrets in a text. Returns the redacted text and the
/// number of redactions.
pub fn redact_text(text: &str) -> (String, usize) {
    // Pass 1: known prefixes
    let mut count = 0usize;
    let pass1 = KNOWN_SECRET_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            count += 1;
            redact_token(&caps[0])
        })
        .to_string();

    // Pass 2: entropy scan over what remains
    let spans: Vec<(usize, usize)> = extract_tokens(&pass1)
        .into_iter()
        .filter(|&(start, end)| looks_random(&pass1.as_bytes()[start..end]))
        .collect();

    if spans.is_empty() {
        return (pass1, count);
    }

    let mut result = String::with_capacity(pass1.len());
    let mut prev_end = 0;
    for (start, end) in &spans {
        result.push_str(&pass1[prev_end..*start]);
        result.push_str(&redact_token(&pass1[*start..*end]));
        prev_end = *end;
    }
    result.push_str(&pass1[prev_end..]);
    count += spans.len();

    (result, count)
}

/// Everything the checkpoint store persists for one session, redacted as a
/// unit. A failure here aborts the write; unredacted content never reaches
/// the object store.
pub struct RedactedBundle {
    pub transcript: String,
    pub prompts: Vec<String>,
    pub context: String,
    pub redaction_count: usize,
}

pub fn redact_all(
    transcript: &str,
    prompts: &[String],
    context: &str,
) -> Result<RedactedBundle, EntireError> {
    let (transcript, mut count) = redact_text(transcript);
    let (context, context_count) = redact_text(context);
    count += context_count;

    let mut redacted_prompts = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        let (p, c) = redact_text(prompt);
        count += c;
        redacted_prompts.push(p);
    }

    Ok(RedactedBundle {
        transcript,
        prompts: redacted_prompts,
        context,
        redaction_count: count,
    })
}
