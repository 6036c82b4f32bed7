//! Post-processing: deterministic cleanup of raw model text into JSON.
//!
//! Even with a schema in the prompt, VLMs wrap their answer in ways that a
//! strict JSON parser rejects:
//!
//! - ` ```json ... ``` ` fences around the object
//! - a sentence of commentary before or after it
//! - a leading BOM or zero-width characters copied from the page
//! - a trailing comma after the last array element
//!
//! [`clean_json_response`] fixes the first three without touching content.
//! Trailing commas are only repaired by [`repair_trailing_commas`] when the
//! cleaned text still fails to parse, since the rewrite is not string-aware.

use once_cell::sync::Lazy;
use regex::Regex;

/// Reduce raw model output to the text of its outermost JSON object.
///
/// Rules (applied in order):
/// 1. Strip invisible Unicode (BOM, zero-width spaces, soft hyphens)
/// 2. Unwrap the first fenced code block, if any
/// 3. Keep only the span from the first `{` to the last `}`
///
/// Returns the trimmed input unchanged when it contains no `{...}` span.
pub fn clean_json_response(input: &str) -> String {
    let s = remove_invisible_chars(input);
    let s = strip_code_fences(&s);
    isolate_object(&s).to_string()
}

// ── Rule 1: Remove invisible Unicode characters ─────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 2: Unwrap code fences ──────────────────────────────────────────

static RE_FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").unwrap());

fn strip_code_fences(input: &str) -> String {
    match RE_FENCED_BLOCK.captures(input) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 3: Isolate the outermost object ────────────────────────────────

fn isolate_object(input: &str) -> &str {
    match (input.find('{'), input.rfind('}')) {
        (Some(start), Some(end)) if start < end => &input[start..=end],
        _ => input.trim(),
    }
}

// ── Fallback repair ─────────────────────────────────────────────────────

static RE_TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*[}\]])").unwrap());

/// Drop commas directly before a closing `}` or `]`.
pub fn repair_trailing_commas(input: &str) -> String {
    RE_TRAILING_COMMA.replace_all(input, "$1").to_string()
}
