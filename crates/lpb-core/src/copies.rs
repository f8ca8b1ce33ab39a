use std::sync::OnceLock;

use regex::Regex;

static COPIES_RE: OnceLock<Regex> = OnceLock::new();

fn copies_re() -> &'static Regex {
    COPIES_RE.get_or_init(|| {
        // `x3` anywhere, or `copies=2` / `COPIES = 5` at a word boundary.
        // ASCII digits only: anything else would match but never parse.
        Regex::new(r"(?i)(?:x|\bcopies\s*=\s*)([0-9]+)").expect("valid regex")
    })
}

/// Requested copy count from a photo caption (e.g. `x3`, `copies=2`).
///
/// Never fails: no caption, no match or a number that does not fit yields 1,
/// and the result is always at least 1.
pub fn parse_copies(caption: Option<&str>) -> u32 {
    let Some(caption) = caption.filter(|c| !c.trim().is_empty()) else {
        return 1;
    };

    copies_re()
        .captures(caption)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(1)
        .max(1)
}

/// "1 copy" / "3 copies".
pub fn copies_phrase(copies: u32) -> String {
    if copies == 1 {
        "1 copy".to_string()
    } else {
        format!("{copies} copies")
    }
}
