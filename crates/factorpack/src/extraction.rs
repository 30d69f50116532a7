//! Static dependency extraction
//!
//! The graph builder does not parse JavaScript. It asks a
//! [`DependencyExtractor`] for the specifiers a module references; the
//! default [`CommonJsExtractor`] finds `require("...")` calls with a literal
//! argument, which is the reference form the emitted runtime understands.

use std::{fmt, ops::Range, path::Path, sync::LazyLock};

use regex::Regex;

/// Strategy for discovering the dependency specifiers of one module
pub trait DependencyExtractor: fmt::Debug + Send + Sync {
    /// Specifiers referenced by `source`, in source order, without duplicates
    fn extract(&self, path: &Path, source: &str) -> Vec<String>;
}

/// Finds `require("x")`, `require('x')` and `` require(`x`) `` outside comments
#[derive(Debug, Default, Clone, Copy)]
pub struct CommonJsExtractor;

static REQUIRE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:^|[^.\w$])require\s*\(\s*(?:"([^"\\\n]*)"|'([^'\\\n]*)'|`([^`\\$\n]*)`)\s*\)"#,
    )
    .expect("require pattern is valid")
});

impl DependencyExtractor for CommonJsExtractor {
    fn extract(&self, path: &Path, source: &str) -> Vec<String> {
        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        {
            return Vec::new();
        }

        let scanned = strip_comments(source);
        let mut specifiers: Vec<String> = Vec::new();
        for captures in REQUIRE_CALL.captures_iter(&scanned.code) {
            let Some(call) = captures.get(0) else {
                continue;
            };
            let keyword = call.start() + call.as_str().find("require").unwrap_or(0);
            if scanned.in_string(keyword) {
                continue;
            }
            let Some(specifier) = captures
                .get(1)
                .or_else(|| captures.get(2))
                .or_else(|| captures.get(3))
            else {
                continue;
            };
            let specifier = specifier.as_str();
            if !specifier.is_empty() && !specifiers.iter().any(|s| s == specifier) {
                specifiers.push(specifier.to_owned());
            }
        }
        specifiers
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Code,
    String(char),
    LineComment,
    BlockComment,
}

/// Source with comments blanked out, plus where its string literals are
struct Scanned {
    code: String,
    /// Byte ranges of string literals in `code`, quotes included, in order
    strings: Vec<Range<usize>>,
}

impl Scanned {
    fn in_string(&self, offset: usize) -> bool {
        let after = self.strings.partition_point(|range| range.end <= offset);
        self.strings
            .get(after)
            .is_some_and(|range| range.contains(&offset))
    }
}

/// Replace comments with whitespace, keeping string literals and line breaks intact
///
/// Regular expression literals are not recognised; a `//` inside one starts a
/// comment as far as this scan is concerned.
fn strip_comments(source: &str) -> Scanned {
    let mut out = String::with_capacity(source.len());
    let mut strings = Vec::new();
    let mut string_start = 0;
    let mut state = ScanState::Code;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            ScanState::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    out.push_str("  ");
                    state = ScanState::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    state = ScanState::BlockComment;
                }
                '"' | '\'' | '`' => {
                    string_start = out.len();
                    out.push(c);
                    state = ScanState::String(c);
                }
                _ => out.push(c),
            },
            ScanState::String(quote) => {
                out.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == quote || (c == '\n' && quote != '`') {
                    strings.push(string_start..out.len());
                    state = ScanState::Code;
                }
            }
            ScanState::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    state = ScanState::Code;
                } else {
                    out.push(' ');
                }
            }
            ScanState::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    state = ScanState::Code;
                } else {
                    out.push(if c == '\n' { '\n' } else { ' ' });
                }
            }
        }
    }
    if let ScanState::String(_) = state {
        strings.push(string_start..out.len());
    }
    Scanned { code: out, strings }
}
