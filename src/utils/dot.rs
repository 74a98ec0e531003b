//! DOT output helpers for rendering graphs with Graphviz.

/// Escapes a string for use inside a quoted DOT label.
///
/// Method references contain `<init>`-style names and `->` arrows, so angle brackets are
/// escaped along with quotes, backslashes and line breaks.
///
/// ```rust,ignore
/// assert_eq!(escape_dot("LA;-><init>()V"), "LA;-\\>\\<init\\>()V");
/// ```
#[must_use]
pub fn escape_dot(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => {}
            '<' => escaped.push_str("\\<"),
            '>' => escaped.push_str("\\>"),
            other => escaped.push(other),
        }
    }
    escaped
}
