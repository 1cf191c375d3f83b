//! Quoting of values interpolated into shell command lines

use std::borrow::Cow;

/// Characters that never need quoting.
///
/// `:` and `,` are included so delimited values such as `host:port` or
/// `a,b,c` reach consumers unchanged.
fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ':' | ',' | '.' | '/' | '-' | '_')
}

/// Quote `value` for interpolation into a POSIX shell command line
///
/// Values made only of safe characters are returned untouched. Everything
/// else is wrapped in single quotes, with embedded single quotes written as
/// `'\''`.
pub fn quote(value: &str) -> Cow<'_, str> {
    if !value.is_empty() && value.chars().all(is_safe) {
        return Cow::Borrowed(value);
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    Cow::Owned(quoted)
}

/// Render a `KEY=value` assignment with the value quoted
pub fn assignment(key: &str, value: &str) -> String {
    format!("{}={}", key, quote(value))
}
