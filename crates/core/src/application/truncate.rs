// Bounded rendering of statements and arguments for log fields

use crate::application::constants::LOG_TRUNCATE_LEN;
use std::borrow::Cow;
use std::fmt::Debug;

/// Cut `s` to at most `limit` bytes on a char boundary, marking the cut with `...`
pub fn truncate_str(s: &str, limit: usize) -> Cow<'_, str> {
    if s.len() <= limit {
        return Cow::Borrowed(s);
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    Cow::Owned(format!("{}...", &s[..end]))
}

/// Statement text with the default log limit
pub fn statement(s: &str) -> Cow<'_, str> {
    truncate_str(s, LOG_TRUNCATE_LEN)
}

/// Debug rendering of any value (statement lists, argument lists) with the default log limit
pub fn debug<T: Debug + ?Sized>(value: &T) -> String {
    let rendered = format!("{:?}", value);
    match truncate_str(&rendered, LOG_TRUNCATE_LEN) {
        Cow::Borrowed(_) => rendered,
        Cow::Owned(cut) => cut,
    }
}
