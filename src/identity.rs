//! Stable identity for scraped posts.
//!
//! The search page does not always expose a post id, so ids are taken from
//! the most specific link available and, failing that, from a hash of the
//! author handle and body text.

use once_cell::sync::Lazy;
use regex::Regex;

static DETAIL_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/tweet/(?P<id>\d+)").unwrap());
static STATUS_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"status/(?P<id>\d+)").unwrap());

/// Post id from a "view tweet" detail page link.
pub fn id_from_detail_href(href: &str) -> Option<String> {
    capture_id(&DETAIL_ID_RE, href)
}

/// Post id from a generic `/status/<id>` link, as found on the time label.
pub fn id_from_status_href(href: &str) -> Option<String> {
    capture_id(&STATUS_ID_RE, href)
}

fn capture_id(re: &Regex, href: &str) -> Option<String> {
    re.captures(href)
        .and_then(|caps| caps.name("id"))
        .map(|m| m.as_str().to_owned())
}

/// Deterministic fallback id: a 31-multiplier rolling hash over the UTF-16
/// code units of `handle` followed by `text`, wrapped to 32-bit signed.
pub fn hash_id(handle: &str, text: &str) -> String {
    let hash = handle
        .encode_utf16()
        .chain(text.encode_utf16())
        .fold(0i32, |hash, unit| {
            hash.wrapping_shl(5)
                .wrapping_sub(hash)
                .wrapping_add(i32::from(unit))
        });
    format!("hash-{}", hash.unsigned_abs())
}

/// Picks the best available id: detail link, then time-label link, then hash.
pub fn derive_id(
    detail_href: Option<&str>,
    status_href: Option<&str>,
    handle: &str,
    text: &str,
) -> String {
    detail_href
        .and_then(id_from_detail_href)
        .or_else(|| status_href.and_then(id_from_status_href))
        .unwrap_or_else(|| hash_id(handle, text))
}
