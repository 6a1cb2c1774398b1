//! URL normalization
//!
//! Absolute link and image values go through [`url::Url`], which
//! percent-encodes path, query and fragment and IDNA-encodes the host.
//! Relative or unparseable values are encoded component by component with
//! [`percent_encoding`]. Existing `%XX` escapes are preserved in both cases,
//! so encoding an already-encoded URL is a no-op.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

const AUTHORITY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b':')
    .remove(b'@')
    .remove(b'[')
    .remove(b']')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'+')
    .remove(b'$')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'=')
    .remove(b'/')
    .remove(b'?')
    .remove(b'&')
    .remove(b':')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'@')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const FRAGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'?')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Components of a URL the parser rejected
#[derive(Debug, Default, PartialEq, Eq)]
struct Parts<'a> {
    scheme: Option<&'a str>,
    authority: Option<&'a str>,
    path: &'a str,
    query: &'a str,
    fragment: &'a str,
}

fn split(url: &str) -> Parts<'_> {
    let mut parts = Parts::default();
    let mut rest = url;

    if let Some(colon) = rest.find(':') {
        let candidate = &rest[..colon];
        let valid = candidate
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && candidate
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if valid {
            parts.scheme = Some(candidate);
            rest = &rest[colon + 1..];
        }
    }

    if let Some(after) = rest.strip_prefix("//") {
        let end = after.find(['/', '?', '#']).unwrap_or(after.len());
        parts.authority = Some(&after[..end]);
        rest = &after[end..];
    }

    if let Some(hash) = rest.find('#') {
        parts.fragment = &rest[hash + 1..];
        rest = &rest[..hash];
    }
    if let Some(q) = rest.find('?') {
        parts.query = &rest[q + 1..];
        rest = &rest[..q];
    }
    parts.path = rest;
    parts
}

fn is_escape(bytes: &[u8], i: usize) -> bool {
    bytes[i] == b'%'
        && i + 2 < bytes.len()
        && bytes[i + 1].is_ascii_hexdigit()
        && bytes[i + 2].is_ascii_hexdigit()
}

/// Encode `part` with `set`, copying valid `%XX` escapes through
fn encode_component(part: &str, set: &'static AsciiSet) -> String {
    let bytes = part.as_bytes();
    let mut out = String::with_capacity(part.len());
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if is_escape(bytes, i) {
            out.extend(utf8_percent_encode(&part[start..i], set));
            out.push_str(&part[i..i + 3]);
            i += 3;
            start = i;
        } else {
            i += 1;
        }
    }
    out.extend(utf8_percent_encode(&part[start..], set));
    out
}

/// `%` not starting a valid escape becomes `%25`
fn escape_stray_percent(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.char_indices() {
        if c == '%' && !is_escape(bytes, i) {
            out.push_str("%25");
        } else {
            out.push(c);
        }
    }
    out
}

fn encode_parts(url: &str) -> String {
    let parts = split(url);
    let mut out = String::with_capacity(url.len() + 8);

    if let Some(scheme) = parts.scheme {
        out.push_str(scheme);
        out.push(':');
    }
    if let Some(authority) = parts.authority {
        out.push_str("//");
        out.push_str(&encode_component(authority, AUTHORITY));
        if !parts.path.is_empty() && !parts.path.starts_with('/') {
            out.push('/');
        }
    }
    out.push_str(&encode_component(parts.path, PATH));
    if !parts.query.is_empty() {
        out.push('?');
        out.push_str(&encode_component(parts.query, QUERY));
    }
    if !parts.fragment.is_empty() {
        out.push('#');
        out.push_str(&encode_component(parts.fragment, FRAGMENT));
    }
    out
}

/// Percent-encode a URL value for output. Empty input stays empty.
pub fn encode_url(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }

    let escaped = escape_stray_percent(url);
    match Url::parse(&escaped) {
        Ok(mut parsed) => {
            if parsed.query() == Some("") {
                parsed.set_query(None);
            }
            if parsed.fragment() == Some("") {
                parsed.set_fragment(None);
            }
            parsed.into()
        }
        Err(_) => encode_parts(&escaped),
    }
}

/// A raw URL value is malformed when it contains a space or any non-ASCII
/// character. Empty values are not malformed; they are reported as missing.
pub fn is_malformed(raw: &str) -> bool {
    !raw.is_empty() && (raw.contains(' ') || !raw.is_ascii())
}
