//! URL fragment codec for the redirect transport.
//!
//! Requests travel as `#__WA__=<encoded json>` and responses come back on the
//! return URL as `#__WA_RES__=<encoded json>`. Encoding follows JavaScript's
//! `encodeURIComponent` so both ends agree byte for byte.

use std::collections::HashMap;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::error::{ActivityError, Result};

/// Fragment parameter carrying the serialized request.
pub const REQUEST_PARAM: &str = "__WA__";

/// Fragment parameter carrying the serialized response.
pub const RESPONSE_PARAM: &str = "__WA_RES__";

/// Characters `encodeURIComponent` leaves untouched.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn encode_uri_component(s: &str) -> String {
    utf8_percent_encode(s, URI_COMPONENT).to_string()
}

/// Lenient decode: malformed escapes are kept as-is, invalid UTF-8 is replaced.
pub fn decode_uri_component(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Serialized origin (`scheme://host[:port]`) of an absolute URL.
pub fn origin_of(url: &str) -> Result<String> {
    let parsed = Url::parse(url)
        .map_err(|e| ActivityError::InvalidRequest(format!("invalid url {url:?}: {e}")))?;
    Ok(parsed.origin().ascii_serialization())
}

/// Parse `a=b&c=d`, optionally prefixed with `?` or `#`.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    let body = query
        .strip_prefix('?')
        .or_else(|| query.strip_prefix('#'))
        .unwrap_or(query);

    let mut params = HashMap::new();
    if body.is_empty() {
        return params;
    }
    for param in body.split('&') {
        let mut item = param.split('=');
        let key = decode_uri_component(item.next().unwrap_or(""));
        // Only the segment up to a second '=' counts as the value.
        let value = decode_uri_component(item.next().unwrap_or(""));
        if !key.is_empty() {
            params.insert(key, value);
        }
    }
    params
}

pub fn query_param(query: &str, param: &str) -> Option<String> {
    parse_query_string(query).remove(param)
}

/// Append `param=value` to the URL fragment.
pub fn add_fragment_param(url: &str, param: &str, value: &str) -> String {
    let sep = if url.contains('#') { '&' } else { '#' };
    format!(
        "{url}{sep}{}={}",
        encode_uri_component(param),
        encode_uri_component(value)
    )
}

/// Remove every `param=...` occurrence from a query-like string.
pub fn remove_query_param(query: &str, param: &str) -> String {
    let search = format!("{}=", encode_uri_component(param));
    let mut qs = query.to_string();
    let mut from = 0usize;
    while from < qs.len() {
        let Some(index) = qs[from..].find(&search).map(|i| i + from) else {
            break;
        };
        let at_boundary = match index.checked_sub(1).and_then(|i| qs.as_bytes().get(i)) {
            None => true,
            Some(b) => matches!(b, b'?' | b'#' | b'&'),
        };
        if !at_boundary {
            from = index + 1;
            continue;
        }
        let end = qs[index + 1..]
            .find('&')
            .map(|i| i + index + 1)
            .unwrap_or(qs.len());
        let tail = qs.get(end + 1..).unwrap_or("").to_string();
        qs.truncate(index);
        qs.push_str(&tail);
        from = index;
    }
    qs
}

/// Fragment of a URL including the leading `#`, or an empty string.
pub fn fragment_of(url: &str) -> &str {
    url.find('#').map(|i| &url[i..]).unwrap_or("")
}

/// URL with its fragment removed.
pub fn remove_fragment(url: &str) -> &str {
    url.find('#').map(|i| &url[..i]).unwrap_or(url)
}
