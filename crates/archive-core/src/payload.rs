//! Payload codec: `identifier` plus an optional keyed multi-map, packed into
//! a single opaque string.
//!
//! Grounded on `internal/jobqueue/jobqueue.go`'s `ParsePayload`/`FormatPayload`:
//! encoding is `identifier` alone, or `identifier + "?" + query_string`
//! where the query is URL-query-encoded. Decoding splits on the first `?`;
//! absence yields an empty map.

use std::collections::BTreeMap;

/// A keyed multi-map of query-style parameters, in insertion/encoding order
/// per key.
pub type Params = BTreeMap<String, Vec<String>>;

/// Encode an identifier and its parameters into a single payload string.
///
/// If `params` is empty, the identifier is returned unchanged (no trailing
/// `?`), matching the original's `FormatPayload(s, nil)` behavior.
pub fn encode(identifier: &str, params: &Params) -> String {
    if params.is_empty() {
        return identifier.to_string();
    }

    let mut pairs: Vec<(String, String)> = Vec::new();
    for (key, values) in params {
        for value in values {
            pairs.push((key.clone(), value.clone()));
        }
    }

    let query = pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", url_encode(&k), url_encode(&v)))
        .collect::<Vec<_>>()
        .join("&");

    format!("{identifier}?{query}")
}

/// Decode a payload string into its identifier and parameters.
///
/// Splits on the first `?`. Absence of `?` yields an empty parameter map.
pub fn decode(payload: &str) -> (String, Params) {
    match payload.split_once('?') {
        None => (payload.to_string(), Params::new()),
        Some((identifier, query)) => (identifier.to_string(), parse_query(query)),
    }
}

fn parse_query(query: &str) -> Params {
    let mut params = Params::new();
    if query.is_empty() {
        return params;
    }

    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }

        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (url_decode(k), url_decode(v)),
            None => (url_decode(pair), String::new()),
        };

        params.entry(key).or_default().push(value);
    }

    params
}

fn url_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(value) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                    out.push(value);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
