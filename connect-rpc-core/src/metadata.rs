//! Trailer-prefixed headers and end-of-stream metadata conversion.
//!
//! Unary Connect responses have no HTTP trailers; trailing metadata rides in
//! the header block under names prefixed with `trailer-`. The prefix is
//! stripped on the way in and added on the way out, so handlers and callers
//! always see bare names.

use std::collections::BTreeMap;

use http::{HeaderMap, HeaderName, HeaderValue};

/// Prefix marking a header as trailing metadata on unary RPCs.
pub const TRAILER_PREFIX: &str = "trailer-";

/// Collect `trailer-`-prefixed entries from a header block into a bare-name
/// trailer map.
pub fn trailers_from_headers(headers: &HeaderMap) -> HeaderMap {
    let mut trailers = HeaderMap::new();
    for (name, value) in headers {
        if let Some(bare) = name.as_str().strip_prefix(TRAILER_PREFIX)
            && let Ok(bare) = HeaderName::try_from(bare)
        {
            trailers.append(bare, value.clone());
        }
    }
    trailers
}

/// Append a bare-name trailer map to a header block under `trailer-` names.
pub fn append_prefixed_trailers(headers: &mut HeaderMap, trailers: &HeaderMap) {
    for (name, value) in trailers {
        match HeaderName::try_from(format!("{TRAILER_PREFIX}{name}")) {
            Ok(prefixed) => {
                headers.append(prefixed, value.clone());
            }
            Err(_) => {
                tracing::debug!(name = %name, "trailer name not representable, dropped");
            }
        }
    }
}

/// Render headers as the end-of-stream `metadata` object: lowercased names
/// mapped to ordered value lists.
///
/// Values that are not valid UTF-8 cannot be carried in JSON and are
/// dropped.
pub fn metadata_to_json(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            tracing::debug!(name = %name, "non-UTF-8 metadata value dropped from end-of-stream block");
            continue;
        };
        map.entry(name.as_str().to_string())
            .or_default()
            .push(value.to_string());
    }
    map
}

/// Rebuild a header map from the end-of-stream `metadata` object, skipping
/// entries that are not legal header material.
pub fn metadata_from_json(map: BTreeMap<String, Vec<String>>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, values) in map {
        let Ok(name) = HeaderName::try_from(name.as_str()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::try_from(value) {
                headers.append(name.clone(), value);
            }
        }
    }
    headers
}
