// Redaction helpers for diagnostic payloads
//
// Nothing that could be used to join or decrypt a relay channel may reach a
// log sink: symmetric-key-like query values are masked, topics are shortened,
// URIs nested in a query value are redacted recursively, and overlong URIs
// keep only their head, tail and length.

use crate::session::topic;

/// Longest raw URI kept verbatim in diagnostics
pub const MAX_LOGGED_URI_LEN: usize = 160;

const MASK: &str = "***";
const SECRET_PARAM_NAMES: &[&str] = &[
    "symkey",
    "key",
    "secret",
    "sig",
    "signature",
    "nonce",
    "data",
    "payload",
    "token",
];

/// True for query parameter names whose values must never be logged
pub fn is_secret_param(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    SECRET_PARAM_NAMES.contains(&lowered.as_str())
        || lowered.ends_with("_key")
        || lowered.ends_with("key") && lowered.len() > 3
        || lowered.ends_with("_public_key")
}

/// Redacted value for a query parameter
pub fn redact_param(name: &str, value: &str) -> String {
    if is_secret_param(name) {
        // public keys are identifiers; everything else ending in "key" is treated as secret
        if name.to_ascii_lowercase().contains("public") {
            return shorten(value);
        }
        return MASK.to_string();
    }
    if topic::is_valid_format(value.trim()) {
        return topic::mask_for_logging(Some(value));
    }
    if is_nested_uri(value) {
        return mask_uri_secrets(value);
    }
    value.to_string()
}

/// Wallet deep links and callbacks carry whole pairing URIs as a parameter
fn is_nested_uri(value: &str) -> bool {
    value.contains('?') && url::Url::parse(value).is_ok()
}

/// Mask secrets embedded in a URI and truncate it to `max_len`
pub fn redact_uri(raw: &str, max_len: usize) -> String {
    let masked = mask_uri_secrets(raw);
    truncate_middle(&masked, max_len)
}

/// Keep head and tail of an overlong string, noting how much was elided
pub fn truncate_middle(value: &str, max_len: usize) -> String {
    let total = value.chars().count();
    if total <= max_len {
        return value.to_string();
    }

    let keep = max_len / 2;
    let head: String = value.chars().take(keep).collect();
    let tail: String = value.chars().skip(total - keep).collect();
    format!("{}...[{} chars elided]...{}", head, total - 2 * keep, tail)
}

/// `abcd...wxyz` for identifiers that are safe to partially show
pub fn shorten(value: &str) -> String {
    let count = value.chars().count();
    if count <= 8 {
        return MASK.to_string();
    }
    let head: String = value.chars().take(4).collect();
    let tail: String = value.chars().skip(count - 4).collect();
    format!("{}...{}", head, tail)
}

fn mask_uri_secrets(raw: &str) -> String {
    // The topic sits between the scheme separator and '@' in pairing URIs
    let (base, query) = match raw.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (raw, None),
    };

    let base = mask_topic_in_path(base);
    let Some(query) = query else {
        return base;
    };

    let (query, fragment) = match query.split_once('#') {
        Some((q, f)) => (q, Some(f)),
        None => (query, None),
    };

    let pairs: Vec<String> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => {
                let decoded = percent_decode(value);
                let redacted = redact_param(name, &decoded);
                if redacted == decoded {
                    format!("{}={}", name, value)
                } else {
                    let encoded: String =
                        url::form_urlencoded::byte_serialize(redacted.as_bytes()).collect();
                    format!("{}={}", name, encoded)
                }
            }
            None => pair.to_string(),
        })
        .collect();

    let mut out = format!("{}?{}", base, pairs.join("&"));
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

fn mask_topic_in_path(base: &str) -> String {
    let Some((scheme, rest)) = base.split_once(':') else {
        return base.to_string();
    };
    let (candidate, version) = match rest.split_once('@') {
        Some((topic, version)) => (topic, Some(version)),
        None => (rest, None),
    };
    if !topic::is_valid_format(candidate) {
        return base.to_string();
    }
    let masked = topic::mask_for_logging(Some(candidate));
    match version {
        Some(version) => format!("{}:{}@{}", scheme, masked, version),
        None => format!("{}:{}", scheme, masked),
    }
}

fn percent_decode(value: &str) -> String {
    url::form_urlencoded::parse(format!("v={}", value).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| value.to_string())
}
