//! Pairing URI parsing
//!
//! `scheme:{topic}@{version}?relay-protocol={proto}&symKey={key}&expiryTimestamp={secs}&methods={csv}`
//!
//! Only the topic, version, relay protocol, expiry and methods are extracted.
//! The symmetric key is observed for presence and then dropped.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use super::topic::{self, SessionTopic, TopicError};
use crate::redact;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UriError {
    #[error("Malformed session URI: {0}")]
    Malformed(String),
    #[error("Session URI topic invalid: {0}")]
    Topic(#[from] TopicError),
    #[error("Session URI version missing or not a number")]
    InvalidVersion,
    #[error("Session URI expiry is not a unix timestamp")]
    InvalidExpiry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUri {
    pub scheme: String,
    pub topic: SessionTopic,
    pub version: u32,
    pub relay_protocol: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub methods: Vec<String>,
    pub has_sym_key: bool,
}

impl SessionUri {
    pub fn parse(raw: &str) -> Result<Self, UriError> {
        let url = Url::parse(raw.trim()).map_err(|e| UriError::Malformed(e.to_string()))?;
        let (topic_part, version_part) = url
            .path()
            .split_once('@')
            .ok_or_else(|| UriError::Malformed("missing '@version'".to_string()))?;

        let topic = topic::validate(Some(topic_part))?;
        let version = version_part
            .parse::<u32>()
            .map_err(|_| UriError::InvalidVersion)?;

        let mut relay_protocol = None;
        let mut expiry = None;
        let mut methods = Vec::new();
        let mut has_sym_key = false;

        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "relay-protocol" => relay_protocol = Some(value.into_owned()),
                "expiryTimestamp" => {
                    let secs = value.parse::<i64>().map_err(|_| UriError::InvalidExpiry)?;
                    expiry = Some(
                        Utc.timestamp_opt(secs, 0)
                            .single()
                            .ok_or(UriError::InvalidExpiry)?,
                    );
                }
                "methods" => {
                    methods = value
                        .split(',')
                        .map(|m| m.trim_matches(|c: char| c == '[' || c == ']' || c.is_whitespace()))
                        .map(str::to_string)
                        .filter(|m| !m.is_empty())
                        .collect();
                }
                "symKey" => has_sym_key = !value.is_empty(),
                _ => {}
            }
        }

        Ok(Self {
            scheme: url.scheme().to_string(),
            topic,
            version,
            relay_protocol,
            expiry,
            methods,
            has_sym_key,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| now >= expiry)
    }
}

/// Redacted, log-safe view of a pairing URI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayUriMetadata {
    pub scheme: Option<String>,
    pub masked_topic: String,
    pub version: Option<u32>,
    pub relay_protocol: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub methods: Vec<String>,
    pub has_sym_key: bool,
    pub raw_length: usize,
    pub redacted: String,
    pub parse_error: Option<String>,
}

impl RelayUriMetadata {
    /// Summarize any URI, parseable or not, without retaining secrets
    pub fn from_raw(raw: &str) -> Self {
        let redacted = redact::redact_uri(raw, redact::MAX_LOGGED_URI_LEN);
        let raw_length = raw.chars().count();
        match SessionUri::parse(raw) {
            Ok(uri) => Self {
                scheme: Some(uri.scheme),
                masked_topic: uri.topic.masked(),
                version: Some(uri.version),
                relay_protocol: uri.relay_protocol,
                expiry: uri.expiry,
                methods: uri.methods,
                has_sym_key: uri.has_sym_key,
                raw_length,
                redacted,
                parse_error: None,
            },
            Err(e) => Self {
                scheme: raw.split_once(':').map(|(s, _)| s.to_string()),
                masked_topic: topic::mask_for_logging(None),
                version: None,
                relay_protocol: None,
                expiry: None,
                methods: Vec::new(),
                has_sym_key: raw.contains("symKey="),
                raw_length,
                redacted,
                parse_error: Some(e.to_string()),
            },
        }
    }
}
