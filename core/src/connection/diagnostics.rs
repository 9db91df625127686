// Deep link diagnostics attached to a connection attempt
//
// Only redacted forms are kept; the raw URIs never outlive the constructor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use crate::redact;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "outcome", content = "reason")]
pub enum DispatchOutcome {
    Opened,
    NotInstalled,
    Failed(String),
}

impl std::fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opened => write!(f, "opened"),
            Self::NotInstalled => write!(f, "notInstalled"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Result of asking the OS to open a wallet deep link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeeplinkDispatch {
    pub redacted_uri: String,
    pub raw_length: usize,
    pub outcome: DispatchOutcome,
    pub dispatched_at: DateTime<Utc>,
}

impl DeeplinkDispatch {
    pub fn new(raw_uri: &str, outcome: DispatchOutcome) -> Self {
        Self {
            redacted_uri: redact::redact_uri(raw_uri, redact::MAX_LOGGED_URI_LEN),
            raw_length: raw_uri.chars().count(),
            outcome,
            dispatched_at: Utc::now(),
        }
    }
}

/// Callback URI delivered back to the app by a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeeplinkReturn {
    pub scheme: String,
    pub host: Option<String>,
    pub path: String,
    pub query_parameters: BTreeMap<String, String>,
    pub redacted: String,
    pub raw_length: usize,
    pub received_at: DateTime<Utc>,
}

impl DeeplinkReturn {
    pub fn from_uri(raw: &str) -> Self {
        let redacted = redact::redact_uri(raw, redact::MAX_LOGGED_URI_LEN);
        let raw_length = raw.chars().count();
        let received_at = Utc::now();

        match Url::parse(raw.trim()) {
            Ok(url) => Self {
                scheme: url.scheme().to_string(),
                host: url.host_str().map(str::to_string),
                path: url.path().to_string(),
                query_parameters: url
                    .query_pairs()
                    .map(|(name, value)| {
                        let masked = redact::redact_param(&name, &value);
                        (name.into_owned(), redact::truncate_middle(&masked, 64))
                    })
                    .collect(),
                redacted,
                raw_length,
                received_at,
            },
            Err(_) => Self {
                scheme: raw.split_once(':').map(|(s, _)| s.to_string()).unwrap_or_default(),
                host: None,
                path: String::new(),
                query_parameters: BTreeMap::new(),
                redacted,
                raw_length,
                received_at,
            },
        }
    }

    /// Wallet-reported error code, if the callback carries one
    pub fn error_code(&self) -> Option<&str> {
        self.query_parameters
            .get("errorCode")
            .or_else(|| self.query_parameters.get("error"))
            .map(String::as_str)
    }
}
