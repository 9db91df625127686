//! Session topic validation
//!
//! A topic addresses one relay channel and is exactly 64 hexadecimal
//! characters. Persisted and relayed topics are only trusted after passing
//! through [`validate`]; the resulting [`SessionTopic`] never prints in full.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TOPIC_LENGTH: usize = 64;

const NO_TOPIC_PLACEHOLDER: &str = "<none>";
const INVALID_TOPIC_PLACEHOLDER: &str = "<invalid-topic>";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("Session topic is missing")]
    NullTopic,
    #[error("Session topic is empty")]
    EmptyTopic,
    #[error("Session topic must be {} characters, got {actual}", TOPIC_LENGTH)]
    InvalidLength { actual: usize },
    #[error("Session topic must contain only hexadecimal characters")]
    InvalidCharacters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicErrorKind {
    NullTopic,
    EmptyTopic,
    InvalidLength,
    InvalidCharacters,
}

impl TopicError {
    pub fn kind(&self) -> TopicErrorKind {
        match self {
            Self::NullTopic => TopicErrorKind::NullTopic,
            Self::EmptyTopic => TopicErrorKind::EmptyTopic,
            Self::InvalidLength { .. } => TopicErrorKind::InvalidLength,
            Self::InvalidCharacters => TopicErrorKind::InvalidCharacters,
        }
    }
}

/// A validated, normalized (trimmed, lower-case) session topic
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionTopic(String);

impl SessionTopic {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn masked(&self) -> String {
        mask(&self.0)
    }
}

impl std::fmt::Debug for SessionTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionTopic({})", self.masked())
    }
}

impl std::fmt::Display for SessionTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.masked())
    }
}

impl TryFrom<String> for SessionTopic {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate(Some(&value))
    }
}

impl From<SessionTopic> for String {
    fn from(topic: SessionTopic) -> Self {
        topic.0
    }
}

impl std::str::FromStr for SessionTopic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate(Some(s))
    }
}

/// Strict predicate: exactly 64 hex characters, no surrounding whitespace
pub fn is_valid_format(topic: &str) -> bool {
    topic.len() == TOPIC_LENGTH && topic.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Validate and normalize a topic
pub fn validate(topic: Option<&str>) -> Result<SessionTopic, TopicError> {
    let raw = topic.ok_or(TopicError::NullTopic)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TopicError::EmptyTopic);
    }

    let length = trimmed.chars().count();
    if length != TOPIC_LENGTH {
        return Err(TopicError::InvalidLength { actual: length });
    }
    if !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(TopicError::InvalidCharacters);
    }

    Ok(SessionTopic(trimmed.to_ascii_lowercase()))
}

/// Normalized topic, or `None` when invalid
pub fn sanitize(topic: Option<&str>) -> Option<SessionTopic> {
    validate(topic).ok()
}

/// Log-safe rendering: `abcd...wxyz` for valid topics, a placeholder otherwise
pub fn mask_for_logging(topic: Option<&str>) -> String {
    match topic {
        None => NO_TOPIC_PLACEHOLDER.to_string(),
        Some(raw) => match validate(Some(raw)) {
            Ok(valid) => valid.masked(),
            Err(_) => INVALID_TOPIC_PLACEHOLDER.to_string(),
        },
    }
}

fn mask(normalized: &str) -> String {
    let head = &normalized[..4];
    let tail = &normalized[normalized.len() - 4..];
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_topic() -> String {
        "0123456789abcdef".repeat(4)
    }

    #[test]
    fn test_valid_lowercase_topic() {
        let topic = valid_topic();
        assert!(is_valid_format(&topic));
        let validated = validate(Some(&topic)).unwrap();
        assert_eq!(validated.as_str(), topic);
    }

    #[test]
    fn test_invalid_lengths() {
        let short = &valid_topic()[..63];
        let long = format!("{}a", valid_topic());
        assert_eq!(
            validate(Some(short)).unwrap_err().kind(),
            TopicErrorKind::InvalidLength
        );
        assert_eq!(
            validate(Some(&long)).unwrap_err(),
            TopicError::InvalidLength { actual: 65 }
        );
    }

    #[test]
    fn test_invalid_characters() {
        let mut topic = valid_topic();
        topic.replace_range(10..11, "g");
        assert_eq!(topic.len(), 64);
        assert_eq!(validate(Some(&topic)).unwrap_err(), TopicError::InvalidCharacters);
        assert!(!is_valid_format(&topic));
    }

    #[test]
    fn test_null_and_empty() {
        assert_eq!(validate(None).unwrap_err(), TopicError::NullTopic);
        assert_eq!(validate(Some("")).unwrap_err(), TopicError::EmptyTopic);
        assert_eq!(validate(Some("   ")).unwrap_err(), TopicError::EmptyTopic);
    }

    #[test]
    fn test_sanitize_normalizes_mixed_case_padded() {
        let topic = valid_topic();
        let padded = format!("  {}\n", topic.to_uppercase());
        assert!(!is_valid_format(&padded));
        assert_eq!(sanitize(Some(&padded)).unwrap().as_str(), topic);
        assert!(sanitize(Some("nope")).is_none());
    }

    #[test]
    fn test_mask_for_logging() {
        let topic = valid_topic();
        assert_eq!(mask_for_logging(Some(&topic)), "0123...cdef");
        assert_eq!(mask_for_logging(Some("abc")), INVALID_TOPIC_PLACEHOLDER);
        assert_eq!(mask_for_logging(None), NO_TOPIC_PLACEHOLDER);
    }

    #[test]
    fn test_session_topic_formatting_is_masked() {
        let topic = validate(Some(&valid_topic())).unwrap();
        assert_eq!(format!("{}", topic), "0123...cdef");
        assert!(!format!("{:?}", topic).contains(&valid_topic()));
    }

    #[test]
    fn test_session_topic_serde_validates() {
        let json = serde_json::to_string(&valid_topic()).unwrap();
        let topic: SessionTopic = serde_json::from_str(&json).unwrap();
        assert_eq!(topic.as_str(), valid_topic());

        let bad: Result<SessionTopic, _> = serde_json::from_str("\"zz\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_error_messages_are_readable() {
        assert_eq!(
            TopicError::InvalidLength { actual: 3 }.to_string(),
            "Session topic must be 64 characters, got 3"
        );
    }
}
