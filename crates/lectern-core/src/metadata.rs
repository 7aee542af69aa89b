//! Message metadata document.
//!
//! Stored in `messages.metadata` (JSONB). Generation statistics are typed;
//! any other keys pass through in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{Error, Result};
use crate::settings::merge_json;

/// Structured annotation extracted from a message (citations, rubric hits, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Annotation kind, e.g. "citation".
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific payload.
    #[serde(flatten)]
    pub data: Map<String, JsonValue>,
}

/// Metadata attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,

    /// Model identifier that produced an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// End-to-end generation latency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,

    /// Provider finish reason ("stop", "length", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<Annotation>>,

    /// Extension keys not known to this version.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl MessageMetadata {
    /// Validate a raw JSON document. `null` is treated as empty metadata.
    pub fn from_json(value: JsonValue) -> Result<Self> {
        match value {
            JsonValue::Null => Ok(Self::default()),
            JsonValue::Object(_) => serde_json::from_value(value)
                .map_err(|e| Error::InvalidInput(format!("invalid message metadata: {}", e))),
            _ => Err(Error::InvalidInput(
                "message metadata must be a JSON object".to_string(),
            )),
        }
    }

    pub fn to_json(&self) -> Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }

    /// Overlay metadata produced after generation completes.
    pub fn enrich(&self, later: &MessageMetadata) -> Result<Self> {
        let mut base = self.to_json()?;
        merge_json(&mut base, later.to_json()?);
        Self::from_json(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_fields_and_extras() {
        let meta = MessageMetadata::from_json(json!({
            "prompt_tokens": 12,
            "model": "gpt-x",
            "finish_reason": "stop",
            "annotations": [{"type": "citation", "url": "https://example.org"}],
            "rubric_score": 0.8
        }))
        .unwrap();

        assert_eq!(meta.prompt_tokens, Some(12));
        assert_eq!(meta.model.as_deref(), Some("gpt-x"));
        let ann = &meta.annotations.as_ref().unwrap()[0];
        assert_eq!(ann.kind, "citation");
        assert_eq!(ann.data.get("url"), Some(&json!("https://example.org")));
        assert_eq!(meta.extra.get("rubric_score"), Some(&json!(0.8)));
    }

    #[test]
    fn test_null_is_empty() {
        assert_eq!(
            MessageMetadata::from_json(JsonValue::Null).unwrap(),
            MessageMetadata::default()
        );
    }

    #[test]
    fn test_wrong_type_rejected() {
        let err = MessageMetadata::from_json(json!({"latency_ms": "slow"})).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(MessageMetadata::from_json(json!("text")).is_err());
    }

    #[test]
    fn test_enrich_keeps_existing_and_adds_new() {
        let initial = MessageMetadata::from_json(json!({"model": "m1", "trace": {"a": 1}})).unwrap();
        let later = MessageMetadata::from_json(json!({
            "completion_tokens": 40,
            "latency_ms": 900,
            "trace": {"b": 2}
        }))
        .unwrap();

        let merged = initial.enrich(&later).unwrap();
        assert_eq!(merged.model.as_deref(), Some("m1"));
        assert_eq!(merged.completion_tokens, Some(40));
        assert_eq!(merged.latency_ms, Some(900));
        assert_eq!(merged.extra.get("trace"), Some(&json!({"a": 1, "b": 2})));
    }

    #[test]
    fn test_empty_serializes_to_empty_object() {
        assert_eq!(MessageMetadata::default().to_json().unwrap(), json!({}));
    }
}
