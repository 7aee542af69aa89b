//! Group settings documents and root-to-leaf inheritance.
//!
//! Each group stores only its own overrides in `groups.settings` (JSONB).
//! The settings a department actually runs with are computed at read time by
//! folding the district, school and department documents in that order, so
//! a change at the district level reaches every descendant without a write.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{Error, Result};

/// Settings document attached to a group.
///
/// Known fields are typed; anything else is carried in `extra` untouched so
/// newer writers do not lose data through older readers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupSettings {
    /// Model used when a tool does not pin one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Models members of this group may select.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_models: Option<Vec<String>>,

    /// Upper bound on generated tokens per assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens_per_message: Option<u32>,

    /// Per-user daily message quota.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_message_limit: Option<u32>,

    /// BCP 47 locale tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    /// IANA timezone name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    /// Extension keys not known to this version.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl GroupSettings {
    /// Validate a raw JSON document against the known-field schema.
    pub fn from_json(value: JsonValue) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::InvalidInput(
                "group settings must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value)
            .map_err(|e| Error::InvalidInput(format!("invalid group settings: {}", e)))
    }

    /// Serialize to the JSONB representation.
    pub fn to_json(&self) -> Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Merge a root-to-leaf chain of settings documents.
///
/// Later documents override earlier ones key by key; nested objects merge
/// recursively; `null` never overrides an inherited value.
pub fn merge_settings<'a, I>(chain: I) -> Result<GroupSettings>
where
    I: IntoIterator<Item = &'a GroupSettings>,
{
    let merged = chain
        .into_iter()
        .try_fold(JsonValue::Object(Map::new()), |mut acc, doc| {
            merge_json(&mut acc, doc.to_json()?);
            Ok::<_, Error>(acc)
        })?;
    GroupSettings::from_json(merged)
}

/// Deep-merge `overlay` onto `base` in place.
pub fn merge_json(base: &mut JsonValue, overlay: JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value)
                    }
                    _ => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => {
            if !overlay.is_null() {
                *base = overlay;
            }
        }
    }
}
