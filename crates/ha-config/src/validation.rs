//! Schema helpers for integration configuration sections
//!
//! Integrations describe their section with serde types and use these
//! helpers for the rules serde cannot express on its own: slug keys, values
//! that may be given as a single item or a list, and entity ID validation.

use std::fmt::Display;

use ha_core::{is_valid_slug, EntityId};
use indexmap::IndexMap;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_yaml::Value;

use crate::error::{ConfigError, ConfigResult};

/// Get an integration's section from the full configuration document
///
/// Other top-level keys are ignored. Returns `None` when the section is
/// absent or empty.
pub fn component_section<'a>(config: &'a Value, domain: &str) -> ConfigResult<Option<&'a Value>> {
    let mapping = config
        .as_mapping()
        .ok_or_else(|| ConfigError::ValidationFailed {
            message: "configuration must be a mapping".to_string(),
        })?;

    Ok(mapping.get(domain).filter(|v| !v.is_null()))
}

/// Validate a mapping whose keys are slugs and whose values follow `T`
///
/// Key order is preserved. Every value must be a mapping; a key with no
/// value is rejected.
pub fn slug_keyed<T>(domain: &str, section: &Value) -> ConfigResult<IndexMap<String, T>>
where
    T: DeserializeOwned,
{
    let mapping = section
        .as_mapping()
        .ok_or_else(|| ConfigError::ValidationFailed {
            message: format!("{}: expected a mapping of slugs", domain),
        })?;

    let mut result = IndexMap::with_capacity(mapping.len());
    for (key, value) in mapping {
        let key = match key.as_str() {
            Some(key) if is_valid_slug(key) => key.to_string(),
            _ => return Err(invalid(domain, &scalar_label(key), "invalid slug")),
        };

        if !value.is_mapping() {
            return Err(invalid(domain, &key, "expected a dictionary"));
        }
        let parsed = serde_yaml::from_value(value.clone()).map_err(|e| invalid(domain, &key, e))?;
        result.insert(key, parsed);
    }

    Ok(result)
}

/// Validate and normalize a single entity ID
///
/// Entity IDs are lowercased before validation.
pub fn entity_id(value: &str) -> ConfigResult<EntityId> {
    value
        .to_lowercase()
        .parse()
        .map_err(|e| ConfigError::InvalidValue {
            key: value.to_string(),
            reason: format!("invalid entity ID: {}", e),
        })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

/// Deserialize a value that may be given as a single item or a list
///
/// `null` becomes an empty list. Use with `#[serde(deserialize_with)]`.
pub fn ensure_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(item)) => vec![item],
        Some(OneOrMany::Many(items)) => items,
    })
}

/// Deserialize one or more entity IDs (see [`ensure_list`] and [`entity_id`])
pub fn entity_ids<'de, D>(deserializer: D) -> Result<Vec<EntityId>, D::Error>
where
    D: Deserializer<'de>,
{
    ensure_list::<D, String>(deserializer)?
        .iter()
        .map(|raw| entity_id(raw).map_err(D::Error::custom))
        .collect()
}

/// Render a mapping key the way it was written in YAML
fn scalar_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

fn invalid(domain: &str, key: &str, reason: impl Display) -> ConfigError {
    ConfigError::InvalidValue {
        key: format!("{}.{}", domain, key),
        reason: reason.to_string(),
    }
}
