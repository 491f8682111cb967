//! Typed views over stored blocks.
//!
//! Blocks are kept as loose JSON at the storage boundary because the remote
//! dataset has no fixed schema. These views are parsed from a block at the
//! point of use. Unknown fields are carried in `extra` so that writing a view
//! back never loses data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Normalizes a datasheet name for duplicate detection.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// The faction fields the sync core relies on.
///
/// Each field is read on its own: a field with an unexpected type reads as
/// absent without affecting the others. Only a block that is not a JSON
/// object yields `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactionHeader {
    pub id: Option<String>,
    pub is_subfaction: bool,
    pub parent_id: Option<String>,
}

impl FactionHeader {
    pub fn from_block(block: &Value) -> Option<Self> {
        let object = block.as_object()?;
        let text = |field: &str| object.get(field).and_then(Value::as_str).map(str::to_string);

        Some(Self {
            id: text("id"),
            is_subfaction: object
                .get("is_subfaction")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            parent_id: text("parent_id"),
        })
    }
}

/// One unit entry in a faction's `datasheets` array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Datasheet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Translation key or literal display name.
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faction_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Datasheet {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// A faction's merged document (`<code>_translated`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Faction {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_subfaction: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colours: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhancements: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stratagems: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detachments: Option<Value>,
    #[serde(default)]
    pub datasheets: Vec<Datasheet>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Faction {
    pub fn datasheet_by_id(&self, id: &str) -> Option<&Datasheet> {
        self.datasheets.iter().find(|d| d.id.as_deref() == Some(id))
    }

    pub fn datasheet_by_id_mut(&mut self, id: &str) -> Option<&mut Datasheet> {
        self.datasheets
            .iter_mut()
            .find(|d| d.id.as_deref() == Some(id))
    }
}

/// Flat translation map (`<code>_flat_<lang>`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TranslationMap(pub HashMap<String, String>);

impl TranslationMap {
    /// Translate-or-identity: returns the localized text for `key`, or `key`
    /// itself when the map has no entry. A miss is never an error.
    pub fn translate<'a>(&'a self, key: &'a str) -> &'a str {
        self.0.get(key).map(String::as_str).unwrap_or(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, text: impl Into<String>) {
        self.0.insert(key.into(), text.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
