//! Atomic compound updates.
//!
//! An [`AtomicUpdate`] bundles counter increments, array membership edits
//! and plain field sets against one document. Stores must apply the whole
//! bundle indivisibly: no reader may observe the counter changed without
//! the membership change, and there is no read-modify-write on the client.

use meowgram_core::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AtomicUpdate {
    pub increments: BTreeMap<String, i64>,
    pub array_union: BTreeMap<String, Vec<Value>>,
    pub array_remove: BTreeMap<String, Vec<Value>>,
    pub set: BTreeMap<String, Value>,
}

impl AtomicUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `by` to a numeric field. A missing field counts as 0.
    pub fn increment(mut self, field: impl Into<String>, by: i64) -> Self {
        *self.increments.entry(field.into()).or_insert(0) += by;
        self
    }

    /// Add `value` to an array field unless already present.
    pub fn array_union(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.array_union.entry(field.into()).or_default().push(value.into());
        self
    }

    /// Remove every occurrence of `value` from an array field.
    pub fn array_remove(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.array_remove.entry(field.into()).or_default().push(value.into());
        self
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.increments.is_empty()
            && self.array_union.is_empty()
            && self.array_remove.is_empty()
            && self.set.is_empty()
    }

    /// Apply every sub-operation to `fields`.
    pub fn apply(&self, fields: &mut Fields) {
        for (field, value) in &self.set {
            fields.insert(field.clone(), value.clone());
        }

        for (field, by) in &self.increments {
            let current = fields.get(field).and_then(Value::as_i64).unwrap_or(0);
            fields.insert(field.clone(), Value::from(current + by));
        }

        for (field, values) in &self.array_union {
            let slot = fields
                .entry(field.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            if let Value::Array(items) = slot {
                for v in values {
                    if !items.contains(v) {
                        items.push(v.clone());
                    }
                }
            }
        }

        for (field, values) in &self.array_remove {
            if let Some(Value::Array(items)) = fields.get_mut(field) {
                items.retain(|item| !values.contains(item));
            }
        }
    }

    /// The update that undoes this one, assuming every union really added
    /// its element and every remove really removed one. Field sets cannot
    /// be inverted without the prior value, so their presence yields `None`.
    pub fn inverse(&self) -> Option<AtomicUpdate> {
        if !self.set.is_empty() {
            return None;
        }
        Some(AtomicUpdate {
            increments: self
                .increments
                .iter()
                .map(|(field, by)| (field.clone(), -by))
                .collect(),
            array_union: self.array_remove.clone(),
            array_remove: self.array_union.clone(),
            set: BTreeMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> Fields {
        match v {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_like_update_applies_counter_and_membership() {
        let mut doc = fields(json!({ "likesCount": 3, "likedByUsers": ["u9"] }));
        AtomicUpdate::new()
            .increment("likesCount", 1)
            .array_union("likedByUsers", "u1")
            .apply(&mut doc);

        assert_eq!(doc["likesCount"], json!(4));
        assert_eq!(doc["likedByUsers"], json!(["u9", "u1"]));
    }

    #[test]
    fn test_union_is_set_semantics() {
        let mut doc = fields(json!({ "likes": ["u1"] }));
        AtomicUpdate::new().array_union("likes", "u1").apply(&mut doc);
        assert_eq!(doc["likes"], json!(["u1"]));
    }

    #[test]
    fn test_missing_fields_start_empty() {
        let mut doc = Fields::new();
        AtomicUpdate::new()
            .increment("followersCount", 1)
            .array_union("likes", "u1")
            .array_remove("other", "u1")
            .apply(&mut doc);

        assert_eq!(doc["followersCount"], json!(1));
        assert_eq!(doc["likes"], json!(["u1"]));
        assert!(!doc.contains_key("other"));
    }

    #[test]
    fn test_inverse_restores() {
        let original = fields(json!({ "likesCount": 3, "likedByUsers": ["u9"] }));
        let update = AtomicUpdate::new()
            .increment("likesCount", 1)
            .array_union("likedByUsers", "u1");

        let mut doc = original.clone();
        update.apply(&mut doc);
        update.inverse().unwrap().apply(&mut doc);
        assert_eq!(doc, original);

        assert!(AtomicUpdate::new().set("read", true).inverse().is_none());
    }
}
