//! Schemaless documents as held by the remote store.
//!
//! A document is a flat JSON object addressed by a [`DocPath`]. Nested
//! collections hang off a document path, e.g. `users/u1/following/u2`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Field map of a stored document.
pub type Fields = serde_json::Map<String, Value>;

/// Errors building paths or converting documents into model types.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("invalid document path: {0}")]
    InvalidPath(String),
    #[error("document {id} does not match the expected shape: {source}")]
    Shape {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("value is not a JSON object")]
    NotAnObject,
}

/// Address of one document: a collection path plus a document id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocPath {
    collection: String,
    id: String,
}

impl DocPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Result<Self, DocumentError> {
        let collection = collection.into();
        let id = id.into();
        let segments_ok = !collection.is_empty()
            && collection.split('/').count() % 2 == 1
            && collection.split('/').all(|s| !s.is_empty());
        if !segments_ok || id.is_empty() || id.contains('/') {
            return Err(DocumentError::InvalidPath(format!("{collection}/{id}")));
        }
        Ok(Self { collection, id })
    }

    /// Parse `a/b` or `a/b/c/d`.
    pub fn parse(path: &str) -> Result<Self, DocumentError> {
        match path.rsplit_once('/') {
            Some((collection, id)) => Self::new(collection, id),
            None => Err(DocumentError::InvalidPath(path.to_string())),
        }
    }

    /// Path of a document in a sub-collection of this document.
    pub fn child(&self, collection: &str, id: impl Into<String>) -> Result<Self, DocumentError> {
        Self::new(format!("{}/{}/{}", self.collection, self.id, collection), id)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a document from any serializable model type.
    pub fn from_model<T: Serialize>(id: impl Into<String>, model: &T) -> Result<Self, DocumentError> {
        let id = id.into();
        match serde_json::to_value(model) {
            Ok(Value::Object(fields)) => Ok(Self { id, fields }),
            Ok(_) => Err(DocumentError::NotAnObject),
            Err(source) => Err(DocumentError::Shape { id, source }),
        }
    }

    /// Field map of a model type, for writes that let the store pick the id.
    pub fn fields_of<T: Serialize>(model: &T) -> Result<Fields, DocumentError> {
        Self::from_model(String::new(), model).map(|doc| doc.fields)
    }

    /// Decode into a model type. The document id is injected as `id`
    /// when the model carries one.
    pub fn to_model<T: DeserializeOwned>(&self) -> Result<T, DocumentError> {
        let mut fields = self.fields.clone();
        fields
            .entry("id")
            .or_insert_with(|| Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(fields)).map_err(|source| DocumentError::Shape {
            id: self.id.clone(),
            source,
        })
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.fields.get(field).and_then(Value::as_i64)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.fields.get(field).and_then(Value::as_bool)
    }

    /// Length of an array field, 0 when absent or not an array.
    pub fn array_len(&self, field: &str) -> usize {
        self.fields
            .get(field)
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }

    pub fn array_contains(&self, field: &str, needle: &str) -> bool {
        self.fields
            .get(field)
            .and_then(Value::as_array)
            .is_some_and(|items| items.iter().any(|v| v.as_str() == Some(needle)))
    }
}
