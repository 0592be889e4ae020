//! Record serialization for list responses.

use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::errors::ApiError;

/// Turns one record into its JSON representation.
pub trait RecordSerializer<R> {
    /// # Errors
    ///
    /// Returns [`ApiError::Internal`] if the record cannot be represented.
    fn serialize(&self, record: &R) -> Result<Json, ApiError>;
}

/// Serializes a record's fields, keeping only `only` when it is set and
/// otherwise dropping `exclude`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectSerializer {
    pub only: Vec<String>,
    pub exclude: Vec<String>,
}

impl ObjectSerializer {
    #[must_use]
    pub fn only<S: AsRef<str>>(fields: &[S]) -> Self {
        Self {
            only: fields.iter().map(|f| f.as_ref().to_string()).collect(),
            exclude: Vec::new(),
        }
    }

    #[must_use]
    pub fn exclude<S: AsRef<str>>(fields: &[S]) -> Self {
        Self {
            only: Vec::new(),
            exclude: fields.iter().map(|f| f.as_ref().to_string()).collect(),
        }
    }

    fn keep(&self, key: &str) -> bool {
        if self.only.is_empty() {
            !self.exclude.iter().any(|f| f == key)
        } else {
            self.only.iter().any(|f| f == key)
        }
    }
}

impl<R: Serialize> RecordSerializer<R> for ObjectSerializer {
    fn serialize(&self, record: &R) -> Result<Json, ApiError> {
        let value = serde_json::to_value(record)
            .map_err(|e| ApiError::internal("Failed to serialize record", Some(e.to_string())))?;
        Ok(match value {
            Json::Object(fields) => Json::Object(
                fields
                    .into_iter()
                    .filter(|(key, _)| self.keep(key))
                    .collect::<Map<String, Json>>(),
            ),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct User {
        id: i64,
        name: String,
        password: String,
    }

    fn user() -> User {
        User {
            id: 1,
            name: "alice".to_string(),
            password: "hash".to_string(),
        }
    }

    #[test]
    fn test_exclude_drops_fields() {
        let serializer = ObjectSerializer::exclude(&["password"]);
        assert_eq!(
            serializer.serialize(&user()).unwrap(),
            json!({"id": 1, "name": "alice"})
        );
    }

    #[test]
    fn test_only_wins_over_exclude() {
        let serializer = ObjectSerializer {
            only: vec!["name".to_string()],
            exclude: vec!["name".to_string()],
        };
        assert_eq!(serializer.serialize(&user()).unwrap(), json!({"name": "alice"}));
    }

    #[test]
    fn test_non_objects_pass_through() {
        let serializer = ObjectSerializer::only(&["id"]);
        assert_eq!(serializer.serialize(&vec![1, 2]).unwrap(), json!([1, 2]));
    }
}
