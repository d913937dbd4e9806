//! Typed metadata values.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A value stored in a [`MetadataStore`](crate::MetadataStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaValue {
    /// UTF-8 text.
    Text(String),
    /// A UUID.
    Uuid(Uuid),
    /// A boolean flag.
    Bool(bool),
    /// A signed integer.
    Integer(i64),
    /// Ordered list of strings.
    TextList(Vec<String>),
    /// Milliseconds since the Unix epoch.
    Timestamp(u64),
}

impl MetaValue {
    /// Returns the name of the value type, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            MetaValue::Text(_) => "text",
            MetaValue::Uuid(_) => "uuid",
            MetaValue::Bool(_) => "bool",
            MetaValue::Integer(_) => "integer",
            MetaValue::TextList(_) => "text list",
            MetaValue::Timestamp(_) => "timestamp",
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Text(value)
    }
}

impl From<Uuid> for MetaValue {
    fn from(value: Uuid) -> Self {
        MetaValue::Uuid(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Integer(value)
    }
}

impl From<Vec<String>> for MetaValue {
    fn from(value: Vec<String>) -> Self {
        MetaValue::TextList(value)
    }
}
