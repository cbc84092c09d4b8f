//! Filter expressions in the shape the UI sends them:
//! `{ "AND": [...] }`, `{ "OR": [...] }`, `{ "NOT": {...} }` or
//! `{ "filter": { "property", "operation", "value", "caseSensitive" } }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ComparisonOperator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    StartsWith,
    In,
    Between,
    IsNull,
    IsNotEmpty,
    IsEmpty,
    IsNoneOf,
    /// Anything not recognised; rejected when the filter is evaluated.
    Unsupported(String),
}

impl ComparisonOperator {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Eq => "EQ",
            Self::Gt => "GT",
            Self::Gte => "GTE",
            Self::Lt => "LT",
            Self::Lte => "LTE",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT_CONTAINS",
            Self::StartsWith => "STARTS_WITH",
            Self::In => "IN",
            Self::Between => "BETWEEN",
            Self::IsNull => "IS_NULL",
            Self::IsNotEmpty => "IS_NOT_EMPTY",
            Self::IsEmpty => "IS_EMPTY",
            Self::IsNoneOf => "IS_NONE_OF",
            Self::Unsupported(name) => name,
        }
    }
}

impl From<&str> for ComparisonOperator {
    fn from(s: &str) -> Self {
        match s {
            "EQ" => Self::Eq,
            "GT" => Self::Gt,
            "GTE" => Self::Gte,
            "LT" => Self::Lt,
            "LTE" => Self::Lte,
            "CONTAINS" => Self::Contains,
            "NOT_CONTAINS" => Self::NotContains,
            "STARTS_WITH" => Self::StartsWith,
            "IN" => Self::In,
            "BETWEEN" => Self::Between,
            "IS_NULL" => Self::IsNull,
            "IS_NOT_EMPTY" => Self::IsNotEmpty,
            "IS_EMPTY" => Self::IsEmpty,
            "IS_NONE_OF" => Self::IsNoneOf,
            other => Self::Unsupported(other.to_string()),
        }
    }
}

impl From<String> for ComparisonOperator {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<ComparisonOperator> for String {
    fn from(op: ComparisonOperator) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single comparison against one indexed field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterItem {
    pub property: String,
    pub operation: ComparisonOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_empty: Option<bool>,
}

impl FilterItem {
    pub fn new(property: impl Into<String>, operation: ComparisonOperator, value: Value) -> Self {
        Self {
            property: property.into(),
            operation,
            value,
            case_sensitive: None,
            include_empty: None,
        }
    }

    #[must_use]
    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.case_sensitive = Some(yes);
        self
    }

    #[must_use]
    pub fn include_empty(mut self, yes: bool) -> Self {
        self.include_empty = Some(yes);
        self
    }

    /// Text matching is case sensitive unless explicitly turned off.
    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive != Some(false)
    }
}

/// Recursive boolean filter. One of the four fields is expected to be set;
/// a node with none of them matches nothing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "NOT", default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<Filter>>,
    #[serde(rename = "OR", default, skip_serializing_if = "Option::is_none")]
    pub or: Option<Vec<Filter>>,
    #[serde(rename = "AND", default, skip_serializing_if = "Option::is_none")]
    pub and: Option<Vec<Filter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterItem>,
}

impl Filter {
    pub fn leaf(item: FilterItem) -> Self {
        Self {
            filter: Some(item),
            ..Self::default()
        }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Self {
            and: Some(filters),
            ..Self::default()
        }
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Self {
            or: Some(filters),
            ..Self::default()
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Self {
            not: Some(Box::new(filter)),
            ..Self::default()
        }
    }
}

impl From<FilterItem> for Filter {
    fn from(item: FilterItem) -> Self {
        Self::leaf(item)
    }
}
