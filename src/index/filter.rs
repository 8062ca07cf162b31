//! Typed tag-filter expressions for vector index queries
//!
//! Filters are built by folding optional predicates into an empty
//! conjunction:
//!
//! ```
//! use memdc::index::{FilterBuilder, TagField};
//!
//! let filter = FilterBuilder::new()
//!     .with(TagField::Type, Some("hobby"))
//!     .with(TagField::Status, None)
//!     .with(TagField::UserId, Some("alice"))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(filter.to_string(), "(@type:{hobby} @userId:{alice})");
//! ```

use std::fmt;

use crate::types::MemoryRecord;

/// Separator declared for every TAG field in the index schema
///
/// RediSearch splits a tag value on its separator, so stored values must
/// never contain it.
pub const TAG_SEPARATOR: char = '\u{1f}';

/// Metadata fields indexed as exact-match tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagField {
    Type,
    Status,
    UserId,
}

impl TagField {
    /// Field name as stored in the index schema
    pub fn as_str(&self) -> &'static str {
        match self {
            TagField::Type => "type",
            TagField::Status => "status",
            TagField::UserId => "userId",
        }
    }

    /// The record's value for this field
    pub fn value_of<'a>(&self, record: &'a MemoryRecord) -> &'a str {
        match self {
            TagField::Type => &record.memory_type,
            TagField::Status => &record.status,
            TagField::UserId => &record.user_id,
        }
    }
}

/// A filter expression: a tag equality or an AND of two expressions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    Eq { field: TagField, value: String },
    And(Box<TagFilter>, Box<TagFilter>),
}

impl TagFilter {
    pub fn eq(field: TagField, value: impl Into<String>) -> Self {
        TagFilter::Eq {
            field,
            value: value.into(),
        }
    }

    /// Conjunction of `self` and `other`
    pub fn and(self, other: TagFilter) -> Self {
        TagFilter::And(Box::new(self), Box::new(other))
    }

    /// Evaluate the filter against a record
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        match self {
            TagFilter::Eq { field, value } => field.value_of(record) == value,
            TagFilter::And(left, right) => left.matches(record) && right.matches(record),
        }
    }

    /// All equality predicates, left to right
    pub fn predicates(&self) -> Vec<(TagField, &str)> {
        match self {
            TagFilter::Eq { field, value } => vec![(*field, value.as_str())],
            TagFilter::And(left, right) => {
                let mut preds = left.predicates();
                preds.extend(right.predicates());
                preds
            }
        }
    }
}

/// Renders RediSearch query syntax; AND is juxtaposition inside parentheses
impl fmt::Display for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagFilter::Eq { field, value } => {
                write!(f, "@{}:{{{}}}", field.as_str(), escape_tag_value(value))
            }
            TagFilter::And(left, right) => write!(f, "({} {})", left, right),
        }
    }
}

/// Escape a tag value for RediSearch
///
/// Every character other than alphanumerics and `_` is backslash-escaped.
pub fn escape_tag_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if !ch.is_alphanumeric() && ch != '_' {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Folds optional predicates into `None` or an AND tree
#[derive(Debug, Clone, Default)]
pub struct FilterBuilder {
    filter: Option<TagFilter>,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `field == value` when a non-blank value is present
    pub fn with(mut self, field: TagField, value: Option<&str>) -> Self {
        let value = match value.map(str::trim) {
            Some(v) if !v.is_empty() => v,
            _ => return self,
        };
        let predicate = TagFilter::eq(field, value);
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn build(self) -> Option<TagFilter> {
        self.filter
    }
}
