//! Tiered record search and duplicate grouping over a pluggable record source.
//!
//! A [`SearchStrategy`] runs exact, prefix and substring lookups against a
//! [`RecordSource`] field by field, annotating every hit with a suffix that
//! names the field it came from. [`project`] merges the rows of joined
//! relations into per-record value tuples and [`find_duplicates`] groups
//! records that share those tuples.

use std::borrow::Borrow;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod config;
mod duplicates;
mod format;
mod memory;
mod projection;
mod source;
mod strategy;

pub use config::SearchConfig;
pub use duplicates::{find_duplicates, find_duplicates_with_display, DuplicateGroup};
pub use format::{
    append_suffix, reorder, separator_label, suffix_for, suffix_key, SuffixTable,
    DEFAULT_SEPARATOR_TEMPLATE, DEFAULT_SEPARATOR_WIDTH,
};
pub use memory::InMemorySource;
pub use projection::{project, FieldValues, ProjectOptions, ProjectionMap, RecordValues};
pub use source::{LabelSource, Lookup, ProjectionRow, RecordSource};
pub use strategy::{
    BaseSearch, NameFieldSearch, PrimaryFieldsSearch, SearchStrategy, StrategyKind,
    ValuesDictSearch,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum SearchError {
    #[error("invalid field path `{0}`")]
    InvalidFieldPath(String),
    #[error("cannot resolve field `{path}`: {reason}")]
    FieldResolution { path: String, reason: String },
    #[error("no usable name field: {0}")]
    AmbiguousPrimaryField(String),
    #[error("record id {0} is reserved")]
    ReservedRecordId(i64),
    #[error("storage error: {0}")]
    Storage(String),
}

impl SearchError {
    pub fn unresolved(path: &FieldPath, reason: impl Into<String>) -> Self {
        Self::FieldResolution { path: path.to_string(), reason: reason.into() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl RecordId {
    /// Id of the synthetic row separating strong from weak hits. No stored
    /// record may use it.
    pub const SEPARATOR: Self = Self(0);

    #[must_use]
    pub fn is_separator(self) -> bool {
        self == Self::SEPARATOR
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dot-separated address of a value, either a column of the record itself
/// (`band_name`) or one reached through relations (`bandalias.alias`).
///
/// Only the syntax is checked here. Whether a path resolves is up to the
/// [`RecordSource`] that receives it.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath(String);

impl FieldPath {
    pub const SEPARATOR: char = '.';

    /// Validate and wrap a dotted field path.
    ///
    /// # Errors
    /// Returns [`SearchError::InvalidFieldPath`] when a segment is empty or
    /// contains anything but ASCII letters, digits and underscores.
    pub fn parse(raw: &str) -> Result<Self, SearchError> {
        let valid = !raw.is_empty()
            && raw.split(Self::SEPARATOR).all(|segment| {
                !segment.is_empty()
                    && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            });
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(SearchError::InvalidFieldPath(raw.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(Self::SEPARATOR)
    }

    /// True when the path traverses at least one relation.
    #[must_use]
    pub fn is_relational(&self) -> bool {
        self.0.contains(Self::SEPARATOR)
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FieldPath {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = SearchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(value: FieldPath) -> Self {
        value.0
    }
}

impl Borrow<str> for FieldPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Comparison tier. Every operator compares trimmed, lower-cased text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Exact,
    Prefix,
    Contains,
}

impl Operator {
    /// Tiers in the order a search runs them.
    pub const TIERS: [Self; 3] = [Self::Exact, Self::Prefix, Self::Contains];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Prefix => "prefix",
            Self::Contains => "contains",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "exact" => Some(Self::Exact),
            "prefix" => Some(Self::Prefix),
            "contains" => Some(Self::Contains),
            _ => None,
        }
    }

    /// Compare an already cleaned stored value against an already cleaned term.
    #[must_use]
    pub fn matches(self, value: &str, term: &str) -> bool {
        match self {
            Self::Exact => value == term,
            Self::Prefix => value.starts_with(term),
            Self::Contains => value.contains(term),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl Value {
    /// Null and the empty string never count as a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(text) => text.is_empty(),
            Self::Bool(_) | Self::Integer(_) => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Text,
    Integer,
    Bool,
    Date,
}

impl ValueType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Bool => "bool",
            Self::Date => "date",
        }
    }
}

/// What a source knows about a field path without running a query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct FieldInfo {
    pub value_type: ValueType,
    /// The path crosses a one-to-many or many-to-many relation, so a record
    /// can carry any number of values for it.
    pub to_many: bool,
}

impl FieldInfo {
    #[must_use]
    pub fn scalar(value_type: ValueType) -> Self {
        Self { value_type, to_many: false }
    }

    #[must_use]
    pub fn to_many(value_type: ValueType) -> Self {
        Self { value_type, to_many: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ResultItem {
    pub record_id: RecordId,
    pub label: String,
    pub is_separator: bool,
}

impl ResultItem {
    #[must_use]
    pub fn record(record_id: RecordId, label: String) -> Self {
        Self { record_id, label, is_separator: false }
    }

    #[must_use]
    pub fn separator(label: String) -> Self {
        Self { record_id: RecordId::SEPARATOR, label, is_separator: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct SearchOutcome {
    pub results: Vec<ResultItem>,
    pub exact_match: bool,
}

impl SearchOutcome {
    /// Ids of all non-separator results, in result order.
    #[must_use]
    pub fn record_ids(&self) -> Vec<RecordId> {
        self.results.iter().filter(|item| !item.is_separator).map(|item| item.record_id).collect()
    }
}

/// Trim and lower-case a string for case-insensitive comparison.
#[must_use]
pub fn clean_string(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Clean a search term for comparison against a field of the given type.
///
/// Terms aimed at date fields are rewritten from `dd.mm.yyyy`, `mm.yyyy` or
/// `dd-mm-yyyy` into the stored `yyyy-mm-dd` form, so that partial dates still
/// work with prefix and substring lookups.
#[must_use]
pub fn clean_query(query: &str, value_type: Option<ValueType>) -> String {
    let cleaned = clean_string(query);
    if value_type == Some(ValueType::Date) {
        normalize_date_term(&cleaned)
    } else {
        cleaned
    }
}

fn normalize_date_term(term: &str) -> String {
    if term.contains('.') {
        return term.split('.').rev().map(zero_pad).collect::<Vec<_>>().join("-");
    }
    if term.contains('-') {
        let parts = term.split('-').collect::<Vec<_>>();
        let day_first = parts.len() > 1
            && parts[0].len() <= 2
            && parts.last().is_some_and(|year| year.len() == 4);
        if day_first {
            return parts.into_iter().rev().map(zero_pad).collect::<Vec<_>>().join("-");
        }
        return parts.into_iter().map(zero_pad).collect::<Vec<_>>().join("-");
    }
    term.to_string()
}

fn zero_pad(bit: &str) -> String {
    format!("{bit:0>2}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> FieldPath {
        match FieldPath::parse(raw) {
            Ok(path) => path,
            Err(err) => panic!("fixture path {raw} should parse: {err}"),
        }
    }

    #[test]
    fn field_path_accepts_dotted_identifiers() {
        let alias = path("bandalias.alias");
        assert!(alias.is_relational());
        assert_eq!(alias.segments().collect::<Vec<_>>(), vec!["bandalias", "alias"]);
        assert!(!path("band_name").is_relational());
    }

    #[test]
    fn field_path_rejects_malformed_input() {
        for raw in ["", ".alias", "band..name", "band name", "band-name", "alias."] {
            assert_eq!(
                FieldPath::parse(raw),
                Err(SearchError::InvalidFieldPath(raw.to_string())),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn field_path_deserializes_with_validation() {
        let parsed: Result<FieldPath, _> = serde_json::from_str("\"musiker.kuenstler_name\"");
        assert!(parsed.is_ok());
        let rejected: Result<FieldPath, _> = serde_json::from_str("\"musiker kuenstler\"");
        assert!(rejected.is_err());
    }

    #[test]
    fn operator_matches_follow_tier_semantics() {
        assert!(Operator::Exact.matches("ac/dc", "ac/dc"));
        assert!(!Operator::Exact.matches("ac/dc", "ac"));
        assert!(Operator::Prefix.matches("ac/dc", "ac"));
        assert!(!Operator::Prefix.matches("ac/dc", "dc"));
        assert!(Operator::Contains.matches("ac/dc", "c/d"));
    }

    #[test]
    fn empty_values_are_null_and_empty_text_only() {
        assert!(Value::Null.is_empty());
        assert!(Value::from("").is_empty());
        assert!(!Value::from(" ").is_empty());
        assert!(!Value::from(0).is_empty());
        assert!(!Value::from(false).is_empty());
    }

    #[test]
    fn clean_query_trims_and_lowercases() {
        assert_eq!(clean_query("  Guns 'N Roses ", Some(ValueType::Text)), "guns 'n roses");
        assert_eq!(clean_query("15.08.1986", Some(ValueType::Text)), "15.08.1986");
    }

    #[test]
    fn clean_query_rewrites_date_literals() {
        let cases = [
            ("15.08.1986", "1986-08-15"),
            ("5.8.1986", "1986-08-05"),
            ("08.1986", "1986-08"),
            ("15-08-1986", "1986-08-15"),
            ("1986-8-5", "1986-08-05"),
            ("1986-08", "1986-08"),
            ("1986", "1986"),
        ];
        for (input, expected) in cases {
            assert_eq!(clean_query(input, Some(ValueType::Date)), expected, "input {input}");
        }
    }

    #[test]
    fn separator_record_id_is_zero() {
        assert!(RecordId(0).is_separator());
        assert!(!RecordId(1).is_separator());
        let item = ResultItem::separator("---".to_string());
        assert!(item.is_separator);
        assert_eq!(item.record_id, RecordId::SEPARATOR);
    }
}
