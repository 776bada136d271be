use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{FieldInfo, FieldPath, Operator, RecordId, SearchError, Value};

/// A single comparison: stored values of `field` against `value` with `operator`.
///
/// `value` is expected to be cleaned already (see [`crate::clean_query`]).
/// Sources compare it against their stored values after trimming and
/// lower-casing them the same way.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Lookup {
    pub field: FieldPath,
    pub operator: Operator,
    pub value: String,
}

impl Lookup {
    #[must_use]
    pub fn new(field: FieldPath, operator: Operator, value: impl Into<String>) -> Self {
        Self { field, operator, value: value.into() }
    }
}

/// Where the label of a fetched record comes from.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    /// The record's generic description, as [`RecordSource::describe`] returns it.
    Describe,
    /// The first value of a designated display field.
    Field(FieldPath),
}

/// One raw projection row. Joins through to-many relations yield several rows
/// per record; `values` lines up with the requested fields.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ProjectionRow {
    pub id: RecordId,
    pub values: Vec<Value>,
}

/// Read access to one record type of an external store.
///
/// Every method returns records in the source's natural order. Field paths
/// are resolved lazily: an unknown path fails with
/// [`SearchError::FieldResolution`] the first time it is queried.
pub trait RecordSource {
    /// Fetch `(id, label)` pairs for the records matching `lookup`, at most one
    /// per record, leaving out every id in `exclude`.
    ///
    /// # Errors
    /// Returns [`SearchError::FieldResolution`] for unknown paths or operators
    /// the field type does not support, and [`SearchError::Storage`] when the
    /// backend fails.
    fn fetch(
        &self,
        lookup: &Lookup,
        label: &LabelSource,
        exclude: &BTreeSet<RecordId>,
    ) -> Result<Vec<(RecordId, String)>, SearchError>;

    /// Return raw rows for `fields`, restricted to records matching any of the
    /// `filter` lookups when a filter is given.
    ///
    /// # Errors
    /// Same as [`RecordSource::fetch`].
    fn project(
        &self,
        fields: &[FieldPath],
        filter: Option<&[Lookup]>,
    ) -> Result<Vec<ProjectionRow>, SearchError>;

    /// # Errors
    /// Returns [`SearchError::Storage`] when the backend fails.
    fn natural_order(&self) -> Result<Vec<RecordId>, SearchError>;

    /// # Errors
    /// Returns [`SearchError::Storage`] when the record cannot be read.
    fn describe(&self, id: RecordId) -> Result<String, SearchError>;

    /// Static information about a path, `None` when the path does not resolve.
    fn field_info(&self, field: &FieldPath) -> Option<FieldInfo>;

    /// Every record with its label, in natural order.
    ///
    /// # Errors
    /// Propagates errors of the underlying calls.
    fn list(&self, label: &LabelSource) -> Result<Vec<(RecordId, String)>, SearchError> {
        match label {
            LabelSource::Describe => self
                .natural_order()?
                .into_iter()
                .map(|id| Ok((id, self.describe(id)?)))
                .collect(),
            LabelSource::Field(field) => {
                let mut seen = BTreeSet::new();
                let mut listed = Vec::new();
                for row in self.project(std::slice::from_ref(field), None)? {
                    if seen.insert(row.id) {
                        let label =
                            row.values.into_iter().next().map(|value| value.to_string());
                        listed.push((row.id, label.unwrap_or_default()));
                    }
                }
                Ok(listed)
            }
        }
    }
}

impl<T: RecordSource + ?Sized> RecordSource for &T {
    fn fetch(
        &self,
        lookup: &Lookup,
        label: &LabelSource,
        exclude: &BTreeSet<RecordId>,
    ) -> Result<Vec<(RecordId, String)>, SearchError> {
        (**self).fetch(lookup, label, exclude)
    }

    fn project(
        &self,
        fields: &[FieldPath],
        filter: Option<&[Lookup]>,
    ) -> Result<Vec<ProjectionRow>, SearchError> {
        (**self).project(fields, filter)
    }

    fn natural_order(&self) -> Result<Vec<RecordId>, SearchError> {
        (**self).natural_order()
    }

    fn describe(&self, id: RecordId) -> Result<String, SearchError> {
        (**self).describe(id)
    }

    fn field_info(&self, field: &FieldPath) -> Option<FieldInfo> {
        (**self).field_info(field)
    }

    fn list(&self, label: &LabelSource) -> Result<Vec<(RecordId, String)>, SearchError> {
        (**self).list(label)
    }
}
