use std::collections::{BTreeMap, BTreeSet};

use crate::{
    clean_string, FieldInfo, FieldPath, LabelSource, Lookup, Operator, ProjectionRow, RecordId,
    RecordSource, SearchError, Value, ValueType,
};

/// A [`RecordSource`] over records held in memory.
///
/// Fields must be declared before records use them. Projecting several
/// multi-valued fields at once yields the cross product of their values,
/// the same row shape a SQL join through to-many relations produces.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    fields: BTreeMap<FieldPath, FieldInfo>,
    records: Vec<StoredRecord>,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    id: RecordId,
    description: String,
    values: BTreeMap<FieldPath, Vec<Value>>,
}

impl InMemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a searchable field.
    ///
    /// # Errors
    /// Returns [`SearchError::InvalidFieldPath`] for a malformed path.
    pub fn with_field(mut self, path: &str, info: FieldInfo) -> Result<Self, SearchError> {
        self.fields.insert(FieldPath::parse(path)?, info);
        Ok(self)
    }

    /// Append a record. Records keep insertion order as their natural order.
    ///
    /// # Errors
    /// Returns [`SearchError::ReservedRecordId`] for id 0 and
    /// [`SearchError::FieldResolution`] for undeclared fields.
    pub fn insert(
        &mut self,
        id: i64,
        description: &str,
        values: &[(&str, Vec<Value>)],
    ) -> Result<(), SearchError> {
        let id = RecordId(id);
        if id.is_separator() {
            return Err(SearchError::ReservedRecordId(id.0));
        }
        let mut stored = BTreeMap::new();
        for (raw, field_values) in values {
            let field = FieldPath::parse(raw)?;
            if !self.fields.contains_key(&field) {
                return Err(SearchError::unresolved(&field, "field is not declared"));
            }
            stored.insert(field, field_values.clone());
        }
        self.records.retain(|record| record.id != id);
        self.records.push(StoredRecord { id, description: description.to_string(), values: stored });
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn resolve(&self, field: &FieldPath) -> Result<FieldInfo, SearchError> {
        self.fields
            .get(field)
            .copied()
            .ok_or_else(|| SearchError::unresolved(field, "field is not declared"))
    }

    fn check_lookup(&self, lookup: &Lookup) -> Result<(), SearchError> {
        let info = self.resolve(&lookup.field)?;
        if info.value_type == ValueType::Bool && lookup.operator != Operator::Exact {
            return Err(SearchError::unresolved(
                &lookup.field,
                format!("operator {} is not supported for bool fields", lookup.operator.as_str()),
            ));
        }
        Ok(())
    }

    fn values_of<'a>(record: &'a StoredRecord, field: &FieldPath) -> &'a [Value] {
        record.values.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    fn matches(record: &StoredRecord, lookup: &Lookup) -> bool {
        Self::values_of(record, &lookup.field).iter().any(|value| {
            !matches!(value, Value::Null)
                && lookup.operator.matches(&clean_string(&value.to_string()), &lookup.value)
        })
    }

    fn label_of(record: &StoredRecord, label: &LabelSource) -> String {
        match label {
            LabelSource::Describe => record.description.clone(),
            LabelSource::Field(field) => Self::values_of(record, field)
                .first()
                .map(ToString::to_string)
                .unwrap_or_default(),
        }
    }
}

impl RecordSource for InMemorySource {
    fn fetch(
        &self,
        lookup: &Lookup,
        label: &LabelSource,
        exclude: &BTreeSet<RecordId>,
    ) -> Result<Vec<(RecordId, String)>, SearchError> {
        self.check_lookup(lookup)?;
        if let LabelSource::Field(field) = label {
            self.resolve(field)?;
        }
        Ok(self
            .records
            .iter()
            .filter(|record| !exclude.contains(&record.id) && Self::matches(record, lookup))
            .map(|record| (record.id, Self::label_of(record, label)))
            .collect())
    }

    fn project(
        &self,
        fields: &[FieldPath],
        filter: Option<&[Lookup]>,
    ) -> Result<Vec<ProjectionRow>, SearchError> {
        for field in fields {
            self.resolve(field)?;
        }
        if let Some(lookups) = filter {
            for lookup in lookups {
                self.check_lookup(lookup)?;
            }
        }

        let mut rows = Vec::new();
        for record in &self.records {
            if let Some(lookups) = filter {
                if !lookups.iter().any(|lookup| Self::matches(record, lookup)) {
                    continue;
                }
            }
            let mut combinations: Vec<Vec<Value>> = vec![Vec::new()];
            for field in fields {
                let values = Self::values_of(record, field);
                let column: Vec<Value> =
                    if values.is_empty() { vec![Value::Null] } else { values.to_vec() };
                combinations = combinations
                    .into_iter()
                    .flat_map(|prefix| {
                        column.iter().map(move |value| {
                            let mut row = prefix.clone();
                            row.push(value.clone());
                            row
                        })
                    })
                    .collect();
            }
            rows.extend(
                combinations.into_iter().map(|values| ProjectionRow { id: record.id, values }),
            );
        }
        Ok(rows)
    }

    fn natural_order(&self) -> Result<Vec<RecordId>, SearchError> {
        Ok(self.records.iter().map(|record| record.id).collect())
    }

    fn describe(&self, id: RecordId) -> Result<String, SearchError> {
        self.records
            .iter()
            .find(|record| record.id == id)
            .map(|record| record.description.clone())
            .ok_or_else(|| SearchError::Storage(format!("record {id} does not exist")))
    }

    fn field_info(&self, field: &FieldPath) -> Option<FieldInfo> {
        self.fields.get(field).copied()
    }
}
