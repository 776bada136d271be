use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;

use crate::{FieldPath, Lookup, RecordId, RecordSource, SearchError, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectOptions {
    /// Keep null and empty-string values instead of dropping them.
    pub include_empty: bool,
    /// Collapse single values of fields that cannot hold more than one value.
    pub flatten: bool,
}

/// The distinct values a record holds for one field, in order of first appearance.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(untagged)]
pub enum FieldValues {
    One(Value),
    Many(Vec<Value>),
}

impl FieldValues {
    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        match self {
            Self::One(value) => std::slice::from_ref(value),
            Self::Many(values) => values,
        }
    }

    #[must_use]
    pub fn first(&self) -> Option<&Value> {
        self.as_slice().first()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<Value> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

pub type RecordValues = BTreeMap<FieldPath, FieldValues>;

/// Per-record field values, keyed by record id and kept in the order the
/// source returned the records.
#[derive(Debug, Clone, Default)]
pub struct ProjectionMap {
    order: Vec<RecordId>,
    records: BTreeMap<RecordId, RecordValues>,
}

impl ProjectionMap {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&RecordValues> {
        self.records.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.records.contains_key(&id)
    }

    /// Take a record out of the map. Later iterations skip it.
    pub fn remove(&mut self, id: RecordId) -> Option<RecordValues> {
        self.records.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &RecordValues)> {
        self.order.iter().filter_map(|id| self.records.get(id).map(|values| (*id, values)))
    }

    pub fn ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.iter().map(|(id, _)| id)
    }

    fn entry(&mut self, id: RecordId) -> &mut RecordValues {
        if !self.records.contains_key(&id) {
            self.order.push(id);
        }
        self.records.entry(id).or_default()
    }
}

impl PartialEq for ProjectionMap {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for ProjectionMap {}

impl Serialize for ProjectionMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (id, values) in self.iter() {
            map.serialize_entry(&id, values)?;
        }
        map.end()
    }
}

/// Fetch `fields` for every record of `source` (or those matching any of the
/// `filter` lookups) and merge the rows of each record.
///
/// Rows produced by to-many joins are folded into one deduplicated tuple per
/// field. Without `include_empty`, null and empty values are dropped and a
/// field left without values is omitted for that record; the record itself
/// stays in the map. With `flatten`, a field holding exactly one value becomes
/// [`FieldValues::One`] unless the source reports it as to-many.
///
/// # Errors
/// Propagates the source's errors, most notably
/// [`SearchError::FieldResolution`] for paths the source cannot resolve.
pub fn project<S: RecordSource + ?Sized>(
    source: &S,
    fields: &[FieldPath],
    options: ProjectOptions,
    filter: Option<&[Lookup]>,
) -> Result<ProjectionMap, SearchError> {
    let rows = source.project(fields, filter)?;
    let row_count = rows.len();

    let mut merged: Vec<(RecordId, BTreeMap<FieldPath, Vec<Value>>)> = Vec::new();
    let mut positions: BTreeMap<RecordId, usize> = BTreeMap::new();
    for row in rows {
        let position = *positions.entry(row.id).or_insert_with(|| {
            merged.push((row.id, BTreeMap::new()));
            merged.len() - 1
        });
        let record = &mut merged[position].1;
        for (field, value) in fields.iter().zip(row.values) {
            if !options.include_empty && value.is_empty() {
                continue;
            }
            let values = record.entry(field.clone()).or_default();
            if !values.contains(&value) {
                values.push(value);
            }
        }
    }

    let to_many = fields
        .iter()
        .filter(|field| source.field_info(field).is_some_and(|info| info.to_many))
        .collect::<Vec<_>>();

    let mut projection = ProjectionMap::default();
    for (id, record) in merged {
        let entry = projection.entry(id);
        for (field, values) in record {
            let collapse = options.flatten && values.len() == 1 && !to_many.contains(&&field);
            let values = if collapse {
                FieldValues::One(values.into_iter().next().unwrap_or(Value::Null))
            } else {
                FieldValues::Many(values)
            };
            entry.insert(field, values);
        }
    }

    tracing::debug!(
        "projected {} rows into {} records over {} fields",
        row_count,
        projection.len(),
        fields.len()
    );
    Ok(projection)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{FieldInfo, InMemorySource, Operator, ValueType};

    fn path(raw: &str) -> FieldPath {
        match FieldPath::parse(raw) {
            Ok(path) => path,
            Err(err) => panic!("fixture path {raw} should parse: {err}"),
        }
    }

    fn bands() -> InMemorySource {
        let source = InMemorySource::new()
            .with_field("band_name", FieldInfo::scalar(ValueType::Text))
            .and_then(|source| source.with_field("beschreibung", FieldInfo::scalar(ValueType::Text)))
            .and_then(|source| {
                source.with_field("bandalias.alias", FieldInfo::to_many(ValueType::Text))
            })
            .and_then(|source| {
                source.with_field("musiker.kuenstler_name", FieldInfo::to_many(ValueType::Text))
            });
        let mut source = match source {
            Ok(source) => source,
            Err(err) => panic!("fixture source should build: {err}"),
        };
        let records: [(i64, &str, Vec<(&str, Vec<Value>)>); 3] = [
            (
                1,
                "Guns 'N Roses",
                vec![
                    ("band_name", vec!["Guns 'N Roses".into()]),
                    ("bandalias.alias", vec!["Guns and Roses".into(), "GNR".into()]),
                    ("musiker.kuenstler_name", vec!["Axl".into(), "Slash".into()]),
                ],
            ),
            (
                2,
                "AC/DC",
                vec![
                    ("band_name", vec!["AC/DC".into()]),
                    ("beschreibung", vec!["".into()]),
                    ("bandalias.alias", vec!["ACDC".into()]),
                ],
            ),
            (3, "Rolling Stones", vec![("band_name", vec!["Rolling Stones".into()])]),
        ];
        for (id, description, values) in records {
            if let Err(err) = source.insert(id, description, &values) {
                panic!("fixture record {id} should insert: {err}");
            }
        }
        source
    }

    fn project_ok(
        source: &InMemorySource,
        fields: &[FieldPath],
        options: ProjectOptions,
    ) -> ProjectionMap {
        match project(source, fields, options, None) {
            Ok(projection) => projection,
            Err(err) => panic!("projection should succeed: {err}"),
        }
    }

    #[test]
    fn merges_joined_rows_into_distinct_values() {
        let source = bands();
        let fields = [path("band_name"), path("bandalias.alias"), path("musiker.kuenstler_name")];
        let projection = project_ok(&source, &fields, ProjectOptions::default());

        assert_eq!(projection.ids().collect::<Vec<_>>(), vec![RecordId(1), RecordId(2), RecordId(3)]);
        let Some(guns) = projection.get(RecordId(1)) else {
            panic!("record 1 should be projected");
        };
        assert_eq!(
            guns.get("bandalias.alias"),
            Some(&FieldValues::Many(vec!["Guns and Roses".into(), "GNR".into()]))
        );
        assert_eq!(
            guns.get("musiker.kuenstler_name"),
            Some(&FieldValues::Many(vec!["Axl".into(), "Slash".into()]))
        );
        assert_eq!(guns.get("band_name"), Some(&FieldValues::Many(vec!["Guns 'N Roses".into()])));
    }

    #[test]
    fn empty_values_are_dropped_but_records_stay() {
        let source = bands();
        let fields = [path("beschreibung"), path("bandalias.alias")];
        let projection = project_ok(&source, &fields, ProjectOptions::default());

        let Some(stones) = projection.get(RecordId(3)) else {
            panic!("record without values should still be projected");
        };
        assert!(stones.is_empty());
        let Some(acdc) = projection.get(RecordId(2)) else {
            panic!("record 2 should be projected");
        };
        assert!(acdc.get("beschreibung").is_none());
    }

    #[test]
    fn include_empty_keeps_null_and_empty_values() {
        let source = bands();
        let fields = [path("beschreibung")];
        let options = ProjectOptions { include_empty: true, flatten: false };
        let projection = project_ok(&source, &fields, options);

        assert_eq!(
            projection.get(RecordId(2)).and_then(|values| values.get("beschreibung")),
            Some(&FieldValues::Many(vec![Value::from("")]))
        );
        assert_eq!(
            projection.get(RecordId(3)).and_then(|values| values.get("beschreibung")),
            Some(&FieldValues::Many(vec![Value::Null]))
        );
    }

    #[test]
    fn flatten_collapses_only_scalar_fields() {
        let source = bands();
        let fields = [path("band_name"), path("bandalias.alias")];
        let options = ProjectOptions { include_empty: false, flatten: true };
        let projection = project_ok(&source, &fields, options);

        let Some(acdc) = projection.get(RecordId(2)) else {
            panic!("record 2 should be projected");
        };
        assert_eq!(acdc.get("band_name"), Some(&FieldValues::One("AC/DC".into())));
        // A single alias still comes back as a tuple: more related rows may appear.
        assert_eq!(acdc.get("bandalias.alias"), Some(&FieldValues::Many(vec!["ACDC".into()])));
    }

    #[test]
    fn filter_restricts_projected_records() {
        let source = bands();
        let filter = [Lookup::new(path("bandalias.alias"), Operator::Contains, "roses")];
        let projection = match project(&source, &[path("band_name")], ProjectOptions::default(), Some(&filter)) {
            Ok(projection) => projection,
            Err(err) => panic!("filtered projection should succeed: {err}"),
        };
        assert_eq!(projection.ids().collect::<Vec<_>>(), vec![RecordId(1)]);
    }

    #[test]
    fn unknown_fields_surface_as_resolution_errors() {
        let source = bands();
        let result = project(&source, &[path("band_name.nope")], ProjectOptions::default(), None);
        assert!(matches!(result, Err(SearchError::FieldResolution { .. })));
    }

    #[test]
    fn removed_records_disappear_from_iteration() {
        let source = bands();
        let mut projection = project_ok(&source, &[path("band_name")], ProjectOptions::default());
        assert!(projection.remove(RecordId(2)).is_some());
        assert_eq!(projection.ids().collect::<Vec<_>>(), vec![RecordId(1), RecordId(3)]);
        assert!(!projection.contains(RecordId(2)));
        assert_eq!(projection.len(), 2);
    }

    proptest! {
        #[test]
        fn property_projection_is_idempotent(include_empty in any::<bool>(), flatten in any::<bool>()) {
            let source = bands();
            let fields = [path("band_name"), path("beschreibung"), path("bandalias.alias")];
            let options = ProjectOptions { include_empty, flatten };
            let first = project(&source, &fields, options, None);
            let second = project(&source, &fields, options, None);
            prop_assert!(first.is_ok());
            prop_assert_eq!(first, second);
        }
    }
}
