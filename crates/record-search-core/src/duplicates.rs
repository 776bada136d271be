use std::collections::BTreeMap;

use serde::Serialize;

use crate::projection::{project, ProjectOptions};
use crate::{FieldPath, RecordId, RecordSource, SearchError, Value};

/// Grouping field values of one record, in grouping field order.
type GroupKey = Vec<(FieldPath, Vec<Value>)>;

/// Records sharing the same non-empty values across the grouping fields.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct DuplicateGroup {
    /// Member ids in the source's natural order. Always at least two.
    pub members: Vec<RecordId>,
    /// The shared values, per grouping field. Fields every member leaves
    /// empty are absent.
    pub shared_values: BTreeMap<FieldPath, Vec<Value>>,
    /// Extra values shown alongside each member; they play no part in grouping.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub display_values: BTreeMap<RecordId, BTreeMap<FieldPath, Vec<Value>>>,
}

/// Group the records of `source` that hold identical values in `fields`.
///
/// # Errors
/// Propagates the source's errors unchanged.
pub fn find_duplicates<S: RecordSource + ?Sized>(
    source: &S,
    fields: &[FieldPath],
) -> Result<Vec<DuplicateGroup>, SearchError> {
    find_duplicates_with_display(source, fields, &[])
}

/// Like [`find_duplicates`], also collecting `display_fields` for every member.
///
/// Two records are duplicates when every grouping field holds the same
/// value tuple for both, a field left empty by both counting as equal.
/// Records with all grouping fields empty never group. Groups come out in
/// order of their first member.
///
/// # Errors
/// Propagates the source's errors unchanged.
pub fn find_duplicates_with_display<S: RecordSource + ?Sized>(
    source: &S,
    fields: &[FieldPath],
    display_fields: &[FieldPath],
) -> Result<Vec<DuplicateGroup>, SearchError> {
    let mut grouping: Vec<FieldPath> = Vec::new();
    for field in fields {
        if !grouping.contains(field) {
            grouping.push(field.clone());
        }
    }
    let display = display_fields
        .iter()
        .filter(|field| !grouping.contains(field))
        .cloned()
        .collect::<Vec<_>>();
    let mut projected = grouping.clone();
    for field in &display {
        if !projected.contains(field) {
            projected.push(field.clone());
        }
    }

    let projection = project(source, &projected, ProjectOptions::default(), None)?;

    let mut buckets: Vec<(GroupKey, Vec<RecordId>)> = Vec::new();
    let mut positions: BTreeMap<GroupKey, usize> = BTreeMap::new();
    for (id, record) in projection.iter() {
        let key = grouping
            .iter()
            .filter_map(|field| {
                record.get(field).map(|values| (field.clone(), values.as_slice().to_vec()))
            })
            .collect::<GroupKey>();
        if key.is_empty() {
            continue;
        }
        match positions.get(&key) {
            Some(position) => buckets[*position].1.push(id),
            None => {
                positions.insert(key.clone(), buckets.len());
                buckets.push((key, vec![id]));
            }
        }
    }

    let groups = buckets
        .into_iter()
        .filter(|(_, members)| members.len() >= 2)
        .map(|(key, members)| {
            let display_values = if display.is_empty() {
                BTreeMap::new()
            } else {
                members
                    .iter()
                    .map(|id| {
                        let values = projection
                            .get(*id)
                            .map(|record| {
                                display
                                    .iter()
                                    .filter_map(|field| {
                                        record
                                            .get(field)
                                            .map(|values| (field.clone(), values.as_slice().to_vec()))
                                    })
                                    .collect()
                            })
                            .unwrap_or_default();
                        (*id, values)
                    })
                    .collect()
            };
            DuplicateGroup { members, shared_values: key.into_iter().collect(), display_values }
        })
        .collect::<Vec<_>>();

    tracing::info!(
        "found {} duplicate groups among {} records over {} fields",
        groups.len(),
        projection.len(),
        grouping.len()
    );
    Ok(groups)
}
