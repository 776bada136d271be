use std::collections::{BTreeMap, HashMap};

use crate::{FieldPath, Operator, RecordId, ResultItem};

pub const DEFAULT_SEPARATOR_TEMPLATE: &str = "weak hits for \"{q}\"";
/// Width of the result box the separator is centred in.
pub const DEFAULT_SEPARATOR_WIDTH: usize = 36;

/// Labels explaining why a record matched, keyed by field path or by
/// `"{field}__{operator}"` for a single tier of that field.
pub type SuffixTable = BTreeMap<String, String>;

#[must_use]
pub fn suffix_key(field: &FieldPath, operator: Operator) -> String {
    format!("{field}__{}", operator.as_str())
}

/// Look up the suffix for hits on `field` with `operator`: the operator
/// specific entry wins over the plain field entry. Empty labels count as absent.
#[must_use]
pub fn suffix_for<'a>(table: &'a SuffixTable, field: &FieldPath, operator: Operator) -> Option<&'a str> {
    table
        .get(&suffix_key(field, operator))
        .or_else(|| table.get(field.as_str()))
        .map(String::as_str)
        .filter(|suffix| !suffix.is_empty())
}

#[must_use]
pub fn append_suffix(label: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) if !suffix.is_empty() => format!("{label} ({suffix})"),
        _ => label.to_string(),
    }
}

/// Build the banner separating strong from weak hits: the template with `{q}`
/// replaced, padded with a space on each side and centred in hyphens.
#[must_use]
pub fn separator_label(template: &str, query: &str, width: usize) -> String {
    let text = format!(" {} ", template.replace("{q}", query).trim());
    format!("{text:-^width$}")
}

/// Stable re-sort of `results` into `natural_order`.
///
/// A separator splits the results into two regions that are sorted
/// independently; the separator stays between them. Ids missing from
/// `natural_order` go last within their region.
#[must_use]
pub fn reorder(mut results: Vec<ResultItem>, natural_order: &[RecordId]) -> Vec<ResultItem> {
    let positions: HashMap<RecordId, usize> =
        natural_order.iter().enumerate().map(|(position, id)| (*id, position)).collect();
    let rank = |item: &ResultItem| positions.get(&item.record_id).copied().unwrap_or(usize::MAX);

    let Some(boundary) = results.iter().position(|item| item.is_separator) else {
        results.sort_by_key(rank);
        return results;
    };

    let mut weak = results.split_off(boundary + 1);
    let separator = results.pop();
    results.sort_by_key(rank);
    weak.sort_by_key(rank);
    results.extend(separator);
    results.extend(weak);
    results
}
