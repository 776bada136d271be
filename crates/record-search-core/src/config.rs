use serde::{Deserialize, Serialize};

use crate::format::{SuffixTable, DEFAULT_SEPARATOR_TEMPLATE, DEFAULT_SEPARATOR_WIDTH};
use crate::FieldPath;

/// Search metadata attached to one record type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    /// Fields searched, in priority order.
    pub search_fields: Vec<FieldPath>,
    /// Fields whose hits count as strong. Empty means every search field.
    pub primary_search_fields: Vec<FieldPath>,
    /// Field providing result labels instead of the record description.
    pub name_field: Option<FieldPath>,
    pub suffixes: SuffixTable,
    pub use_suffix: bool,
    pub use_separator: bool,
    pub separator_template: String,
    pub separator_width: usize,
    /// Fetch candidate values once and match in memory.
    pub in_memory: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            search_fields: Vec::new(),
            primary_search_fields: Vec::new(),
            name_field: None,
            suffixes: SuffixTable::new(),
            use_suffix: true,
            use_separator: true,
            separator_template: DEFAULT_SEPARATOR_TEMPLATE.to_string(),
            separator_width: DEFAULT_SEPARATOR_WIDTH,
            in_memory: false,
        }
    }
}

impl SearchConfig {
    #[must_use]
    pub fn new(search_fields: Vec<FieldPath>) -> Self {
        Self { search_fields, ..Self::default() }
    }

    #[must_use]
    pub fn with_primary(mut self, primary_search_fields: Vec<FieldPath>) -> Self {
        self.primary_search_fields = primary_search_fields;
        self
    }

    #[must_use]
    pub fn with_name_field(mut self, name_field: FieldPath) -> Self {
        self.name_field = Some(name_field);
        self
    }

    #[must_use]
    pub fn with_suffix(mut self, key: &str, label: &str) -> Self {
        self.suffixes.insert(key.to_string(), label.to_string());
        self
    }

    #[must_use]
    pub fn in_memory(mut self, in_memory: bool) -> Self {
        self.in_memory = in_memory;
        self
    }

    /// Primary fields as searched: the declared ones, or all search fields
    /// when none are declared.
    #[must_use]
    pub fn effective_primary(&self) -> Vec<FieldPath> {
        if self.primary_search_fields.is_empty() {
            self.search_fields.clone()
        } else {
            self.primary_search_fields.clone()
        }
    }

    /// Search fields that are not primary, in declaration order.
    #[must_use]
    pub fn secondary_search_fields(&self) -> Vec<FieldPath> {
        let primary = self.effective_primary();
        self.search_fields.iter().filter(|field| !primary.contains(field)).cloned().collect()
    }
}
