use std::collections::BTreeMap;

use record_search_core::{FieldInfo, FieldPath, SearchConfig, SearchError, ValueType};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid identifier `{name}` in {context}")]
    InvalidIdentifier { context: String, name: String },
    #[error("{context} refers to unknown table `{table}`")]
    UnknownTable { context: String, table: String },
    #[error("{context} refers to unknown column `{column}` of table `{table}`")]
    UnknownColumn { context: String, table: String, column: String },
    #[error("table `{table}` declares `{name}` both as a column and as a relation")]
    NameClash { table: String, name: String },
    #[error("unknown record type `{0}`")]
    UnknownRecordType(String),
    #[error("record type `{record_type}`: {source}")]
    Search {
        record_type: String,
        #[source]
        source: SearchError,
    },
}

/// Declarative description of the searchable part of a database: which
/// tables exist, how they relate, and how each record type is searched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Catalog {
    pub tables: BTreeMap<String, TableDef>,
    #[serde(default)]
    pub record_types: BTreeMap<String, RecordTypeDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TableDef {
    #[serde(default = "default_pk")]
    pub pk: String,
    /// Column used as the record description.
    #[serde(default)]
    pub display: Option<String>,
    /// Natural order as column names, `-` prefixed for descending.
    #[serde(default)]
    pub ordering: Vec<String>,
    #[serde(default)]
    pub columns: BTreeMap<String, ValueType>,
    #[serde(default)]
    pub relations: BTreeMap<String, RelationDef>,
}

fn default_pk() -> String {
    "id".to_string()
}

impl TableDef {
    /// Type of a column; the primary key is always an integer.
    #[must_use]
    pub fn column_type(&self, column: &str) -> Option<ValueType> {
        if column == self.pk {
            Some(ValueType::Integer)
        } else {
            self.columns.get(column).copied()
        }
    }

    /// The ordering as `(column, descending)` pairs, ending with the primary
    /// key so that the order is total.
    #[must_use]
    pub fn order_terms(&self) -> Vec<(&str, bool)> {
        let mut terms = self
            .ordering
            .iter()
            .map(|term| match term.strip_prefix('-') {
                Some(column) => (column, true),
                None => (term.as_str(), false),
            })
            .collect::<Vec<_>>();
        if !terms.iter().any(|(column, _)| *column == self.pk) {
            terms.push((self.pk.as_str(), false));
        }
        terms
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum RelationDef {
    /// `column` of this table holds the target's primary key.
    ManyToOne { column: String, target: String },
    /// `remote_column` of the target table holds this table's primary key.
    OneToMany { target: String, remote_column: String },
    /// Rows of `through` link this table to the target.
    ManyToMany { through: String, source_column: String, target_column: String, target: String },
}

impl RelationDef {
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::ManyToOne { target, .. }
            | Self::OneToMany { target, .. }
            | Self::ManyToMany { target, .. } => target,
        }
    }

    #[must_use]
    pub fn is_to_many(&self) -> bool {
        !matches!(self, Self::ManyToOne { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RecordTypeDef {
    pub table: String,
    #[serde(default)]
    pub search: SearchConfig,
}

/// One relation traversed by a field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Hop<'c> {
    /// Dotted relation chain up to and including this hop.
    pub chain: String,
    pub relation: &'c RelationDef,
    pub from_pk: &'c str,
    pub target: &'c str,
    pub target_pk: &'c str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedField<'c> {
    pub hops: Vec<Hop<'c>>,
    pub column: &'c str,
    pub info: FieldInfo,
}

impl Catalog {
    /// Parse and validate a YAML catalog.
    ///
    /// # Errors
    /// Returns [`CatalogError::Parse`] for malformed YAML and the validation
    /// errors of [`Catalog::validate`].
    pub fn from_yaml_str(raw: &str) -> Result<Self, CatalogError> {
        let catalog: Self = serde_yaml::from_str(raw)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Check identifiers and references, and resolve every field path the
    /// record types search on.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), CatalogError> {
        for (name, table) in &self.tables {
            check_identifier("table names", name)?;
            let context = format!("table `{name}`");
            check_identifier(&context, &table.pk)?;
            for column in table.columns.keys() {
                check_identifier(&context, column)?;
                if table.relations.contains_key(column) {
                    return Err(CatalogError::NameClash { table: name.clone(), name: column.clone() });
                }
            }
            let referenced = table
                .display
                .iter()
                .map(String::as_str)
                .chain(table.order_terms().into_iter().map(|(column, _)| column));
            for column in referenced {
                if table.column_type(column).is_none() {
                    return Err(CatalogError::UnknownColumn {
                        context,
                        table: name.clone(),
                        column: column.to_string(),
                    });
                }
            }

            for (relation_name, relation) in &table.relations {
                let context = format!("relation `{name}.{relation_name}`");
                check_identifier(&context, relation_name)?;
                if !self.tables.contains_key(relation.target()) {
                    return Err(CatalogError::UnknownTable {
                        context,
                        table: relation.target().to_string(),
                    });
                }
                match relation {
                    RelationDef::ManyToOne { column, .. } => check_identifier(&context, column)?,
                    RelationDef::OneToMany { remote_column, .. } => {
                        check_identifier(&context, remote_column)?;
                    }
                    RelationDef::ManyToMany { through, source_column, target_column, .. } => {
                        for identifier in [through, source_column, target_column] {
                            check_identifier(&context, identifier)?;
                        }
                    }
                }
            }
        }

        for (name, record_type) in &self.record_types {
            if !self.tables.contains_key(&record_type.table) {
                return Err(CatalogError::UnknownTable {
                    context: format!("record type `{name}`"),
                    table: record_type.table.clone(),
                });
            }
            let search = &record_type.search;
            let paths = search
                .search_fields
                .iter()
                .chain(&search.primary_search_fields)
                .chain(&search.name_field);
            for path in paths {
                let field = self.resolve(&record_type.table, path).map_err(|source| {
                    CatalogError::Search { record_type: name.clone(), source }
                })?;
                // A name field without declared primary fields becomes the primary field.
                let searched = search.search_fields.contains(path)
                    || search.primary_search_fields.contains(path)
                    || search.primary_search_fields.is_empty();
                if searched && field.info.value_type == ValueType::Bool {
                    return Err(CatalogError::Search {
                        record_type: name.clone(),
                        source: SearchError::unresolved(
                            path,
                            "bool fields support exact lookups only and cannot be searched",
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// # Errors
    /// Returns [`CatalogError::UnknownTable`] for undeclared tables.
    pub fn table(&self, name: &str) -> Result<&TableDef, CatalogError> {
        self.tables.get(name).ok_or_else(|| CatalogError::UnknownTable {
            context: "lookup".to_string(),
            table: name.to_string(),
        })
    }

    /// # Errors
    /// Returns [`CatalogError::UnknownRecordType`] for undeclared record types.
    pub fn record_type(&self, name: &str) -> Result<&RecordTypeDef, CatalogError> {
        self.record_types.get(name).ok_or_else(|| CatalogError::UnknownRecordType(name.to_string()))
    }

    /// Follow `path` from `table` through the declared relations down to a column.
    pub(crate) fn resolve(
        &self,
        table: &str,
        path: &FieldPath,
    ) -> Result<ResolvedField<'_>, SearchError> {
        let (mut current_name, mut current) = self
            .tables
            .get_key_value(table)
            .ok_or_else(|| SearchError::unresolved(path, format!("unknown table `{table}`")))?;
        let segments = path.segments().collect::<Vec<_>>();
        let Some((last, relations)) = segments.split_last() else {
            return Err(SearchError::unresolved(path, "empty path"));
        };

        let mut hops = Vec::new();
        let mut to_many = false;
        for segment in relations {
            let relation = current.relations.get(*segment).ok_or_else(|| {
                SearchError::unresolved(path, format!("`{current_name}` has no relation `{segment}`"))
            })?;
            let (target_name, target) =
                self.tables.get_key_value(relation.target()).ok_or_else(|| {
                    SearchError::unresolved(path, format!("unknown table `{}`", relation.target()))
                })?;
            to_many |= relation.is_to_many();
            let chain = match hops.last() {
                Some(Hop { chain, .. }) => format!("{chain}.{segment}"),
                None => (*segment).to_string(),
            };
            hops.push(Hop {
                chain,
                relation,
                from_pk: current.pk.as_str(),
                target: target_name.as_str(),
                target_pk: target.pk.as_str(),
            });
            current_name = target_name;
            current = target;
        }

        if current.relations.contains_key(*last) {
            return Err(SearchError::unresolved(
                path,
                format!("`{last}` is a relation of `{current_name}`, not a column"),
            ));
        }
        let column = if *last == current.pk {
            current.pk.as_str()
        } else {
            current.columns.get_key_value(*last).map(|(column, _)| column.as_str()).ok_or_else(
                || SearchError::unresolved(path, format!("`{current_name}` has no column `{last}`")),
            )?
        };
        let value_type = current.column_type(column).unwrap_or(ValueType::Text);
        Ok(ResolvedField { hops, column, info: FieldInfo { value_type, to_many } })
    }
}

fn check_identifier(context: &str, name: &str) -> Result<(), CatalogError> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CatalogError::InvalidIdentifier { context: context.to_string(), name: name.to_string() })
    }
}
