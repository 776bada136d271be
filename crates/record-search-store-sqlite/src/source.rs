use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use record_search_core::{
    FieldInfo, FieldPath, LabelSource, Lookup, Operator, ProjectionRow, RecordId, RecordSource,
    SearchError, Value, ValueType,
};
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection};

use crate::catalog::{Catalog, RelationDef, ResolvedField, TableDef};
use crate::SEARCH_FOLD_FUNCTION;

/// Records of one catalog table, searched through its declared relations.
///
/// Field paths become chains of `LEFT JOIN`s; paths sharing a relation
/// prefix share the join. Comparisons run on [`SEARCH_FOLD_FUNCTION`] of the
/// column, so the database folds exactly like the in-memory matcher.
#[derive(Debug)]
pub struct SqliteRecordSource<'a> {
    conn: &'a Connection,
    catalog: &'a Catalog,
    table: String,
}

enum Restriction<'r> {
    All,
    Matching(&'r [Lookup]),
    Ids(&'r [RecordId]),
}

impl<'a> SqliteRecordSource<'a> {
    pub(crate) fn new(conn: &'a Connection, catalog: &'a Catalog, table: &str) -> Self {
        Self { conn, catalog, table: table.to_string() }
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    fn table_def(&self) -> Result<&'a TableDef, SearchError> {
        self.catalog
            .tables
            .get(&self.table)
            .ok_or_else(|| SearchError::Storage(format!("table {} is not in the catalog", self.table)))
    }

    fn resolve(&self, field: &FieldPath) -> Result<ResolvedField<'a>, SearchError> {
        self.catalog.resolve(&self.table, field)
    }

    fn lookup_condition(&self, plan: &mut JoinPlan, lookup: &Lookup) -> Result<String, SearchError> {
        let field = self.resolve(&lookup.field)?;
        if field.info.value_type == ValueType::Bool && lookup.operator != Operator::Exact {
            return Err(SearchError::unresolved(
                &lookup.field,
                format!("operator {} is not supported for bool fields", lookup.operator.as_str()),
            ));
        }
        let column = plan.column(&field);
        Ok(condition(&column, field.info.value_type, lookup.operator))
    }

    fn rows(
        &self,
        fields: &[FieldPath],
        restriction: Restriction<'_>,
    ) -> Result<Vec<ProjectionRow>, SearchError> {
        let table = self.table_def()?;
        let mut plan = JoinPlan::new("t");
        let mut columns = Vec::with_capacity(fields.len());
        let mut types = Vec::with_capacity(fields.len());
        for field in fields {
            let resolved = self.resolve(field)?;
            columns.push(plan.column(&resolved));
            types.push(resolved.info.value_type);
        }

        let pk = &table.pk;
        let root = plan.root.clone();
        let mut sql = format!("SELECT {root}.\"{pk}\"");
        for column in &columns {
            sql.push_str(", ");
            sql.push_str(column);
        }
        sql.push_str(&format!(" FROM {}", plan.from_clause(&self.table)));

        let mut params = Vec::new();
        match restriction {
            Restriction::All => {}
            Restriction::Ids(ids) => {
                sql.push_str(&format!(" WHERE {root}.\"{pk}\" IN ({})", id_list(ids)));
            }
            Restriction::Matching(lookups) => {
                let mut filter = JoinPlan::new("f");
                let conditions = lookups
                    .iter()
                    .map(|lookup| self.lookup_condition(&mut filter, lookup))
                    .collect::<Result<Vec<_>, _>>()?;
                let matches =
                    if conditions.is_empty() { "0".to_string() } else { conditions.join(" OR ") };
                sql.push_str(&format!(
                    " WHERE {root}.\"{pk}\" IN (SELECT {}.\"{pk}\" FROM {} WHERE {matches})",
                    filter.root,
                    filter.from_clause(&self.table)
                ));
                params.extend(lookups.iter().map(|lookup| lookup.value.clone()));
            }
        }
        sql.push_str(&format!(" ORDER BY {}", plan.order_clause(table)));

        self.query_rows(&sql, &params, &types).map_err(storage)
    }

    fn labels(
        &self,
        ids: &[RecordId],
        label: &LabelSource,
    ) -> Result<BTreeMap<RecordId, String>, SearchError> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        match label {
            LabelSource::Describe => {
                let table = self.table_def()?;
                let sql = format!(
                    "SELECT t0.\"{pk}\", {display} FROM \"{name}\" AS t0 WHERE t0.\"{pk}\" IN ({ids})",
                    pk = table.pk,
                    display = display_column(table),
                    name = self.table,
                    ids = id_list(ids)
                );
                Ok(self.query_descriptions(&sql).map_err(storage)?.into_iter().collect())
            }
            LabelSource::Field(field) => {
                let rows = self.rows(std::slice::from_ref(field), Restriction::Ids(ids))?;
                Ok(first_values(rows).into_iter().collect())
            }
        }
    }

    fn query_rows(
        &self,
        sql: &str,
        params: &[String],
        types: &[ValueType],
    ) -> Result<Vec<ProjectionRow>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .with_context(|| format!("failed to prepare projection on {}", self.table))?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;

        let mut projected = Vec::new();
        while let Some(row) = rows.next()? {
            let id = RecordId(row.get(0)?);
            let mut values = Vec::with_capacity(types.len());
            for (index, value_type) in types.iter().enumerate() {
                values.push(read_value(row.get_ref(index + 1)?, *value_type));
            }
            projected.push(ProjectionRow { id, values });
        }
        Ok(projected)
    }

    fn query_ids(&self, sql: &str, params: &[&str]) -> Result<Vec<RecordId>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .with_context(|| format!("failed to prepare lookup on {}", self.table))?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| row.get::<_, i64>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(RecordId(row?));
        }
        Ok(ids)
    }

    /// `(id, description)` pairs of a query selecting the primary key and the
    /// display column, falling back to `"{table} ({id})"`.
    fn query_descriptions(&self, sql: &str) -> Result<Vec<(RecordId, String)>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .with_context(|| format!("failed to prepare description query on {}", self.table))?;
        let mut rows = stmt.query([])?;

        let mut described = Vec::new();
        while let Some(row) = rows.next()? {
            let id = RecordId(row.get(0)?);
            let display = read_value(row.get_ref(1)?, ValueType::Text);
            let description = if display.is_empty() {
                format!("{} ({id})", self.table)
            } else {
                display.to_string()
            };
            described.push((id, description));
        }
        Ok(described)
    }
}

impl RecordSource for SqliteRecordSource<'_> {
    fn fetch(
        &self,
        lookup: &Lookup,
        label: &LabelSource,
        exclude: &BTreeSet<RecordId>,
    ) -> Result<Vec<(RecordId, String)>, SearchError> {
        let table = self.table_def()?;
        let mut plan = JoinPlan::new("t");
        let condition = self.lookup_condition(&mut plan, lookup)?;
        if let LabelSource::Field(field) = label {
            self.resolve(field)?;
        }

        let pk = &table.pk;
        let root = &plan.root;
        let mut sql = format!(
            "SELECT {root}.\"{pk}\" FROM {} WHERE {condition}",
            plan.from_clause(&self.table)
        );
        if !exclude.is_empty() {
            sql.push_str(&format!(" AND {root}.\"{pk}\" NOT IN ({})", id_list(exclude)));
        }
        sql.push_str(&format!(" GROUP BY {root}.\"{pk}\" ORDER BY {}", plan.root_order(table)));

        let ids = self.query_ids(&sql, &[lookup.value.as_str()]).map_err(storage)?;
        tracing::debug!(
            "{} lookup on {}.{} matched {} records",
            lookup.operator.as_str(),
            self.table,
            lookup.field,
            ids.len()
        );
        let mut labels = self.labels(&ids, label)?;
        Ok(ids
            .into_iter()
            .map(|id| (id, labels.remove(&id).unwrap_or_default()))
            .collect())
    }

    fn project(
        &self,
        fields: &[FieldPath],
        filter: Option<&[Lookup]>,
    ) -> Result<Vec<ProjectionRow>, SearchError> {
        let restriction = filter.map_or(Restriction::All, Restriction::Matching);
        self.rows(fields, restriction)
    }

    fn natural_order(&self) -> Result<Vec<RecordId>, SearchError> {
        let table = self.table_def()?;
        let plan = JoinPlan::new("t");
        let sql = format!(
            "SELECT t0.\"{}\" FROM {} ORDER BY {}",
            table.pk,
            plan.from_clause(&self.table),
            plan.root_order(table)
        );
        self.query_ids(&sql, &[]).map_err(storage)
    }

    fn describe(&self, id: RecordId) -> Result<String, SearchError> {
        self.labels(&[id], &LabelSource::Describe)?
            .remove(&id)
            .ok_or_else(|| SearchError::Storage(format!("record {id} does not exist in {}", self.table)))
    }

    fn field_info(&self, field: &FieldPath) -> Option<FieldInfo> {
        self.resolve(field).ok().map(|resolved| resolved.info)
    }

    fn list(&self, label: &LabelSource) -> Result<Vec<(RecordId, String)>, SearchError> {
        match label {
            LabelSource::Describe => {
                let table = self.table_def()?;
                let plan = JoinPlan::new("t");
                let sql = format!(
                    "SELECT t0.\"{}\", {} FROM {} ORDER BY {}",
                    table.pk,
                    display_column(table),
                    plan.from_clause(&self.table),
                    plan.root_order(table)
                );
                self.query_descriptions(&sql).map_err(storage)
            }
            LabelSource::Field(field) => {
                Ok(first_values(self.rows(std::slice::from_ref(field), Restriction::All)?))
            }
        }
    }
}

/// Joins needed to reach the columns of one query, keyed by relation chain.
struct JoinPlan {
    prefix: &'static str,
    root: String,
    joins: Vec<String>,
    aliases: BTreeMap<String, String>,
    /// Primary keys of joined tables, for a stable row order.
    join_order: Vec<String>,
}

impl JoinPlan {
    fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            root: format!("{prefix}0"),
            joins: Vec::new(),
            aliases: BTreeMap::new(),
            join_order: Vec::new(),
        }
    }

    /// Join whatever `field` needs and return its qualified column.
    fn column(&mut self, field: &ResolvedField<'_>) -> String {
        let mut current = self.root.clone();
        for hop in &field.hops {
            if let Some(alias) = self.aliases.get(&hop.chain) {
                current = alias.clone();
                continue;
            }
            let alias = format!("{}{}", self.prefix, self.aliases.len() + 1);
            let (target, target_pk, from_pk) = (hop.target, hop.target_pk, hop.from_pk);
            match hop.relation {
                RelationDef::ManyToOne { column, .. } => self.joins.push(format!(
                    "LEFT JOIN \"{target}\" AS {alias} ON {alias}.\"{target_pk}\" = {current}.\"{column}\""
                )),
                RelationDef::OneToMany { remote_column, .. } => self.joins.push(format!(
                    "LEFT JOIN \"{target}\" AS {alias} ON {alias}.\"{remote_column}\" = {current}.\"{from_pk}\""
                )),
                RelationDef::ManyToMany { through, source_column, target_column, .. } => {
                    let link = format!("{alias}_link");
                    self.joins.push(format!(
                        "LEFT JOIN \"{through}\" AS {link} ON {link}.\"{source_column}\" = {current}.\"{from_pk}\""
                    ));
                    self.joins.push(format!(
                        "LEFT JOIN \"{target}\" AS {alias} ON {alias}.\"{target_pk}\" = {link}.\"{target_column}\""
                    ));
                }
            }
            self.join_order.push(format!("{alias}.\"{target_pk}\""));
            self.aliases.insert(hop.chain.clone(), alias.clone());
            current = alias;
        }
        format!("{current}.\"{}\"", field.column)
    }

    fn from_clause(&self, table: &str) -> String {
        let mut clause = format!("\"{table}\" AS {}", self.root);
        for join in &self.joins {
            clause.push(' ');
            clause.push_str(join);
        }
        clause
    }

    fn root_order(&self, table: &TableDef) -> String {
        table
            .order_terms()
            .into_iter()
            .map(|(column, descending)| {
                format!("{}.\"{column}\" {}", self.root, if descending { "DESC" } else { "ASC" })
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn order_clause(&self, table: &TableDef) -> String {
        let mut clause = self.root_order(table);
        for term in &self.join_order {
            clause.push_str(", ");
            clause.push_str(term);
        }
        clause
    }
}

fn condition(column: &str, value_type: ValueType, operator: Operator) -> String {
    let folded = if value_type == ValueType::Bool {
        format!("(CASE WHEN {column} IS NULL THEN NULL WHEN {column} THEN 'true' ELSE 'false' END)")
    } else {
        format!("{SEARCH_FOLD_FUNCTION}({column})")
    };
    match operator {
        Operator::Exact => format!("{folded} = ?"),
        Operator::Prefix => format!("instr({folded}, ?) = 1"),
        Operator::Contains => format!("instr({folded}, ?) > 0"),
    }
}

fn display_column(table: &TableDef) -> String {
    table.display.as_ref().map_or_else(|| "NULL".to_string(), |display| format!("t0.\"{display}\""))
}

fn id_list<'i>(ids: impl IntoIterator<Item = &'i RecordId>) -> String {
    ids.into_iter().map(|id| id.0.to_string()).collect::<Vec<_>>().join(", ")
}

fn read_value(value: ValueRef<'_>, value_type: ValueType) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(value) if value_type == ValueType::Bool => Value::Bool(value != 0),
        ValueRef::Integer(value) => Value::Integer(value),
        ValueRef::Real(value) => Value::Text(value.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// The first non-empty value of every record, in row order.
fn first_values(rows: Vec<ProjectionRow>) -> Vec<(RecordId, String)> {
    let mut labels: Vec<(RecordId, String)> = Vec::new();
    let mut positions: BTreeMap<RecordId, usize> = BTreeMap::new();
    for row in rows {
        let value = row.values.into_iter().next().filter(|value| !value.is_empty());
        match positions.get(&row.id).copied() {
            Some(position) => {
                let label: &mut String = &mut labels[position].1;
                if label.is_empty() {
                    if let Some(value) = value {
                        *label = value.to_string();
                    }
                }
            }
            None => {
                positions.insert(row.id, labels.len());
                labels.push((row.id, value.map(|value| value.to_string()).unwrap_or_default()));
            }
        }
    }
    labels
}

fn storage(err: anyhow::Error) -> SearchError {
    SearchError::Storage(format!("{err:#}"))
}
