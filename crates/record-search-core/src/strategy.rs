use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::format::{append_suffix, reorder, separator_label, suffix_for, SuffixTable};
use crate::projection::{project, FieldValues, ProjectOptions, ProjectionMap};
use crate::{
    clean_query, clean_string, FieldPath, LabelSource, Lookup, Operator, RecordId, RecordSource,
    ResultItem, SearchConfig, SearchError, SearchOutcome,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Base,
    PrimaryFields,
    NameField,
    ValuesDict,
}

impl StrategyKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::PrimaryFields => "primary_fields",
            Self::NameField => "name_field",
            Self::ValuesDict => "values_dict",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "base" => Some(Self::Base),
            "primary_fields" => Some(Self::PrimaryFields),
            "name_field" => Some(Self::NameField),
            "values_dict" => Some(Self::ValuesDict),
            _ => None,
        }
    }
}

/// Runs every tier on every search field in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseSearch {
    search_fields: Vec<FieldPath>,
    suffixes: SuffixTable,
    use_suffix: bool,
}

impl BaseSearch {
    #[must_use]
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            search_fields: config.search_fields.clone(),
            suffixes: config.suffixes.clone(),
            use_suffix: config.use_suffix,
        }
    }

    #[must_use]
    pub fn search_fields(&self) -> &[FieldPath] {
        &self.search_fields
    }

    fn collect<S: RecordSource + ?Sized>(
        &self,
        run: &mut SearchRun<'_, S>,
        query: &str,
    ) -> Result<Vec<ResultItem>, SearchError> {
        let mut results = Vec::new();
        for field in &self.search_fields {
            for operator in Operator::TIERS {
                results.extend(run.tier(field, operator, query)?);
            }
        }
        Ok(results)
    }
}

/// Splits hits into a strong region (any tier on a primary field, exact on a
/// secondary one) and a weak region (prefix and substring on secondary fields).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryFieldsSearch {
    base: BaseSearch,
    primary: Vec<FieldPath>,
    secondary: Vec<FieldPath>,
    use_separator: bool,
    separator_template: String,
    separator_width: usize,
}

impl PrimaryFieldsSearch {
    #[must_use]
    pub fn new(config: &SearchConfig) -> Self {
        Self::with_primary(config, config.effective_primary())
    }

    fn with_primary(config: &SearchConfig, primary: Vec<FieldPath>) -> Self {
        let secondary =
            config.search_fields.iter().filter(|field| !primary.contains(field)).cloned().collect();
        Self {
            base: BaseSearch::new(config),
            primary,
            secondary,
            use_separator: config.use_separator,
            separator_template: config.separator_template.clone(),
            separator_width: config.separator_width,
        }
    }

    #[must_use]
    pub fn primary_fields(&self) -> &[FieldPath] {
        &self.primary
    }

    #[must_use]
    pub fn secondary_fields(&self) -> &[FieldPath] {
        &self.secondary
    }

    /// Every field a search touches: primary fields first, then the rest.
    fn searched_fields(&self) -> Vec<FieldPath> {
        let mut fields = self.primary.clone();
        fields.extend(self.secondary.iter().cloned());
        fields
    }

    fn collect<S: RecordSource + ?Sized>(
        &self,
        run: &mut SearchRun<'_, S>,
        query: &str,
    ) -> Result<Vec<ResultItem>, SearchError> {
        let mut results = Vec::new();
        for field in &self.primary {
            for operator in Operator::TIERS {
                results.extend(run.tier(field, operator, query)?);
            }
        }
        for field in &self.secondary {
            results.extend(run.tier(field, Operator::Exact, query)?);
        }

        let mut weak = Vec::new();
        for field in &self.secondary {
            for operator in [Operator::Prefix, Operator::Contains] {
                weak.extend(run.tier(field, operator, query)?);
            }
        }
        if !weak.is_empty() {
            // No banner when there is nothing strong to separate from.
            if self.use_separator && !results.is_empty() {
                results.push(ResultItem::separator(separator_label(
                    &self.separator_template,
                    query,
                    self.separator_width,
                )));
            }
            results.extend(weak);
        }
        Ok(results)
    }
}

/// Labels results with the first value of a designated name field instead
/// of the record description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFieldSearch {
    fields: PrimaryFieldsSearch,
    name_field: FieldPath,
}

impl NameFieldSearch {
    /// Without declared primary fields the name field is the only primary
    /// field. Without a name field the first primary (or else secondary)
    /// search field takes its place.
    ///
    /// # Errors
    /// Returns [`SearchError::AmbiguousPrimaryField`] when no field can serve
    /// as the name field.
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        let fields = match &config.name_field {
            Some(name_field) if config.primary_search_fields.is_empty() => {
                PrimaryFieldsSearch::with_primary(config, vec![name_field.clone()])
            }
            _ => PrimaryFieldsSearch::new(config),
        };
        let name_field = match &config.name_field {
            Some(name_field) => name_field.clone(),
            None => fields
                .primary
                .first()
                .or_else(|| fields.secondary.first())
                .cloned()
                .ok_or_else(|| {
                    SearchError::AmbiguousPrimaryField(
                        "no name field and no search fields are configured".to_string(),
                    )
                })?,
        };
        Ok(Self { fields, name_field })
    }

    #[must_use]
    pub fn name_field(&self) -> &FieldPath {
        &self.name_field
    }
}

/// Fetches the candidate values once per call and runs the tiers in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuesDictSearch {
    named: NameFieldSearch,
}

impl ValuesDictSearch {
    /// # Errors
    /// Same as [`NameFieldSearch::new`].
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        Ok(Self { named: NameFieldSearch::new(config)? })
    }

    /// Project the searched fields and the name field for every record in
    /// which any searched field contains any word of `query`.
    fn working_copy<S: RecordSource + ?Sized>(
        &self,
        source: &S,
        query: &str,
    ) -> Result<ProjectionMap, SearchError> {
        let searched = self.named.fields.searched_fields();
        let filter = searched
            .iter()
            .flat_map(|field| {
                let value_type = source.field_info(field).map(|info| info.value_type);
                query.split_whitespace().map(move |token| {
                    Lookup::new(field.clone(), Operator::Contains, clean_query(token, value_type))
                })
            })
            .collect::<Vec<_>>();

        let mut projected = searched;
        if !projected.contains(&self.named.name_field) {
            projected.push(self.named.name_field.clone());
        }
        project(source, &projected, ProjectOptions::default(), Some(&filter))
    }
}

/// The search strategies, selected from a record type's [`SearchConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchStrategy {
    Base(BaseSearch),
    PrimaryFields(PrimaryFieldsSearch),
    NameField(NameFieldSearch),
    ValuesDict(ValuesDictSearch),
}

impl SearchStrategy {
    /// Pick the strategy the configuration asks for: the in-memory variant
    /// when opted in, else name field, else primary fields, else base.
    ///
    /// # Errors
    /// Returns [`SearchError::AmbiguousPrimaryField`] when a name-field
    /// strategy has no usable name field.
    pub fn from_config(config: &SearchConfig) -> Result<Self, SearchError> {
        let kind = if config.in_memory {
            StrategyKind::ValuesDict
        } else if config.name_field.is_some() {
            StrategyKind::NameField
        } else if !config.primary_search_fields.is_empty() {
            StrategyKind::PrimaryFields
        } else {
            StrategyKind::Base
        };
        Self::build(kind, config)
    }

    /// # Errors
    /// Same as [`SearchStrategy::from_config`].
    pub fn build(kind: StrategyKind, config: &SearchConfig) -> Result<Self, SearchError> {
        Ok(match kind {
            StrategyKind::Base => Self::Base(BaseSearch::new(config)),
            StrategyKind::PrimaryFields => Self::PrimaryFields(PrimaryFieldsSearch::new(config)),
            StrategyKind::NameField => Self::NameField(NameFieldSearch::new(config)?),
            StrategyKind::ValuesDict => Self::ValuesDict(ValuesDictSearch::new(config)?),
        })
    }

    #[must_use]
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Base(_) => StrategyKind::Base,
            Self::PrimaryFields(_) => StrategyKind::PrimaryFields,
            Self::NameField(_) => StrategyKind::NameField,
            Self::ValuesDict(_) => StrategyKind::ValuesDict,
        }
    }

    #[must_use]
    pub fn search_fields(&self) -> &[FieldPath] {
        &self.base().search_fields
    }

    /// Fields whose exact hits set the exact-match flag. For the base
    /// strategy that is every search field.
    #[must_use]
    pub fn primary_fields(&self) -> &[FieldPath] {
        match self.primary_search() {
            Some(fields) => &fields.primary,
            None => self.search_fields(),
        }
    }

    #[must_use]
    pub fn secondary_fields(&self) -> &[FieldPath] {
        match self.primary_search() {
            Some(fields) => &fields.secondary,
            None => &[],
        }
    }

    #[must_use]
    pub fn name_field(&self) -> Option<&FieldPath> {
        match self {
            Self::Base(_) | Self::PrimaryFields(_) => None,
            Self::NameField(named) => Some(&named.name_field),
            Self::ValuesDict(values) => Some(&values.named.name_field),
        }
    }

    fn base(&self) -> &BaseSearch {
        match self {
            Self::Base(base) => base,
            Self::PrimaryFields(fields) => &fields.base,
            Self::NameField(named) => &named.fields.base,
            Self::ValuesDict(values) => &values.named.fields.base,
        }
    }

    fn primary_search(&self) -> Option<&PrimaryFieldsSearch> {
        match self {
            Self::Base(_) => None,
            Self::PrimaryFields(fields) => Some(fields),
            Self::NameField(named) => Some(&named.fields),
            Self::ValuesDict(values) => Some(&values.named.fields),
        }
    }

    fn label_source(&self) -> LabelSource {
        self.name_field().map_or(LabelSource::Describe, |field| LabelSource::Field(field.clone()))
    }

    /// Search `source` for `query`.
    ///
    /// An empty or whitespace-only query lists every record of the source
    /// unchanged. With `ordered`, results are re-sorted into the source's
    /// natural order, each side of a separator on its own.
    ///
    /// # Errors
    /// Propagates the first error of the source; no partial outcome is
    /// returned.
    pub fn search<S: RecordSource + ?Sized>(
        &self,
        source: &S,
        query: &str,
        ordered: bool,
    ) -> Result<SearchOutcome, SearchError> {
        if query.trim().is_empty() {
            let results = source
                .list(&self.label_source())?
                .into_iter()
                .map(|(id, label)| ResultItem::record(id, label))
                .collect();
            return Ok(SearchOutcome { results, exact_match: false });
        }

        let (results, exact_match) = match self {
            Self::Base(base) => {
                let backend = Backend::Fetch(LabelSource::Describe);
                let mut run = SearchRun::new(source, base, &base.search_fields, backend);
                (base.collect(&mut run, query)?, run.exact_match)
            }
            Self::PrimaryFields(fields) => {
                let backend = Backend::Fetch(LabelSource::Describe);
                let mut run = SearchRun::new(source, &fields.base, &fields.primary, backend);
                (fields.collect(&mut run, query)?, run.exact_match)
            }
            Self::NameField(named) => {
                let fields = &named.fields;
                let backend = Backend::Fetch(LabelSource::Field(named.name_field.clone()));
                let mut run = SearchRun::new(source, &fields.base, &fields.primary, backend);
                (fields.collect(&mut run, query)?, run.exact_match)
            }
            Self::ValuesDict(values) => {
                let fields = &values.named.fields;
                let backend = Backend::Cached {
                    values: values.working_copy(source, query)?,
                    name_field: values.named.name_field.clone(),
                };
                let mut run = SearchRun::new(source, &fields.base, &fields.primary, backend);
                (fields.collect(&mut run, query)?, run.exact_match)
            }
        };

        let results = if ordered && !results.is_empty() {
            reorder(results, &source.natural_order()?)
        } else {
            results
        };
        tracing::info!(
            "{} search for {:?} returned {} results (exact match: {})",
            self.kind().as_str(),
            query,
            results.len(),
            exact_match
        );
        Ok(SearchOutcome { results, exact_match })
    }
}

enum Backend {
    /// Every tier queries the source.
    Fetch(LabelSource),
    /// Tiers match against a per-call projection; matched records are
    /// removed from it.
    Cached { values: ProjectionMap, name_field: FieldPath },
}

/// Working state of one search call.
struct SearchRun<'a, S: RecordSource + ?Sized> {
    source: &'a S,
    backend: Backend,
    suffixes: &'a SuffixTable,
    use_suffix: bool,
    primary: &'a [FieldPath],
    ids_found: BTreeSet<RecordId>,
    exact_match: bool,
}

impl<'a, S: RecordSource + ?Sized> SearchRun<'a, S> {
    fn new(
        source: &'a S,
        base: &'a BaseSearch,
        primary: &'a [FieldPath],
        backend: Backend,
    ) -> Self {
        Self {
            source,
            backend,
            suffixes: &base.suffixes,
            use_suffix: base.use_suffix,
            primary,
            ids_found: BTreeSet::new(),
            exact_match: false,
        }
    }

    fn tier(
        &mut self,
        field: &FieldPath,
        operator: Operator,
        query: &str,
    ) -> Result<Vec<ResultItem>, SearchError> {
        let value_type = self.source.field_info(field).map(|info| info.value_type);
        let term = clean_query(query, value_type);
        let is_primary = self.primary.contains(field);

        let hits = match &mut self.backend {
            Backend::Fetch(label) => {
                let lookup = Lookup::new(field.clone(), operator, term.as_str());
                self.source.fetch(&lookup, label, &self.ids_found)?
            }
            Backend::Cached { values, name_field } => {
                let tokens = query.split_whitespace().collect::<Vec<_>>();
                let words = (operator != Operator::Exact && is_primary && tokens.len() > 1).then(|| {
                    tokens.iter().map(|token| clean_query(token, value_type)).collect::<Vec<_>>()
                });
                take_matches(
                    values,
                    name_field,
                    field,
                    operator,
                    &term,
                    words.as_deref(),
                    &self.ids_found,
                )
            }
        };

        if operator == Operator::Exact && is_primary && !hits.is_empty() {
            self.exact_match = true;
        }
        tracing::debug!(
            "{} lookup on {} for {:?} returned {} hits",
            operator.as_str(),
            field,
            term,
            hits.len()
        );

        let suffix =
            if self.use_suffix { suffix_for(self.suffixes, field, operator) } else { None };
        Ok(hits
            .into_iter()
            .map(|(id, label)| {
                self.ids_found.insert(id);
                ResultItem::record(id, append_suffix(&label, suffix))
            })
            .collect())
    }
}

/// Remove and return the cached records whose `field` matches `term`.
///
/// When `words` is given, a value holding every word as a whole word
/// matches too, in any order.
fn take_matches(
    values: &mut ProjectionMap,
    name_field: &FieldPath,
    field: &FieldPath,
    operator: Operator,
    term: &str,
    words: Option<&[String]>,
    exclude: &BTreeSet<RecordId>,
) -> Vec<(RecordId, String)> {
    let matched = values
        .iter()
        .filter(|(id, record)| {
            !exclude.contains(id)
                && record.get(field).is_some_and(|held| cached_match(held, operator, term, words))
        })
        .map(|(id, _)| id)
        .collect::<Vec<_>>();

    matched
        .into_iter()
        .filter_map(|id| {
            let record = values.remove(id)?;
            let label = record
                .get(name_field)
                .and_then(FieldValues::first)
                .map(ToString::to_string)
                .unwrap_or_default();
            Some((id, label))
        })
        .collect()
}

fn cached_match(held: &FieldValues, operator: Operator, term: &str, words: Option<&[String]>) -> bool {
    let cleaned = held.as_slice().iter().map(|value| clean_string(&value.to_string())).collect::<Vec<_>>();
    cleaned.iter().any(|value| operator.matches(value, term))
        || words.is_some_and(|words| cleaned.iter().any(|value| contains_all_words(value, words)))
}

fn contains_all_words(value: &str, words: &[String]) -> bool {
    words.iter().all(|word| value.split_whitespace().any(|candidate| candidate == word))
}
