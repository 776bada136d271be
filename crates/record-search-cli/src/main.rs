use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use record_search_core::{
    find_duplicates_with_display, FieldInfo, FieldPath, RecordSource, SearchConfig,
    SearchStrategy, StrategyKind,
};
use record_search_store_sqlite::{Catalog, SqliteStore};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const LOG_ENV_VAR: &str = "RECSEARCH_LOG";

#[derive(Debug, Parser)]
#[command(name = "recsearch")]
#[command(about = "Record search and duplicate finder")]
struct Cli {
    #[arg(long, default_value = "./records.sqlite3")]
    db: PathBuf,

    #[arg(long, default_value = "./catalog.yaml")]
    catalog: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Search(SearchArgs),
    Duplicates(DuplicatesArgs),
    Fields(FieldsArgs),
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[arg(long = "type")]
    record_type: String,
    #[arg(long, default_value = "")]
    query: String,
    #[arg(long, default_value_t = false)]
    ordered: bool,
    #[arg(long, default_value_t = false)]
    in_memory: bool,
    #[arg(long, default_value_t = false)]
    no_suffix: bool,
    #[arg(long)]
    name_field: Option<String>,
    #[arg(long)]
    strategy: Option<StrategyArg>,
}

#[derive(Debug, Args)]
struct DuplicatesArgs {
    #[arg(long = "type")]
    record_type: String,
    #[arg(long = "field", required = true)]
    fields: Vec<String>,
    #[arg(long = "display")]
    display: Vec<String>,
}

#[derive(Debug, Args)]
struct FieldsArgs {
    #[arg(long = "type")]
    record_type: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Base,
    PrimaryFields,
    NameField,
    ValuesDict,
}

impl From<StrategyArg> for StrategyKind {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Base => Self::Base,
            StrategyArg::PrimaryFields => Self::PrimaryFields,
            StrategyArg::NameField => Self::NameField,
            StrategyArg::ValuesDict => Self::ValuesDict,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldReport {
    field: FieldPath,
    role: &'static str,
    info: Option<FieldInfo>,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_catalog(path: &Path) -> Result<Catalog> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog file {}", path.display()))?;
    Catalog::from_yaml_str(&raw)
        .with_context(|| format!("failed to load catalog {}", path.display()))
}

fn parse_paths(raw: &[String]) -> Result<Vec<FieldPath>> {
    raw.iter()
        .map(|path| FieldPath::parse(path).with_context(|| format!("invalid field path {path}")))
        .collect()
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let catalog = load_catalog(&cli.catalog)?;
    let store = SqliteStore::open(&cli.db)?;
    store.check_catalog(&catalog)?;

    match cli.command {
        Command::Search(args) => run_search(&args, &store, &catalog),
        Command::Duplicates(args) => run_duplicates(&args, &store, &catalog),
        Command::Fields(args) => run_fields(&args, &store, &catalog),
    }
}

/// The record type's search configuration with command line overrides applied.
fn effective_config(args: &SearchArgs, catalog: &Catalog) -> Result<SearchConfig> {
    let mut config = catalog.record_type(&args.record_type)?.search.clone();
    if args.in_memory {
        config.in_memory = true;
    }
    if args.no_suffix {
        config.use_suffix = false;
    }
    if let Some(name_field) = args.name_field.as_deref() {
        let name_field = FieldPath::parse(name_field)
            .with_context(|| format!("invalid name field {name_field}"))?;
        config = config.with_name_field(name_field);
    }
    Ok(config)
}

fn run_search(args: &SearchArgs, store: &SqliteStore, catalog: &Catalog) -> Result<()> {
    let record_type = catalog.record_type(&args.record_type)?;
    let source = store.source(catalog, &record_type.table)?;
    let config = effective_config(args, catalog)?;
    let strategy = match args.strategy {
        Some(kind) => SearchStrategy::build(kind.into(), &config)?,
        None => SearchStrategy::from_config(&config)?,
    };

    let outcome = strategy
        .search(&source, &args.query, args.ordered)
        .with_context(|| format!("search on {} failed", args.record_type))?;
    emit_json(serde_json::json!({
        "record_type": args.record_type,
        "query": args.query,
        "strategy": strategy.kind(),
        "ordered": args.ordered,
        "exact_match": outcome.exact_match,
        "results": outcome.results
    }))
}

fn run_duplicates(args: &DuplicatesArgs, store: &SqliteStore, catalog: &Catalog) -> Result<()> {
    let record_type = catalog.record_type(&args.record_type)?;
    let source = store.source(catalog, &record_type.table)?;
    let fields = parse_paths(&args.fields)?;
    let display = parse_paths(&args.display)?;

    let groups = find_duplicates_with_display(&source, &fields, &display)
        .with_context(|| format!("duplicate search on {} failed", args.record_type))?;
    emit_json(serde_json::json!({
        "record_type": args.record_type,
        "fields": fields,
        "group_count": groups.len(),
        "groups": groups
    }))
}

fn run_fields(args: &FieldsArgs, store: &SqliteStore, catalog: &Catalog) -> Result<()> {
    let record_type = catalog.record_type(&args.record_type)?;
    let source = store.source(catalog, &record_type.table)?;
    let strategy = SearchStrategy::from_config(&record_type.search)?;

    let mut fields = Vec::new();
    for field in strategy.primary_fields() {
        fields.push(FieldReport { field: field.clone(), role: "primary", info: source.field_info(field) });
    }
    for field in strategy.secondary_fields() {
        fields.push(FieldReport { field: field.clone(), role: "secondary", info: source.field_info(field) });
    }
    if let Some(name_field) = strategy.name_field() {
        fields.push(FieldReport {
            field: name_field.clone(),
            role: "name",
            info: source.field_info(name_field),
        });
    }

    emit_json(serde_json::json!({
        "record_type": args.record_type,
        "table": record_type.table,
        "strategy": strategy.kind(),
        "fields": fields,
        "suffixes": record_type.search.suffixes,
        "use_suffix": record_type.search.use_suffix,
        "use_separator": record_type.search.use_separator,
        "in_memory": record_type.search.in_memory
    }))
}
