use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use listing_store_core::{codec, unique_where, ExtractorRegistry, Identifier, Record, Value};
use listing_store_sqlite::{ArchivalManager, RecordStore};
use serde_json::{json, Value as JsonValue};
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

mod config;

use config::{parse_column_spec, Settings};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "lstore")]
#[command(about = "Listing store CLI")]
struct Cli {
    /// YAML file with `database`, `table`, `unique` and `archive.limit`.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "LISTING_STORE_DB")]
    db: Option<PathBuf>,

    #[arg(long, env = "LISTING_STORE_TABLE")]
    table: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Table {
        #[command(subcommand)]
        command: TableCommand,
    },
    Record {
        #[command(subcommand)]
        command: RecordCommand,
    },
    Archive {
        #[command(subcommand)]
        command: ArchiveCommand,
    },
}

#[derive(Debug, Subcommand)]
enum TableCommand {
    /// Create the table and declare its unique identifier.
    Init(TableInitArgs),
    Columns,
    /// List the given field names that have no column yet.
    Missing(FieldNameArgs),
}

#[derive(Debug, Args)]
struct TableInitArgs {
    /// Identifying column as `field:type`; repeatable. Overrides `unique` from the config.
    #[arg(long = "unique")]
    unique: Vec<String>,
}

#[derive(Debug, Args)]
struct FieldNameArgs {
    #[arg(long = "field", required = true)]
    fields: Vec<String>,
}

#[derive(Debug, Args)]
struct FieldValueArgs {
    /// `field=value`; repeatable.
    #[arg(long = "field", required = true)]
    fields: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum RecordCommand {
    Insert(RecordInsertArgs),
    /// Insert every line of a newline-delimited JSON file.
    Import(RecordImportArgs),
    Exists(RecordExistsArgs),
    Id(FieldValueArgs),
    Count(RecordCountArgs),
}

#[derive(Debug, Args)]
struct RecordInsertArgs {
    #[arg(long)]
    json: String,
}

#[derive(Debug, Args)]
struct RecordImportArgs {
    #[arg(long = "in")]
    input: PathBuf,
    /// Skip the `imported_at` and `import_source` fields.
    #[arg(long, default_value_t = false)]
    no_provenance: bool,
}

#[derive(Debug, Args)]
struct RecordExistsArgs {
    #[command(flatten)]
    identifier: FieldValueArgs,
    /// Include the identity predicate rendered as literals.
    #[arg(long, default_value_t = false)]
    explain: bool,
}

#[derive(Debug, Args)]
struct RecordCountArgs {
    #[arg(long = "field")]
    fields: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum ArchiveCommand {
    /// Unarchived rows in creation order.
    Active(FieldNameArgs),
    Mark(FieldValueArgs),
    /// Archive every active row whose key appears in the dead list.
    Sweep(ArchiveSweepArgs),
}

#[derive(Debug, Args)]
struct ArchiveSweepArgs {
    #[arg(long)]
    key: String,
    #[arg(long)]
    limit: Option<usize>,
    /// File with one dead key value per line.
    #[arg(long)]
    dead: PathBuf,
}

struct ImportContext<'a> {
    source: &'a Path,
    imported_at: PrimitiveDateTime,
}

fn imported_at(context: &ImportContext<'_>) -> Option<Value> {
    Some(Value::Timestamp(context.imported_at))
}

fn import_source(context: &ImportContext<'_>) -> Option<Value> {
    Some(Value::Text(context.source.display().to_string()))
}

fn provenance_extractors<'a>() -> Result<ExtractorRegistry<ImportContext<'a>>> {
    Ok(ExtractorRegistry::new()
        .field("imported_at", imported_at)?
        .field("import_source", import_source)?)
}

fn with_contract_version(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                JsonValue::String(CLI_CONTRACT_VERSION.to_string()),
            );
            JsonValue::Object(object)
        }
        other => json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "data": other,
        }),
    }
}

fn emit_json(value: JsonValue) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .ok();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = Settings::resolve(cli.config.as_deref(), cli.db, cli.table)?;
    debug!(database = %settings.database.display(), table = %settings.table, "opening store");

    let mut store = RecordStore::open(&settings.database, &settings.table).with_context(|| {
        format!("failed to open table {} in {}", settings.table, settings.database.display())
    })?;

    match cli.command {
        Command::Table { command } => run_table(command, &mut store, &settings),
        Command::Record { command } => run_record(command, &mut store),
        Command::Archive { command } => run_archive(command, &mut store, &settings),
    }
}

fn run_table(command: TableCommand, store: &mut RecordStore, settings: &Settings) -> Result<()> {
    match command {
        TableCommand::Init(args) => run_table_init(&args, store, settings),
        TableCommand::Columns => emit_json(json!({
            "table": store.table(),
            "columns": store.columns()?,
        })),
        TableCommand::Missing(args) => {
            let missing = store.identify_missing(args.fields.iter().map(String::as_str))?;
            emit_json(json!({ "table": store.table(), "missing": missing }))
        }
    }
}

fn run_table_init(args: &TableInitArgs, store: &mut RecordStore, settings: &Settings) -> Result<()> {
    let specs = if args.unique.is_empty() { &settings.unique } else { &args.unique };
    let columns = specs.iter().map(|raw| parse_column_spec(raw)).collect::<Result<Vec<_>>>()?;
    if !columns.is_empty() {
        let borrowed: Vec<(&str, _)> =
            columns.iter().map(|(name, column_type)| (name.as_str(), *column_type)).collect();
        store.declare_unique(&borrowed).context("failed to declare unique identifier")?;
    }

    let unique: Vec<String> = columns.iter().map(|(name, _)| name.clone()).collect();
    emit_json(json!({
        "table": store.table(),
        "unique": unique,
        "columns": store.columns()?,
    }))
}

fn run_record(command: RecordCommand, store: &mut RecordStore) -> Result<()> {
    match command {
        RecordCommand::Insert(args) => {
            let value: JsonValue =
                serde_json::from_str(&args.json).context("--json is not valid JSON")?;
            let inserted = store.insert_json(&value)?;
            emit_json(json!({ "inserted": inserted }))
        }
        RecordCommand::Import(args) => run_record_import(&args, store),
        RecordCommand::Exists(args) => {
            let identifier = parse_identifier(&args.identifier.fields)?;
            let exists = store.exists(&identifier)?;
            let mut output = json!({ "identifier": &identifier, "exists": exists });
            if args.explain {
                output["predicate"] = JsonValue::String(unique_where(&identifier)?.literal()?);
            }
            emit_json(output)
        }
        RecordCommand::Id(args) => {
            let identifier = parse_identifier(&args.fields)?;
            let id = store.get_surrogate_id(&identifier)?;
            emit_json(json!({ "identifier": &identifier, "id": id }))
        }
        RecordCommand::Count(args) => {
            let count = if args.fields.is_empty() {
                store.count(None)?
            } else {
                store.count(Some(&parse_identifier(&args.fields)?))?
            };
            emit_json(json!({ "count": count }))
        }
    }
}

fn run_record_import(args: &RecordImportArgs, store: &mut RecordStore) -> Result<()> {
    let raw = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let now = OffsetDateTime::now_utc();
    let context = ImportContext {
        source: &args.input,
        imported_at: PrimitiveDateTime::new(now.date(), now.time()),
    };
    let provenance = if args.no_provenance { ExtractorRegistry::new() } else { provenance_extractors()? };

    let mut lines = 0_usize;
    let mut inserted = 0_usize;
    let mut duplicates = 0_usize;
    for (index, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_no = index + 1;
        lines += 1;

        let value: JsonValue = serde_json::from_str(line)
            .with_context(|| format!("line {line_no} is not valid JSON"))?;
        let mut record = Record::from_json(&value)
            .with_context(|| format!("line {line_no} is not a flat listing record"))?;
        provenance.extract_into(&context, &mut record);

        if store.insert(&record).with_context(|| format!("failed to insert line {line_no}"))? {
            inserted += 1;
        } else {
            duplicates += 1;
        }
    }

    emit_json(json!({
        "source": args.input.display().to_string(),
        "lines": lines,
        "inserted": inserted,
        "duplicates": duplicates,
    }))
}

fn run_archive(command: ArchiveCommand, store: &mut RecordStore, settings: &Settings) -> Result<()> {
    match command {
        ArchiveCommand::Active(args) => {
            let fields: Vec<&str> = args.fields.iter().map(String::as_str).collect();
            let rows = store.active(&fields)?;
            emit_json(json!({ "count": rows.len(), "rows": rows }))
        }
        ArchiveCommand::Mark(args) => {
            let identifier = parse_identifier(&args.fields)?;
            let archived = store.set_archived(&identifier)?;
            emit_json(json!({ "identifier": &identifier, "archived": archived }))
        }
        ArchiveCommand::Sweep(args) => run_archive_sweep(&args, store, settings),
    }
}

fn run_archive_sweep(
    args: &ArchiveSweepArgs,
    store: &mut RecordStore,
    settings: &Settings,
) -> Result<()> {
    let raw = fs::read_to_string(&args.dead)
        .with_context(|| format!("failed to read {}", args.dead.display()))?;
    let dead: BTreeSet<&str> =
        raw.lines().map(str::trim).filter(|line| !line.is_empty()).collect();

    let key = args.key.as_str();
    let mut checker = |identifier: &Identifier| -> Result<bool> {
        let value = identifier
            .get(key)
            .ok_or_else(|| anyhow!("row has no `{key}` value"))?;
        Ok(!dead.contains(plain_text(value)?.as_str()))
    };

    let mut manager = ArchivalManager::new(store, [key]);
    if let Some(limit) = args.limit.or(settings.archive_limit) {
        manager = manager.limit(limit);
    }
    let summary = manager.sweep(&mut checker)?;
    emit_json(json!({ "key": key, "summary": summary }))
}

/// Text a key value is compared by: raw text for text values, the literal otherwise.
fn plain_text(value: &Value) -> Result<String> {
    match value {
        Value::Text(text) => Ok(text.clone()),
        other => Ok(codec::encode(other)?),
    }
}

fn parse_identifier(raw_fields: &[String]) -> Result<Identifier> {
    let mut identifier = Identifier::new();
    for raw in raw_fields {
        let (field, value) = parse_field_value(raw)?;
        identifier.insert(field, value);
    }
    Ok(identifier)
}

fn parse_field_value(raw: &str) -> Result<(String, Value)> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected `field=value`, got `{raw}`"))?;
    Ok((field.trim().to_string(), parse_scalar(value)))
}

/// Plain decimal integers and floats become numbers; `true`/`false` become booleans.
/// Anything else, including `01234`, `1e5`, `nan` and `inf`, stays text.
fn parse_scalar(raw: &str) -> Value {
    if is_plain_integer(raw) {
        if let Ok(integer) = raw.parse::<i64>() {
            return Value::Integer(integer);
        }
    }
    if is_plain_decimal(raw) {
        if let Ok(float) = raw.parse::<f64>() {
            return Value::Float(float);
        }
    }
    match raw {
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        text => Value::Text(text.to_string()),
    }
}

fn is_plain_integer(raw: &str) -> bool {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    match digits.as_bytes() {
        [] => false,
        [b'0'] => true,
        [b'0', ..] => false,
        bytes => bytes.iter().all(u8::is_ascii_digit),
    }
}

fn is_plain_decimal(raw: &str) -> bool {
    raw.split_once('.').is_some_and(|(whole, fraction)| {
        is_plain_integer(whole)
            && !fraction.is_empty()
            && fraction.bytes().all(|byte| byte.is_ascii_digit())
    })
}
