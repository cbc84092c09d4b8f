use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rustyline::DefaultEditor;
use serde_json::Value;
use sift_core::{EntityStore, Filter, PrimaryKey, SiftError, StoreParams};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sift", version, about = "Filter JSON records through an in-memory index", long_about = None)]
struct Cli {
    /// JSON array or NDJSON file of records
    #[arg(short, long, env = "SIFT_RECORDS")]
    records: PathBuf,

    /// Dot-path of the record identifier
    #[arg(long, env = "SIFT_PRIMARY_KEY", default_value = "id")]
    primary_key: String,

    /// Field paths to index (repeat or comma-separate)
    #[arg(short, long = "index", env = "SIFT_INDEX_FIELDS", value_delimiter = ',')]
    index: Vec<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a filter into primary keys
    Query {
        /// Filter JSON, e.g. {"filter":{"property":"stage","operation":"EQ","value":"LEAD"}}
        #[arg(long)]
        filter: String,
        /// Print matching records as JSON lines instead of keys
        #[arg(long)]
        rows: bool,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Print bucket counts per indexed field
    Stats,
    /// Start interactive shell
    Repl,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let store = open_store(&cli.records, &cli.primary_key, cli.index.clone())?;

    match cli.command {
        Some(Commands::Query {
            filter,
            rows,
            limit,
            offset,
        }) => {
            let filter: Filter = serde_json::from_str(&filter).context("invalid filter json")?;
            if rows {
                for (pk, v) in store.query_rows(&filter, limit, offset)? {
                    println!("{}", row_json(&pk, v));
                }
            } else {
                for pk in store.query(&filter)?.into_iter().skip(offset).take(limit) {
                    println!("{pk}");
                }
            }
        }
        Some(Commands::Stats) => println!("{}", format_stats(&store)),
        Some(Commands::Repl) => run_repl(&store)?,
        None => {
            println!("No command given. Use --help for usage, or run `sift repl`.");
        }
    }

    Ok(())
}

fn open_store(path: &Path, primary_key: &str, indexed_fields: Vec<String>) -> Result<EntityStore> {
    let records = load_records(path)?;
    let total = records.len();
    let store = EntityStore::new(StoreParams {
        primary_key: primary_key.to_string(),
        indexed_fields,
    });
    let loaded = store.load(records);
    tracing::info!(path = %path.display(), total, loaded, "records loaded");
    Ok(store)
}

/// Read a JSON array, or one object per line for `.ndjson` / `.jsonl`.
fn load_records(path: &Path) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let line_delimited = matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("ndjson") | Some("jsonl")
    );
    if line_delimited {
        return text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).with_context(|| format!("line {}", n + 1))
            })
            .collect();
    }
    match serde_json::from_str(&text)? {
        Value::Array(items) => Ok(items),
        _ => anyhow::bail!("{} must hold a JSON array of records", path.display()),
    }
}

/// `records` line, then one `field<TAB>buckets` line per indexed field.
fn format_stats(store: &EntityStore) -> String {
    let mut out = format!("records\t{}", store.len());
    for (field, buckets) in store.bucket_counts() {
        out.push_str(&format!("\n{field}\t{buckets}"));
    }
    out
}

fn row_json(pk: &PrimaryKey, record: Value) -> Value {
    serde_json::json!({ "key": pk, "record": record })
}

fn run_repl(store: &EntityStore) -> Result<()> {
    let mut rl = DefaultEditor::new().ok();
    println!("sift shell. Commands: query <filter>, rows <filter>, get <pk>, set <pk> <path> <json>, del <pk>, index <path>, stats, quit.");
    loop {
        let prompt = "sift> ";
        let line = if let Some(ref mut editor) = rl {
            match editor.readline(prompt) {
                Ok(l) => {
                    let _ = editor.add_history_entry(l.as_str());
                    l
                }
                Err(_) => break,
            }
        } else {
            print!("{prompt}");
            io::stdout().flush()?;
            let mut buf = String::new();
            if io::stdin().read_line(&mut buf)? == 0 {
                break;
            }
            buf
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }
        let start = Instant::now();
        match run_command(store, line) {
            Ok(out) => {
                if !out.is_empty() {
                    println!("{out}");
                }
                println!("({:.2?})", start.elapsed());
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(())
}

fn run_command(store: &EntityStore, line: &str) -> Result<String> {
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let out = match cmd {
        "query" => {
            let filter: Filter = serde_json::from_str(rest)?;
            let keys: Vec<String> = store.query(&filter)?.iter().map(ToString::to_string).collect();
            keys.join("\n")
        }
        "rows" => {
            let filter: Filter = serde_json::from_str(rest)?;
            let rows: Vec<String> = store
                .query_rows(&filter, usize::MAX, 0)?
                .into_iter()
                .map(|(pk, v)| row_json(&pk, v).to_string())
                .collect();
            rows.join("\n")
        }
        "get" => match store.resolve_key(rest).and_then(|pk| store.get(&pk)) {
            Some(v) => serde_json::to_string_pretty(&v)?,
            None => "not found".to_string(),
        },
        "set" => {
            let mut parts = rest.splitn(3, ' ');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(pk), Some(path), Some(json)) => {
                    let value: Value = serde_json::from_str(json)?;
                    let pk = store.resolve_key(pk).ok_or(SiftError::NotFound)?;
                    store.set_field(&pk, path, value)?;
                    "ok".to_string()
                }
                _ => "usage: set <pk> <path> <json>".to_string(),
            }
        }
        "del" => match store.resolve_key(rest).and_then(|pk| store.remove(&pk)) {
            Some(_) => "deleted".to_string(),
            None => "not found".to_string(),
        },
        "index" if !rest.is_empty() => {
            store.index_field(rest);
            "ok".to_string()
        }
        "stats" => format_stats(store),
        _ => "unknown command".to_string(),
    };
    Ok(out)
}
