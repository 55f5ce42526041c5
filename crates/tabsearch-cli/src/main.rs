//! `tabsearch` - load delimited files into a search index and pull filtered
//! rows back out.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tabsearch_core::ingest::DISPLAY_CAP;
use tabsearch_core::{
    prepare, tabular, ColumnSelection, Config, ExtractRequest, FailureKind, IdSource,
    IngestReport, PreparedDataset, Session, TermsFilter,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Schema-driven CSV ingestion into Elasticsearch, and extraction back to CSV
#[derive(Parser, Debug)]
#[command(name = "tabsearch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true, env = "TABSEARCH_CONFIG")]
    config: Option<PathBuf>,

    /// Search engine base URL
    #[arg(long, global = true, env = "ES_HOST")]
    url: Option<String>,

    /// Basic auth user
    #[arg(long, global = true, env = "ES_USER")]
    username: Option<String>,

    /// Basic auth password
    #[arg(long, global = true, env = "ES_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// API key, used instead of basic auth when set
    #[arg(long, global = true, env = "ES_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Schema definition file (`column name`, `data type`, `format`)
    #[arg(short, long)]
    schema: PathBuf,

    /// Data file with a header row
    #[arg(short, long)]
    data: PathBuf,

    /// Field delimiter of both files
    #[arg(long, env = "TABSEARCH_DELIMITER")]
    delimiter: Option<char>,

    /// Edited schema JSON replacing the derived schema
    #[arg(long)]
    schema_json: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the derived schema JSON and date detection results
    Prepare {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Drop and recreate an index from the derived schema
    CreateIndex {
        #[command(flatten)]
        input: InputArgs,

        /// Target index
        #[arg(short, long, env = "TABSEARCH_INDEX")]
        index: Option<String>,
    },
    /// Validate ids and bulk-write every row
    Upload {
        #[command(flatten)]
        input: InputArgs,

        /// Target index
        #[arg(short, long, env = "TABSEARCH_INDEX")]
        index: Option<String>,

        /// Column holding document ids; ids are generated when absent
        #[arg(long, env = "TABSEARCH_ID_COLUMN")]
        id_column: Option<String>,

        /// Recreate the index from the schema before writing
        #[arg(long)]
        create_index: bool,
    },
    /// List indices whose name contains a keyword
    Indices {
        /// Case-insensitive name filter
        #[arg(default_value = "")]
        keyword: String,
    },
    /// Show the field names of a sampled document
    Columns {
        index: String,
    },
    /// Show the most frequent values of a column
    Facets {
        index: String,
        column: String,
    },
    /// Extract documents within a date range as CSV
    Extract {
        index: String,

        /// Epoch date field to filter on
        #[arg(long)]
        date_field: String,

        /// First day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,

        /// Field for the value filter
        #[arg(long, requires = "value")]
        filter_field: Option<String>,

        /// Accepted filter value (repeatable)
        #[arg(long = "value")]
        value: Vec<String>,

        /// Output column (repeatable); omit or pass "Select All" for every column
        #[arg(long = "column")]
        column: Vec<String>,

        /// Maximum documents to return
        #[arg(long)]
        max_hits: Option<usize>,

        /// CSV output file; stdout when absent
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(url) = &cli.url {
        config.client.url.clone_from(url);
    }
    if cli.username.is_some() {
        config.client.username.clone_from(&cli.username);
    }
    if cli.password.is_some() {
        config.client.password.clone_from(&cli.password);
    }
    if cli.api_key.is_some() {
        config.client.api_key.clone_from(&cli.api_key);
    }
    config.validate()?;
    Ok(config)
}

fn delimiter_byte(input: &InputArgs, config: &Config) -> anyhow::Result<u8> {
    let delimiter = input.delimiter.unwrap_or(config.ingest.delimiter);
    u8::try_from(delimiter)
        .ok()
        .filter(u8::is_ascii)
        .with_context(|| format!("Delimiter '{delimiter}' is not a single ASCII character"))
}

fn read_schema_json(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema JSON {}", path.display()))
}

/// Reads both inputs, normalizes dates, and applies an edited schema if given.
fn load_prepared(input: &InputArgs, config: &Config) -> anyhow::Result<PreparedDataset> {
    let delimiter = delimiter_byte(input, config)?;
    let schema = tabular::read_schema_definition_file(&input.schema, delimiter)
        .with_context(|| format!("Failed to read schema definition {}", input.schema.display()))?;
    let data = tabular::read_data_table_file(&input.data, delimiter)
        .with_context(|| format!("Failed to read data file {}", input.data.display()))?;

    let mut prepared = prepare(schema, data)?;
    for (source, derived, pattern) in &prepared.coercion.converted {
        tracing::info!("Date column {source} parsed with {pattern}, stored as {derived}");
    }
    for diagnostic in &prepared.coercion.diagnostics {
        tracing::warn!("Column {}: {}", diagnostic.column, diagnostic.message);
    }

    if let Some(path) = &input.schema_json {
        prepared.apply_schema_edit(&read_schema_json(path)?)?;
        tracing::info!("Schema replaced from {}", path.display());
    }
    Ok(prepared)
}

fn index_name(index: Option<String>, config: &Config) -> String {
    index.unwrap_or_else(|| config.ingest.index.clone())
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn print_report(report: &IngestReport) {
    println!("Rows:    {}", report.total);
    println!("Indexed: {}", report.indexed);
    if report.is_complete_success() {
        println!("All rows indexed.");
        return;
    }
    println!(
        "Failed:  {} ({} conversion, {} rejected by engine)",
        report.failed.len(),
        report.count_of(FailureKind::RowConversion),
        report.count_of(FailureKind::DocumentIndex)
    );
    for failed in report.displayed_failures() {
        let cells: Vec<String> = failed
            .row
            .iter()
            .map(|(column, value)| format!("{column}={value}"))
            .collect();
        println!(
            "  row {} [{}] {}: {}",
            failed.row_number,
            failed.kind,
            cells.join(", "),
            failed.reason
        );
    }
    if report.failed.len() > DISPLAY_CAP {
        println!("  ... and {} more", report.failed.len() - DISPLAY_CAP);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    if let Command::Prepare { input } = &cli.command {
        let prepared = load_prepared(input, &config)?;
        println!("{}", prepared.schema.to_json_pretty()?);
        return Ok(());
    }

    let session = Session::connect(config.clone())?;

    match cli.command {
        Command::Prepare { .. } => {}
        Command::CreateIndex { input, index } => {
            let prepared = load_prepared(&input, &config)?;
            let index = index_name(index, &config);
            let mapping = session.create_index(&index, &prepared.schema).await?;
            println!("Index '{index}' created with {} mapped fields.", mapping.properties.len());
        }
        Command::Upload {
            input,
            index,
            id_column,
            create_index,
        } => {
            let prepared = load_prepared(&input, &config)?;
            let index = index_name(index, &config);
            let id_source =
                IdSource::from_column(id_column.as_deref().or(config.ingest.id_column.as_deref()));

            if create_index {
                session.create_index(&index, &prepared.schema).await?;
            }

            let spinner = create_spinner(format!(
                "Uploading {} rows to '{index}'...",
                prepared.data.len()
            ));
            let result = session.upload(&index, id_source, &prepared.data).await;
            spinner.finish_and_clear();
            print_report(&result?);
        }
        Command::Indices { keyword } => {
            let names = session.list_indices(&keyword).await?;
            if names.is_empty() {
                println!("No indices found.");
            }
            for name in names {
                println!("{name}");
            }
        }
        Command::Columns { index } => {
            for column in session.columns(&index).await? {
                println!("{column}");
            }
        }
        Command::Facets { index, column } => {
            for value in session.facets(&index, &column).await? {
                match value {
                    serde_json::Value::String(s) => println!("{s}"),
                    other => println!("{other}"),
                }
            }
        }
        Command::Extract {
            index,
            date_field,
            start,
            end,
            filter_field,
            value,
            column,
            max_hits,
            output,
        } => {
            if start > end {
                bail!("Start date {start} is after end date {end}");
            }
            let request = ExtractRequest {
                index,
                date_field,
                start,
                end,
                filter: filter_field.map(|field| TermsFilter {
                    field,
                    values: value.into_iter().map(serde_json::Value::String).collect(),
                }),
                columns: ColumnSelection::from_choices(&column),
                max_hits: max_hits.unwrap_or(config.extract.max_hits),
            };
            let table = session.extract(&request).await?;

            match output {
                Some(path) => match tabular::save_csv(&table, &path) {
                    Ok(()) => println!("Saved {} rows to {}", table.len(), path.display()),
                    Err(e) => tracing::error!("Failed to save {}: {e}", path.display()),
                },
                None => tabular::write_csv(&table, io::stdout().lock())?,
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    run(Cli::parse()).await
}
