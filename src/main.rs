use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ocitables::config::ConnectionConfig;
use ocitables::error::format_oci_error;
use ocitables::host::{qual_matches, QueryContext, Qual, Row};
use ocitables::plugin::Plugin;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Rows buffered between the fetch task and the printer
const ROW_BUFFER: usize = 256;

/// Query Oracle Cloud Infrastructure resources as tables
#[derive(Parser, Debug)]
#[command(name = "ocitables", version = ocitables::VERSION, about, long_about = None)]
struct Args {
    /// Connection config file (YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available tables
    Tables,
    /// Show the columns of a table
    Describe {
        table: String,
    },
    /// Query a table, printing one JSON row per line
    Query {
        table: String,

        /// Filter such as `lifecycle_state=RUNNING` or `size_in_gbs>=100`
        #[arg(short, long = "where")]
        quals: Vec<String>,

        /// Columns to return (comma separated); all when omitted
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,

        #[arg(short, long)]
        limit: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("ocitables {} started with log level: {:?}", ocitables::VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("ocitables").join("ocitables.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".ocitables").join("ocitables.log");
    }
    PathBuf::from("ocitables.log")
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let _log_guard = match setup_logging(args.log_level) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Warning: {err:#}");
            None
        },
    };

    if let Err(err) = run(args).await {
        tracing::error!("{:#}", err);
        eprintln!("Error: {}", format_oci_error(&err));
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Tables => {
            for name in ocitables::table::table_names() {
                println!("{}", name);
            }
            Ok(())
        },
        Command::Describe { table } => {
            let table = ocitables::table::get_table(&table).with_context(|| format!("Unknown table: {}", table))?;
            println!("{} - {}", table.name, table.description);
            for column in &table.columns {
                println!(
                    "  {:<32} {:<10} {}",
                    column.name,
                    serde_json::to_value(column.column_type)?
                        .as_str()
                        .unwrap_or_default(),
                    column.description
                );
            }
            Ok(())
        },
        Command::Query {
            table,
            quals,
            columns,
            limit,
        } => {
            let config = ConnectionConfig::load(args.config.as_deref())?;
            let plugin = Plugin::new(config)?;
            let quals = quals.iter().map(|q| Qual::parse(q)).collect::<Result<Vec<_>>>()?;
            query(plugin, &table, quals, columns, limit).await
        },
    }
}

async fn query(plugin: Plugin, table: &str, quals: Vec<Qual>, columns: Vec<String>, limit: Option<u64>) -> Result<()> {
    let mut ctx = QueryContext {
        columns: columns.clone(),
        quals: quals.clone(),
        limit: None,
    };
    // Rows are filtered here after fetching, so the limit can only be
    // pushed down when nothing is filtered
    if quals.is_empty() {
        ctx.limit = limit;
    }
    // Filtered columns must be fetched even when not printed
    if !ctx.columns.is_empty() {
        for qual in &quals {
            if !ctx.columns.contains(&qual.column) {
                ctx.columns.push(qual.column.clone());
            }
        }
    }

    let (tx, mut rx) = mpsc::channel::<Row>(ROW_BUFFER);
    let table_name = table.to_string();
    let fetch = tokio::spawn(async move { plugin.execute(&table_name, &ctx, tx).await });

    let mut printed = 0u64;
    while let Some(row) = rx.recv().await {
        if !quals.iter().all(|q| qual_matches(&row, q)) {
            continue;
        }
        let row: Row = if columns.is_empty() {
            row
        } else {
            columns
                .iter()
                .map(|c| (c.clone(), row.get(c).cloned().unwrap_or_default()))
                .collect()
        };
        println!("{}", serde_json::to_string(&row)?);
        printed += 1;
        if limit.map(|l| printed >= l).unwrap_or(false) {
            break;
        }
    }
    // Hanging up stops the fetch task at its next row
    drop(rx);

    let fetched = fetch.await.context("Query task panicked")??;
    tracing::info!("{}: fetched {} rows, printed {}", table, fetched, printed);
    Ok(())
}
