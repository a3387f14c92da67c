use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sqlshuttle::config::{CompressionType, ExportConfig, ExportFormat, LoggingConfig};
use sqlshuttle::export::Exporter;
use sqlshuttle::{db, import, logging, ConnParams, DbKind, Table};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sqlshuttle")]
#[command(about = "Move tables between Oracle/PostgreSQL and files", long_about = None)]
struct Cli {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnArgs {
    /// Database type: oracle/postgres
    #[arg(long)]
    db: DbKind,

    /// INI file with connection parameters
    #[arg(short, long, requires = "section")]
    config: Option<String>,

    /// Section of the INI file to use
    #[arg(short, long)]
    section: Option<String>,

    /// Connection parameter key=value, overrides the INI file
    #[arg(short = 'p', long = "param")]
    params: Vec<String>,
}

impl ConnArgs {
    fn resolve(&self) -> Result<ConnParams> {
        let config = match (&self.config, &self.section) {
            (Some(path), Some(section)) => Some((Path::new(path), section.as_str())),
            _ => None,
        };
        let params = db::connection_params(config, &self.params)
            .context("Invalid connection parameters")?;
        Ok(params)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query and print or export the result
    Query {
        #[command(flatten)]
        conn: ConnArgs,

        /// Query SQL or SQL file path
        #[arg(long)]
        sql: String,

        /// Output file; prints to stdout when omitted
        #[arg(short, long)]
        output: Option<String>,

        /// Output format: csv/tsv/custom/json
        #[arg(long, default_value = "csv")]
        format: String,

        /// Delimiter for csv/custom
        #[arg(long, default_value = ",")]
        delimiter: String,

        /// Include header row
        #[arg(long, default_value = "false")]
        header: bool,

        /// Buffer size in bytes
        #[arg(long, default_value = "1048576")]
        buffer_size: usize,

        /// Compression type: none/gzip
        #[arg(long, default_value = "none")]
        compression: String,
    },

    /// Run and commit a statement (DELETE, TRUNCATE, DDL)
    Execute {
        #[command(flatten)]
        conn: ConnArgs,

        /// SQL or SQL file path
        #[arg(long)]
        sql: String,
    },

    /// Upload a delimited file into a table
    Upload {
        #[command(flatten)]
        conn: ConnArgs,

        /// Destination table, optionally schema-qualified
        #[arg(short, long)]
        table: String,

        /// Input file; the first record is the header
        #[arg(short, long)]
        input: String,

        /// Field delimiter of the input file
        #[arg(long, default_value = ",")]
        delimiter: String,
    },
}

/// Read SQL text given either inline or as a file path
fn read_query_or_file(input: &str) -> Result<String> {
    let path = Path::new(input);
    if path.is_file() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read SQL file {}", input))?;
        Ok(content.trim().to_string())
    } else {
        Ok(input.to_string())
    }
}

fn single_byte(delimiter: &str) -> Result<u8> {
    match delimiter.as_bytes() {
        [b] => Ok(*b),
        _ if delimiter == "\\t" => Ok(b'\t'),
        _ => anyhow::bail!("Delimiter must be a single byte: {:?}", delimiter),
    }
}

fn print_table(table: &Table, format: &str, delimiter: u8, header: bool) -> Result<()> {
    let stdout = io::stdout();
    if format.eq_ignore_ascii_case("json") {
        serde_json::to_writer_pretty(stdout.lock(), table)?;
        println!();
        return Ok(());
    }
    let delimiter = if ExportFormat::parse(format) == ExportFormat::Tsv {
        b'\t'
    } else {
        delimiter
    };
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(stdout.lock());
    if header {
        writer.write_record(table.columns())?;
    }
    for row in table.rows() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Query {
            conn,
            sql,
            output,
            format,
            delimiter,
            header,
            buffer_size,
            compression,
        } => {
            let params = conn.resolve()?;
            let sql = read_query_or_file(&sql)?;
            let database = db::open(conn.db, params);

            info!("Querying {} database...", conn.db);
            let table = database.get_data(&sql).context("Query failed")?;

            match output {
                Some(output_file) if !format.eq_ignore_ascii_case("json") => {
                    let export_config = ExportConfig {
                        output_file,
                        format: ExportFormat::parse(&format),
                        delimiter,
                        include_header: header,
                        buffer_size,
                        compression: CompressionType::parse(&compression),
                    };
                    let stats = Exporter::new(export_config).export(&table)?;
                    stats.print_summary();
                }
                Some(output_file) => {
                    let file = fs::File::create(&output_file)
                        .with_context(|| format!("Failed to create output file {}", output_file))?;
                    serde_json::to_writer_pretty(io::BufWriter::new(file), &table)?;
                    info!("Wrote {} rows to {}", table.row_count(), output_file);
                }
                None => print_table(&table, &format, single_byte(&delimiter)?, header)?,
            }
            Ok(())
        }
        Commands::Execute { conn, sql } => {
            let params = conn.resolve()?;
            let sql = read_query_or_file(&sql)?;
            db::open(conn.db, params)
                .execute(&sql)
                .context("Statement failed")?;
            info!("Statement committed");
            Ok(())
        }
        Commands::Upload {
            conn,
            table,
            input,
            delimiter,
        } => {
            let params = conn.resolve()?;
            let data = import::read_csv(&input, single_byte(&delimiter)?)?;
            info!(
                "Uploading {} rows x {} columns from {} into {}",
                data.row_count(),
                data.column_count(),
                input,
                table
            );
            let report = db::open(conn.db, params)
                .upload_data(&table, &data)
                .with_context(|| format!("Upload into {} failed", table))?;
            info!("Upload completed: {} rows inserted", report.rows_inserted);
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&LoggingConfig {
        log_file: cli.log_file.clone(),
        verbose: cli.verbose,
    })?;

    run(cli.command).map_err(|e| {
        error!("{:#}", e);
        e
    })
}
