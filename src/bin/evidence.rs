//! Evidence CLI - Command-line interface for place-evidence
//!
//! Commands:
//! - score: Score raw ping rows into per-device evidence (batch mode)
//! - validate: Check raw rows and report rejections
//! - schema: Print input or output schema information

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use place_evidence::adapter::{RawPingRow, RowAdapter};
use place_evidence::config::EngineConfig;
use place_evidence::pipeline::EvidenceProcessor;
use place_evidence::types::{BatchSummary, DeviceEvidence};
use place_evidence::{ENGINE_VERSION, PRODUCER_NAME};

/// Environment variable holding a tracing filter directive
const LOG_ENV: &str = "EVIDENCE_LOG";

/// Evidence - per-location behavioral scoring from geolocated pings
#[derive(Parser)]
#[command(name = "evidence")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Score device pings into home, work, leisure and pingsink evidence", long_about = None)]
struct Cli {
    /// Log level used when EVIDENCE_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score raw ping rows (batch mode)
    Score {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "csv")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the aggregation geohash precision
        #[arg(long)]
        cell_precision: Option<usize>,

        /// Write the batch summary to this file
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Validate raw rows and report rejections
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "csv")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input or output)
        #[arg(value_enum)]
        schema_type: SchemaType,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// CSV with a header row
    Csv,
    /// Newline-delimited JSON (one row per line)
    Ndjson,
    /// JSON array of rows
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one device per line)
    Ndjson,
    /// JSON array of devices
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Raw ping rows
    Input,
    /// Per-device evidence
    Output,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Install the stderr subscriber. EVIDENCE_LOG wins over `--log-level`.
fn init_logging(fallback: &str) {
    let level = std::env::var(LOG_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<(), EvidenceCliError> {
    match cli.command {
        Commands::Score {
            input,
            output,
            input_format,
            output_format,
            config,
            cell_precision,
            summary,
        } => cmd_score(
            &input,
            &output,
            input_format,
            output_format,
            config.as_deref(),
            cell_precision,
            summary.as_deref(),
        ),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Schema { schema_type } => cmd_schema(schema_type),
    }
}

fn cmd_score(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config_path: Option<&Path>,
    cell_precision: Option<usize>,
    summary_path: Option<&Path>,
) -> Result<(), EvidenceCliError> {
    let mut config = match config_path {
        Some(path) => EngineConfig::from_json(&fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };
    if let Some(precision) = cell_precision {
        config.cell_precision = precision;
    }
    let processor = EvidenceProcessor::with_config(config)?;

    let rows = read_rows(input, &input_format)?;
    if rows.is_empty() {
        return Err(EvidenceCliError::NoRows);
    }

    let result = processor.process_rows(&rows);

    if let Some(path) = summary_path {
        fs::write(path, serde_json::to_string_pretty(&result.summary)?)?;
    }

    let output_data = format_output(&result.devices, &output_format)?;
    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    if result.devices.is_empty() {
        return Err(EvidenceCliError::NoDevices(result.summary));
    }
    Ok(())
}

fn cmd_validate(
    input: &Path,
    input_format: InputFormat,
    json: bool,
) -> Result<(), EvidenceCliError> {
    let rows = read_rows(input, &input_format)?;

    let errors: Vec<RejectionDetail> = rows
        .iter()
        .enumerate()
        .filter_map(|(index, row)| {
            RowAdapter::to_ping(row).err().map(|reason| RejectionDetail {
                index,
                maid: row.device_id().map(str::to_string),
                error: reason.to_string(),
            })
        })
        .collect();

    let report = ValidationReport {
        total_rows: rows.len(),
        valid_rows: rows.len() - errors.len(),
        rejected_rows: errors.len(),
        errors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total rows:    {}", report.total_rows);
        println!("Valid rows:    {}", report.valid_rows);
        println!("Rejected rows: {}", report.rejected_rows);

        if !report.errors.is_empty() {
            println!("\nRejections:");
            for err in &report.errors {
                println!(
                    "  - Row {} (maid {}): {}",
                    err.index,
                    err.maid.as_deref().unwrap_or("unknown"),
                    err.error
                );
            }
        }
    }

    if report.rejected_rows > 0 {
        Err(EvidenceCliError::ValidationFailed(report.rejected_rows))
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType) -> Result<(), EvidenceCliError> {
    match schema_type {
        SchemaType::Input => {
            println!("Input: raw ping rows (CSV header, NDJSON or JSON array)");
            println!();
            println!("- maid: device identifier (required)");
            println!("- latitude: decimal degrees in [-90, 90] (required)");
            println!("- longitude: decimal degrees in [-180, 180] (required)");
            println!("- timestamp: ISO-8601, optional Z or +HH:MM offset; naive means UTC (required)");
            println!("- flux: one of B, C, D, E, F (optional, other values ignored)");
            println!("- geohash: pre-computed cell code (optional)");
        }
        SchemaType::Output => {
            println!("Output: per-device evidence ({} {})", PRODUCER_NAME, ENGINE_VERSION);
            println!();
            println!("- maid, total_pings, rejected_rows");
            println!("- Column arrays, row i of every column describes geohash[i]:");
            println!("  - geohash, pings, first_seen, last_seen, unique_days, span_days");
            println!("  - gap_bins_0d, gap_bins_1_3d, gap_bins_4_7d, gap_bins_8_30d, gap_bins_gt_30d");
            println!("  - night_ratio, weekday_day_ratio, weekend_ratio, midday_weekday_ratio, evening_ratio");
            println!("  - night_days_ratio, weekday_work_days_ratio, late_evening_days_ratio, early_morning_days_ratio");
            println!("  - active_day_ratio, active_days_last_30d, entropy_hour_norm, monthly_stability");
            println!("  - mean_lat, mean_lon, mean_geohash, std_geohash_m, mean_time_diff_seconds, est_duration");
            println!("  - flux_B, flux_C, flux_D, flux_E, flux_F");
            println!("  - home_score, work_score, leisure_score, pingsink_score");
        }
    }
    Ok(())
}

// Helper functions

fn read_rows(input: &Path, format: &InputFormat) -> Result<Vec<RawPingRow>, EvidenceCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let rows = match format {
        InputFormat::Csv => RowAdapter::parse_csv(&input_data)?,
        InputFormat::Ndjson => RowAdapter::parse_ndjson(&input_data)?,
        InputFormat::Json => RowAdapter::parse_array(&input_data)?,
    };
    Ok(rows)
}

fn format_output(devices: &[DeviceEvidence], format: &OutputFormat) -> Result<String, EvidenceCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut out = String::new();
            for device in devices {
                out.push_str(&serde_json::to_string(device)?);
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Json => Ok(serde_json::to_string(devices)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(devices)?),
    }
}

// Error types

#[derive(Debug)]
enum EvidenceCliError {
    Io(io::Error),
    Compute(place_evidence::ComputeError),
    Json(serde_json::Error),
    NoRows,
    NoDevices(BatchSummary),
    ValidationFailed(usize),
}

impl From<io::Error> for EvidenceCliError {
    fn from(e: io::Error) -> Self {
        EvidenceCliError::Io(e)
    }
}

impl From<place_evidence::ComputeError> for EvidenceCliError {
    fn from(e: place_evidence::ComputeError) -> Self {
        EvidenceCliError::Compute(e)
    }
}

impl From<serde_json::Error> for EvidenceCliError {
    fn from(e: serde_json::Error) -> Self {
        EvidenceCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<EvidenceCliError> for CliError {
    fn from(e: EvidenceCliError) -> Self {
        match e {
            EvidenceCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            EvidenceCliError::Compute(e) => CliError {
                code: "COMPUTE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the input format and engine configuration".to_string()),
            },
            EvidenceCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            EvidenceCliError::NoRows => CliError {
                code: "NO_ROWS".to_string(),
                message: "No rows found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            EvidenceCliError::NoDevices(summary) => CliError {
                code: "NO_DEVICES".to_string(),
                message: format!(
                    "No device produced evidence ({} rows, {} rejected, {} failed devices)",
                    summary.rows_total,
                    summary.rows_rejected,
                    summary.failures.len()
                ),
                hint: Some("Run 'evidence validate' for details".to_string()),
            },
            EvidenceCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} rows failed validation", count),
                hint: Some("Fix or drop the rejected rows and retry".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_rows: usize,
    valid_rows: usize,
    rejected_rows: usize,
    errors: Vec<RejectionDetail>,
}

#[derive(serde::Serialize)]
struct RejectionDetail {
    index: usize,
    maid: Option<String>,
    error: String,
}
