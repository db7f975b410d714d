//! Healthtrack CLI - Command-line interface for the Healthtrack engine
//!
//! Commands:
//! - report: Generate a health report from reading rows
//! - series: Build the chart series of one metric
//! - classify: Classify each reading against the reference table
//! - validate: Validate reading rows against health.reading.v1
//! - references: Print the active reference table
//! - doctor: Diagnose configuration and environment
//! - schema: Print input/output schema information

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

use healthtrack::pipeline::parse_date;
use healthtrack::types::{AdherenceSummary, ClassifiedReading, MetricType, Reading};
use healthtrack::{
    EngineConfig, EngineError, ReadingAdapter, ReferenceTable, ReportEngine, ReportRequest,
    ENGINE_VERSION, PRODUCER_NAME, SCHEMA_VERSION,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Healthtrack - Classification, series and reports for family health measurements
#[derive(Parser)]
#[command(name = "healthtrack")]
#[command(author = "Healthtrack Contributors")]
#[command(version = ENGINE_VERSION)]
#[command(
    about = "Turn health readings into status tiers, chart series and reports",
    long_about = None
)]
struct Cli {
    /// Log output format (logs go to stderr, level from RUST_LOG)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a report over an inclusive date range
    Report {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// First report day (YYYY-MM-DD)
        #[arg(long)]
        start: String,

        /// Last report day (YYYY-MM-DD)
        #[arg(long)]
        end: String,

        /// Subject the readings belong to
        #[arg(long)]
        subject: Option<String>,

        /// Medication adherence summaries (JSON array)
        #[arg(long)]
        adherence: Option<PathBuf>,

        /// Metrics to report, comma separated (default: every metric present)
        #[arg(long, value_delimiter = ',')]
        metrics: Option<Vec<String>>,

        /// Engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Wrap the report with an id and generation time
        #[arg(long)]
        envelope: bool,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Build the bucketed series of one metric
    Series {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Metric name, e.g. "weight" or "blood_pressure"
        #[arg(short, long)]
        metric: String,

        /// First day (YYYY-MM-DD)
        #[arg(long)]
        start: String,

        /// Last day (YYYY-MM-DD)
        #[arg(long)]
        end: String,

        /// Engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Classify each reading (one classified reading per output line)
    Classify {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Validate reading rows
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the reference table in effect
    References {
        /// Engine configuration file (default: built-in clinical ranges)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Check an engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input or output)
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON
    Ndjson,
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input schema (health.reading.v1)
    Input,
    /// Output schema (report document)
    Output,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_format);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let error = serde_json::to_string(&CliError::from(e))
                .unwrap_or_else(|_| "Unknown error".to_string());
            eprintln!("{error}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(cli: Cli) -> Result<(), HealthtrackCliError> {
    match cli.command {
        Commands::Report {
            input,
            start,
            end,
            subject,
            adherence,
            metrics,
            config,
            envelope,
            output_format,
        } => cmd_report(
            &input,
            &start,
            &end,
            subject,
            adherence.as_deref(),
            metrics,
            config.as_deref(),
            envelope,
            output_format,
        ),

        Commands::Series {
            input,
            metric,
            start,
            end,
            config,
            output_format,
        } => cmd_series(&input, &metric, &start, &end, config.as_deref(), output_format),

        Commands::Classify {
            input,
            config,
            output_format,
        } => cmd_classify(&input, config.as_deref(), output_format),

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::References { config } => cmd_references(config.as_deref()),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),

        Commands::Schema { schema_type, json_schema } => cmd_schema(schema_type, json_schema),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_report(
    input: &Path,
    start: &str,
    end: &str,
    subject: Option<String>,
    adherence: Option<&Path>,
    metrics: Option<Vec<String>>,
    config: Option<&Path>,
    envelope: bool,
    output_format: OutputFormat,
) -> Result<(), HealthtrackCliError> {
    let engine = load_engine(config)?;
    let readings = read_readings(input)?;

    let mut request = ReportRequest::new(parse_date(start)?, parse_date(end)?, readings);
    request.subject_id = subject;
    request.metrics = metrics
        .map(|names| {
            names
                .iter()
                .map(|name| MetricType::from_str(name))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;

    if let Some(path) = adherence {
        let content = fs::read_to_string(path)?;
        let summaries: Vec<AdherenceSummary> = serde_json::from_str(&content)?;
        debug!(regimens = summaries.len(), "Loaded adherence summaries");
        request.adherence = Some(summaries);
    }

    let output = if envelope {
        format_output(&engine.generate_envelope(&request)?, &output_format)?
    } else {
        format_output(&engine.generate_report(&request)?, &output_format)?
    };
    println!("{}", output);
    Ok(())
}

fn cmd_series(
    input: &Path,
    metric: &str,
    start: &str,
    end: &str,
    config: Option<&Path>,
    output_format: OutputFormat,
) -> Result<(), HealthtrackCliError> {
    let engine = load_engine(config)?;
    let metric = MetricType::from_str(metric)?;
    let readings = read_readings(input)?;

    let series = engine.build_series(&readings, metric, parse_date(start)?, parse_date(end)?)?;
    info!(
        metric = %metric,
        buckets = series.buckets.len(),
        readings = series.readings.len(),
        "Built series"
    );
    println!("{}", format_output(&series, &output_format)?);
    Ok(())
}

fn cmd_classify(
    input: &Path,
    config: Option<&Path>,
    output_format: OutputFormat,
) -> Result<(), HealthtrackCliError> {
    let engine = load_engine(config)?;
    let readings = read_readings(input)?;
    if readings.is_empty() {
        return Err(HealthtrackCliError::NoReadings);
    }

    let classified = readings
        .iter()
        .map(|reading| engine.classify(reading))
        .collect::<Result<Vec<ClassifiedReading>, _>>()?;

    let output = match output_format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for reading in &classified {
                lines.push(serde_json::to_string(reading)?);
            }
            lines.join("\n")
        }
        other => format_output(&classified, &other)?,
    };
    println!("{}", output);
    Ok(())
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), HealthtrackCliError> {
    let records = ReadingAdapter::parse_auto(&read_input(input)?)?;
    let results = ReadingAdapter::validate_records(&records);

    let report = ValidationReport {
        total_readings: records.len(),
        valid_readings: records.len() - results.len(),
        invalid_readings: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                source_id: r.source_id.clone(),
                error: r.error.clone(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total readings:   {}", report.total_readings);
        println!("Valid readings:   {}", report.valid_readings);
        println!("Invalid readings: {}", report.invalid_readings);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Reading {} (index {}): {}", err.source_id, err.index, err.error);
            }
        }
    }

    if report.invalid_readings > 0 {
        Err(HealthtrackCliError::ValidationFailed(report.invalid_readings))
    } else {
        Ok(())
    }
}

fn cmd_references(config: Option<&Path>) -> Result<(), HealthtrackCliError> {
    let engine = load_engine(config)?;
    println!("{}", engine.save_references()?);
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), HealthtrackCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Healthtrack version {}", ENGINE_VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Input schema: {}", SCHEMA_VERSION),
    });

    let defaults = ReferenceTable::clinical_defaults();
    checks.push(match defaults.validate() {
        Ok(()) => DoctorCheck {
            name: "default_references".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "Built-in reference table covers {} metrics",
                defaults.metrics().count()
            ),
        },
        Err(e) => DoctorCheck {
            name: "default_references".to_string(),
            status: CheckStatus::Error,
            message: format!("Built-in reference table invalid: {}", e),
        },
    });

    if let Some(config_path) = config {
        let check = if !config_path.exists() {
            DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Config file does not exist".to_string(),
            }
        } else {
            match fs::read_to_string(config_path) {
                Ok(content) => match EngineConfig::from_json(&content) {
                    Ok(parsed) => DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "Config valid ({} metrics, UTC offset {} min)",
                            parsed.references.metrics().count(),
                            parsed.utc_offset_minutes
                        ),
                    },
                    Err(e) => DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Error,
                        message: format!("Invalid config: {}", e),
                    },
                },
                Err(e) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read config file: {}", e),
                },
            }
        };
        checks.push(check);
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (ready for --input -)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Healthtrack Doctor Report");
        println!("=========================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(HealthtrackCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), HealthtrackCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", get_input_json_schema());
            } else {
                println!("Input Schema: {}", SCHEMA_VERSION);
                println!();
                println!("One row per reading, as a JSON array or NDJSON:");
                println!();
                println!("- metric_type: glucose, blood_pressure, heart_rate, weight,");
                println!("  temperature, oxygen_saturation, stress_level, other");
                println!("- value: numeric value (all metrics except blood_pressure)");
                println!("- systolic, diastolic: mmHg (blood_pressure only)");
                println!("- sub_type: e.g. fasting, postprandial, random (optional)");
                println!("- unit: optional; mmol/L, lb and °F are converted");
                println!("- taken_at: RFC 3339 timestamp");
                println!("- source_id: identifier of the stored reading");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", get_output_json_schema());
            } else {
                println!("Output Schema: report document");
                println!();
                println!("- date_range: {{ start, end }}");
                println!("- sections: Overview, one per metric, Medication adherence");
                println!("  - title, narrative, data, chart_series (buckets with min/max/mean)");
                println!("- summary: {{ key_findings, recommendations, flags }}");
                println!("  - flags: {{ severity, metric, message, detail }}");
                println!("- metrics: {{ total_readings, averages, status_counts, adherence }}");
            }
        }
    }

    Ok(())
}

// Helper functions

fn read_input(input: &Path) -> Result<String, HealthtrackCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn read_readings(input: &Path) -> Result<Vec<Reading>, HealthtrackCliError> {
    let records = ReadingAdapter::parse_auto(&read_input(input)?)?;
    let readings = ReadingAdapter::to_readings(records)?;
    debug!(readings = readings.len(), "Loaded readings");
    Ok(readings)
}

fn load_engine(config: Option<&Path>) -> Result<ReportEngine, HealthtrackCliError> {
    match config {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            let engine = ReportEngine::with_config(EngineConfig::from_json(&content)?)?;
            info!(path = %path.display(), "Loaded engine config");
            Ok(engine)
        }
        None => Ok(ReportEngine::new()),
    }
}

fn format_output<T: serde::Serialize>(
    value: &T,
    format: &OutputFormat,
) -> Result<String, HealthtrackCliError> {
    match format {
        OutputFormat::Ndjson | OutputFormat::Json => Ok(serde_json::to_string(value)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(value)?),
    }
}

fn get_input_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "health.reading.v1",
        "title": "health.reading.v1",
        "description": "Healthtrack reading row",
        "type": "object",
        "required": ["metric_type", "taken_at", "source_id"],
        "properties": {
            "schema_version": { "type": "string", "const": SCHEMA_VERSION },
            "metric_type": {
                "type": "string",
                "enum": [
                    "glucose", "blood_pressure", "heart_rate", "weight",
                    "temperature", "oxygen_saturation", "stress_level", "other"
                ]
            },
            "sub_type": { "type": "string" },
            "value": { "type": "number" },
            "systolic": { "type": "number" },
            "diastolic": { "type": "number" },
            "unit": { "type": "string" },
            "taken_at": { "type": "string", "format": "date-time" },
            "source_id": { "type": "string" }
        }
    })
    .to_string()
}

fn get_output_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "healthtrack.report",
        "description": "Healthtrack report document",
        "type": "object",
        "required": ["date_range", "sections", "summary", "metrics"],
        "properties": {
            "subject_id": { "type": "string" },
            "date_range": {
                "type": "object",
                "properties": {
                    "start": { "type": "string", "format": "date" },
                    "end": { "type": "string", "format": "date" }
                }
            },
            "sections": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "narrative": { "type": "string" },
                        "data": { "type": "object" },
                        "chart_series": { "type": "object" }
                    }
                }
            },
            "summary": {
                "type": "object",
                "properties": {
                    "key_findings": { "type": "array", "items": { "type": "string" } },
                    "recommendations": { "type": "array", "items": { "type": "string" } },
                    "flags": { "type": "array", "items": { "type": "object" } }
                }
            },
            "metrics": { "type": "object" }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum HealthtrackCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    NoReadings,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for HealthtrackCliError {
    fn from(e: io::Error) -> Self {
        HealthtrackCliError::Io(e)
    }
}

impl From<EngineError> for HealthtrackCliError {
    fn from(e: EngineError) -> Self {
        HealthtrackCliError::Engine(e)
    }
}

impl From<serde_json::Error> for HealthtrackCliError {
    fn from(e: serde_json::Error) -> Self {
        HealthtrackCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<HealthtrackCliError> for CliError {
    fn from(e: HealthtrackCliError) -> Self {
        match e {
            HealthtrackCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            HealthtrackCliError::Engine(e) => {
                let (code, hint) = match &e {
                    EngineError::InvalidRange { .. } => {
                        ("INVALID_RANGE", "The end date must not precede the start date")
                    }
                    EngineError::UnsupportedMetricType(_) => {
                        ("UNSUPPORTED_METRIC", "Run 'healthtrack schema input' for metric names")
                    }
                    EngineError::InvalidReference(_) => {
                        ("INVALID_REFERENCE", "Check reference ranges in the config file")
                    }
                    EngineError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
                    _ => ("PARSE_ERROR", "Ensure input matches health.reading.v1 schema"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            HealthtrackCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            HealthtrackCliError::NoReadings => CliError {
                code: "NO_READINGS".to_string(),
                message: "No readings found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            HealthtrackCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} readings failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            HealthtrackCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_readings: usize,
    valid_readings: usize,
    invalid_readings: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    source_id: String,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
