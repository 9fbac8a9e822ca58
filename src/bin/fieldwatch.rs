//! Fieldwatch CLI
//!
//! Commands:
//! - serve: Run the HTTP / WebSocket monitoring service
//! - replay: Push recorded ingestion requests through a fresh monitor
//! - validate: Validate ingestion requests
//! - config: Print the default configuration
//! - doctor: Diagnose configuration and environment

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use fieldwatch::api::{create_router, AppState};
use fieldwatch::schema::{IngestAdapter, IngestRequest};
use fieldwatch::{IngestOutcome, Monitor, MonitorConfig, MonitorError, FIELDWATCH_VERSION, SERVICE_NAME};

/// Fieldwatch - Live risk monitoring for first-responder telemetry
#[derive(Parser)]
#[command(name = "fieldwatch")]
#[command(version = FIELDWATCH_VERSION)]
#[command(about = "Score officer telemetry and fan out live state", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP / WebSocket service
    Serve {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the bind address, e.g. 127.0.0.1:8000
        #[arg(long)]
        bind: Option<String>,
    },

    /// Replay ingestion requests through a fresh monitor
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate ingestion requests
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration
    Config {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Configuration file to check
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one request per line)
    Ndjson,
    /// JSON array of requests
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one outcome per line)
    Ndjson,
    /// JSON array of outcomes
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

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

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fieldwatch=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), FieldwatchCliError> {
    match cli.command {
        Commands::Serve { config, bind } => cmd_serve(config.as_deref(), bind),

        Commands::Replay {
            input,
            output,
            input_format,
            output_format,
            config,
        } => cmd_replay(&input, &output, input_format, output_format, config.as_deref()),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Config { output } => cmd_config(output.as_deref()),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>) -> Result<MonitorConfig, FieldwatchCliError> {
    match path {
        Some(path) => Ok(MonitorConfig::from_file(path)?),
        None => Ok(MonitorConfig::default()),
    }
}

fn read_input(input: &Path) -> Result<String, FieldwatchCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn parse_requests(data: &str, format: &InputFormat) -> Result<Vec<IngestRequest>, FieldwatchCliError> {
    let requests = match format {
        InputFormat::Ndjson => IngestAdapter::parse_ndjson(data)?,
        InputFormat::Json => IngestAdapter::parse_array(data)?,
    };
    if requests.is_empty() {
        return Err(FieldwatchCliError::NoRequests);
    }
    Ok(requests)
}

fn cmd_serve(config_path: Option<&Path>, bind: Option<String>) -> Result<(), FieldwatchCliError> {
    let mut config = load_config(config_path)?;
    if let Some(bind) = bind {
        config.server.bind_addr = bind;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async move {
        let monitor = Arc::new(Monitor::new(config)?);
        let handle = monitor.start();
        let addr = monitor.config().server.bind_addr.clone();

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(addr = %addr, version = FIELDWATCH_VERSION, "Serving");

        let app = create_router(AppState::new(monitor));
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        handle.shutdown();
        result?;
        Ok::<(), FieldwatchCliError>(())
    })
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config_path: Option<&Path>,
) -> Result<(), FieldwatchCliError> {
    let config = load_config(config_path)?;
    let requests = parse_requests(&read_input(input)?, &input_format)?;
    let monitor = Monitor::new(config)?;

    let entries: Vec<ReplayEntry> = requests
        .iter()
        .enumerate()
        .map(|(index, request)| match monitor.ingest(request) {
            Ok(outcome) => ReplayEntry {
                index,
                officer_id: request.officer_id.clone(),
                outcome: Some(outcome),
                error: None,
            },
            Err(e) => ReplayEntry {
                index,
                officer_id: request.officer_id.clone(),
                outcome: None,
                error: Some(e.to_string()),
            },
        })
        .collect();

    let output_data = format_output(&entries, &output_format)?;
    if output.to_string_lossy() == "-" {
        let mut stdout = io::stdout();
        write!(stdout, "{}", output_data)?;
        stdout.flush()?;
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), FieldwatchCliError> {
    let requests = parse_requests(&read_input(input)?, &input_format)?;
    let results = IngestAdapter::validate_requests(&requests);

    let report = ValidationReport {
        total_requests: requests.len(),
        valid_requests: requests.len() - results.len(),
        invalid_requests: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                officer_id: r.officer_id.clone(),
                field: r.result.as_ref().map(|e| e.field().to_string()),
                error: r.result.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total requests:   {}", report.total_requests);
        println!("Valid requests:   {}", report.valid_requests);
        println!("Invalid requests: {}", report.invalid_requests);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Officer {} (index {}): {}", err.officer_id, err.index, err.error);
            }
        }
    }

    if report.invalid_requests > 0 {
        Err(FieldwatchCliError::ValidationFailed(report.invalid_requests))
    } else {
        Ok(())
    }
}

fn cmd_config(output: Option<&Path>) -> Result<(), FieldwatchCliError> {
    let json = MonitorConfig::default().to_json_pretty()?;
    match output {
        Some(path) => fs::write(path, json + "\n")?,
        None => println!("{}", json),
    }
    Ok(())
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), FieldwatchCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Fieldwatch version {}", FIELDWATCH_VERSION),
    });

    let config = match config_path {
        Some(path) if !path.exists() => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Config file does not exist, defaults apply".to_string(),
            });
            MonitorConfig::default()
        }
        Some(path) => match MonitorConfig::from_file(path) {
            Ok(config) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Config file valid ({})", path.display()),
                });
                config
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                });
                MonitorConfig::default()
            }
        },
        None => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: "No config file given, defaults apply".to_string(),
            });
            MonitorConfig::default()
        }
    };

    checks.push(match config.server.bind_addr.parse::<std::net::SocketAddr>() {
        Ok(addr) => DoctorCheck {
            name: "bind_addr".to_string(),
            status: CheckStatus::Ok,
            message: format!("Will listen on {}", addr),
        },
        Err(e) => DoctorCheck {
            name: "bind_addr".to_string(),
            status: CheckStatus::Error,
            message: format!("Invalid bind address {:?}: {}", config.server.bind_addr, e),
        },
    });

    checks.push(DoctorCheck {
        name: "feed".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "Feed mode {:?}, {} messages buffered per subscriber",
            config.feed.mode, config.fanout.buffer_capacity
        ),
    });

    // Replay reads stdin when given "-"
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
            message: "stdin is a pipe (replay from stdin ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        service: SERVICE_NAME.to_string(),
        version: FIELDWATCH_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Fieldwatch Doctor Report");
        println!("========================");
        println!("Service: {}", report.service);
        println!("Version: {}", report.version);
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
        Err(FieldwatchCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn format_output(entries: &[ReplayEntry], format: &OutputFormat) -> Result<String, FieldwatchCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for entry in entries {
                lines.push(serde_json::to_string(entry)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(entries)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(entries)?),
    }
}

// Error types

#[derive(Debug)]
enum FieldwatchCliError {
    Io(io::Error),
    Monitor(MonitorError),
    Json(serde_json::Error),
    NoRequests,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for FieldwatchCliError {
    fn from(e: io::Error) -> Self {
        FieldwatchCliError::Io(e)
    }
}

impl From<MonitorError> for FieldwatchCliError {
    fn from(e: MonitorError) -> Self {
        FieldwatchCliError::Monitor(e)
    }
}

impl From<serde_json::Error> for FieldwatchCliError {
    fn from(e: serde_json::Error) -> Self {
        FieldwatchCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FieldwatchCliError> for CliError {
    fn from(e: FieldwatchCliError) -> Self {
        match e {
            FieldwatchCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths, permissions and the bind address".to_string()),
            },
            FieldwatchCliError::Monitor(e) => {
                let hint = match &e {
                    MonitorError::Validation(_) => "Run 'fieldwatch validate' to locate the bad request",
                    MonitorError::OfficerNotFound(_) => "Ingest telemetry for the officer first",
                    MonitorError::Precondition(_) => "Check the officer's current state",
                    MonitorError::ParseError(_) => "Ensure input contains ingestion requests",
                    MonitorError::JsonError(_) => "Check JSON syntax",
                    MonitorError::ConfigError(_) => "Run 'fieldwatch config' for a valid starting point",
                    MonitorError::Io(_) => "Check file paths and permissions",
                    MonitorError::RecordLog(_) => "Check the record log backend",
                };
                CliError {
                    code: e.code().to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            FieldwatchCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            FieldwatchCliError::NoRequests => CliError {
                code: "NO_REQUESTS".to_string(),
                message: "No ingestion requests found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            FieldwatchCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} requests failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            FieldwatchCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct ReplayEntry {
    index: usize,
    officer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<IngestOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ValidationReport {
    total_requests: usize,
    valid_requests: usize,
    invalid_requests: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(Serialize)]
struct ValidationErrorDetail {
    index: usize,
    officer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    error: String,
}

#[derive(Serialize)]
struct DoctorReport {
    service: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
