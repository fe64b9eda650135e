//! attn CLI - Command-line interface for attention-flux
//!
//! Commands:
//! - replay: Run recorded page signals through the state machine
//! - validate: Check a signal log without replaying it
//! - doctor: Diagnose configuration and session store health
//! - schema: Print the input and output record schemas

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use attention_flux::pages::Page;
use attention_flux::replay::{parse_steps_ndjson, ReplayStep};
use attention_flux::store::{FileStore, KeyValueStore, MemoryStore, SessionStore};
use attention_flux::{
    replay, AttentionError, DeliveryMode, Emission, FocusSample, HttpChannel, InstrumentConfig,
    PagePlan, ReplayOutcome, ReplayScript, ATTN_VERSION, PRODUCER_NAME,
};

/// attn - Attention tracking for reading-comprehension study pages
#[derive(Parser)]
#[command(name = "attn")]
#[command(version = ATTN_VERSION)]
#[command(about = "Replay and audit page attention logs", long_about = None)]
struct Cli {
    /// Instrument configuration file (JSON)
    #[arg(long, global = true, env = "ATTN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run recorded page signals through the state machine
    Replay(ReplayArgs),

    /// Check a signal log without replaying it
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

    /// Diagnose configuration and session store health
    Doctor {
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

#[derive(Args)]
struct ReplayArgs {
    /// Input file path (use - for stdin)
    #[arg(short, long)]
    input: PathBuf,

    /// Output file path (use - for stdout)
    #[arg(short, long, default_value = "-")]
    output: PathBuf,

    /// Input format
    #[arg(long, default_value = "script")]
    input_format: InputFormat,

    /// Output format
    #[arg(long, default_value = "json-pretty")]
    output_format: OutputFormat,

    /// Page the signals were recorded on (ndjson input only)
    #[arg(long)]
    page: Option<String>,

    /// Passage index for passage, questions and posttask pages
    #[arg(long)]
    index: Option<usize>,

    /// Question index for questions pages
    #[arg(long)]
    question: Option<u32>,

    /// Session id, when no session store is configured
    #[arg(long)]
    session: Option<String>,

    /// Comma-separated assigned passages, when no session store is configured
    #[arg(long, value_delimiter = ',')]
    passages: Vec<String>,

    /// Page load time; defaults to the first signal's time
    #[arg(long)]
    start_ms: Option<i64>,

    /// The page loaded without focus
    #[arg(long)]
    blurred: bool,

    /// POST every delivery to the configured backend
    #[arg(long)]
    post: bool,
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// A replay script (JSON object with session, tracker and steps)
    Script,
    /// Newline-delimited JSON (one signal per line)
    Ndjson,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one emission per line)
    Ndjson,
    /// Replay outcome as a single JSON object
    Json,
    /// Pretty-printed outcome
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Replay input (script and signal lines)
    Input,
    /// Emitted records
    Output,
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
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("attention_flux=info,attn=info")),
        )
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), AttnCliError> {
    match cli.command {
        Commands::Replay(args) => {
            let config = load_config(cli.config.as_deref())?;
            cmd_replay(&config, args)
        }

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Doctor { json } => cmd_doctor(cli.config.as_deref(), json),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

fn load_config(path: Option<&Path>) -> Result<InstrumentConfig, AttnCliError> {
    let config = match path {
        Some(path) => InstrumentConfig::from_file(path)?,
        None => InstrumentConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn read_input(input: &Path) -> Result<String, AttnCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn cmd_replay(config: &InstrumentConfig, args: ReplayArgs) -> Result<(), AttnCliError> {
    let input_data = read_input(&args.input)?;

    let script = match args.input_format {
        InputFormat::Script => ReplayScript::from_json(&input_data)?,
        InputFormat::Ndjson => {
            let steps = parse_steps_ndjson(&input_data)?;
            if steps.is_empty() {
                return Err(AttnCliError::NoSignals);
            }
            match &config.store_path {
                Some(path) => {
                    let store = SessionStore::new(FileStore::open(path)?);
                    script_for_page(&store, config, &args, steps)?
                }
                None => {
                    let store = SessionStore::new(MemoryStore::new());
                    if let Some(session) = &args.session {
                        store.set_session_id(session)?;
                    }
                    store.set_assigned_passages(&args.passages)?;
                    script_for_page(&store, config, &args, steps)?
                }
            }
        }
    };

    let outcome = replay(&script)?;
    info!(
        deliveries = outcome.summary.deliveries,
        warnings = outcome.summary.warnings,
        "replay complete"
    );

    if args.post {
        post_deliveries(config, &outcome)?;
    }

    let output_data = format_output(&outcome, &args.output_format)?;
    if args.output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(&args.output, output_data)?;
    }

    Ok(())
}

fn script_for_page<S: KeyValueStore>(
    store: &SessionStore<S>,
    config: &InstrumentConfig,
    args: &ReplayArgs,
    steps: Vec<ReplayStep>,
) -> Result<ReplayScript, AttnCliError> {
    let name = args.page.as_deref().ok_or(AttnCliError::MissingPage)?;
    let page = Page::parse(name, args.index, args.question)?;
    if let Some(index) = page.passage_index() {
        store.require_passage(index)?;
    }

    let tracker = match page.plan(store, config) {
        PagePlan::Track(tracker) => tracker,
        PagePlan::Redirect(redirect) => {
            return Err(AttnCliError::NotTracked(format!(
                "page '{}' redirects to {}",
                name,
                redirect.location()
            )))
        }
        PagePlan::Untracked => {
            return Err(AttnCliError::NotTracked(format!("page '{}' is not tracked", name)))
        }
    };

    let session_id = store.session_id().ok_or(AttnCliError::NoSession)?;
    let start_ms = args.start_ms.unwrap_or(steps[0].at_ms);
    let initial = if args.blurred {
        FocusSample::blurred()
    } else {
        FocusSample::focused()
    };

    let script = ReplayScript {
        session_id,
        tracker,
        initial,
        start_ms,
        nav_window_ms: config.nav_window_ms,
        steps,
    };
    script.validate()?;
    Ok(script)
}

/// Send each delivery in order and wait for the answer
fn post_deliveries(config: &InstrumentConfig, outcome: &ReplayOutcome) -> Result<(), AttnCliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
        .build()
        .map_err(|e| AttnCliError::Post(e.to_string()))?;

    let mut failed = 0usize;
    for timed in &outcome.emissions {
        let Emission::Deliver(delivery) = &timed.emission else {
            continue;
        };
        let url = config.url(delivery.record.path());
        let body = delivery.record.body()?;
        let keep_alive = delivery.mode == DeliveryMode::UnloadSafe;

        if let Err(err) = runtime.block_on(HttpChannel::post(&client, &url, body, keep_alive)) {
            warn!(%url, error = %err, "delivery failed");
            failed += 1;
        }
    }

    if failed > 0 {
        Err(AttnCliError::Post(format!("{} deliveries failed", failed)))
    } else {
        Ok(())
    }
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), AttnCliError> {
    let input_data = read_input(input)?;

    let (total, errors) = match input_format {
        InputFormat::Script => validate_script(&input_data),
        InputFormat::Ndjson => validate_lines(&input_data),
    };

    let report = ValidationReport {
        total_signals: total,
        invalid_signals: errors.len(),
        errors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total signals:   {}", report.total_signals);
        println!("Invalid signals: {}", report.invalid_signals);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                match (err.line, err.step) {
                    (Some(line), _) => println!("  - Line {}: {}", line, err.error),
                    (None, Some(step)) => println!("  - Step {}: {}", step, err.error),
                    (None, None) => println!("  - {}", err.error),
                }
            }
        }
    }

    if report.invalid_signals > 0 {
        Err(AttnCliError::ValidationFailed(report.invalid_signals))
    } else {
        Ok(())
    }
}

/// A script is one JSON document, so errors point at a line or a step
fn validate_script(input: &str) -> (usize, Vec<ValidationErrorDetail>) {
    let detail = match ReplayScript::from_json(input) {
        Ok(script) => return (script.steps.len(), Vec::new()),
        Err(AttentionError::OutOfOrder {
            step,
            at_ms,
            previous_ms,
        }) => ValidationErrorDetail {
            line: None,
            step: Some(step),
            error: format!("at_ms {} is earlier than {}", at_ms, previous_ms),
        },
        Err(AttentionError::Json(e)) => ValidationErrorDetail {
            line: Some(e.line()),
            step: None,
            error: e.to_string(),
        },
        Err(e) => ValidationErrorDetail {
            line: None,
            step: None,
            error: e.to_string(),
        },
    };
    (0, vec![detail])
}

/// Check every line, not just up to the first failure
fn validate_lines(input: &str) -> (usize, Vec<ValidationErrorDetail>) {
    let mut total = 0;
    let mut errors = Vec::new();
    let mut last: Option<i64> = None;

    for (idx, line) in input.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        total += 1;

        match serde_json::from_str::<ReplayStep>(trimmed) {
            Ok(step) => {
                if let Some(prev) = last {
                    if step.at_ms < prev {
                        errors.push(ValidationErrorDetail {
                            line: Some(idx + 1),
                            step: None,
                            error: format!("at_ms {} is earlier than {}", step.at_ms, prev),
                        });
                    }
                }
                last = Some(last.map_or(step.at_ms, |prev| prev.max(step.at_ms)));
            }
            Err(e) => errors.push(ValidationErrorDetail {
                line: Some(idx + 1),
                step: None,
                error: e.to_string(),
            }),
        }
    }

    (total, errors)
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), AttnCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("attention-flux version {}", ATTN_VERSION),
    });

    let config = match load_config(config_path) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: match config_path {
                    Some(path) => format!("Loaded {}", path.display()),
                    None => "Using defaults and environment".to_string(),
                },
            });
            Some(config)
        }
        Err(e) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: CliError::from(e).message,
            });
            None
        }
    };

    if let Some(config) = &config {
        checks.push(match reqwest::Url::parse(&config.api_base) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => DoctorCheck {
                name: "api_base".to_string(),
                status: CheckStatus::Ok,
                message: format!("Posting to {}", config.api_base),
            },
            Ok(url) => DoctorCheck {
                name: "api_base".to_string(),
                status: CheckStatus::Warning,
                message: format!("Unusual scheme '{}'", url.scheme()),
            },
            Err(e) => DoctorCheck {
                name: "api_base".to_string(),
                status: CheckStatus::Error,
                message: format!("Invalid API base URL: {}", e),
            },
        });

        checks.push(DoctorCheck {
            name: "refocus_warning".to_string(),
            status: CheckStatus::Ok,
            message: match config.refocus_warn_ms {
                Some(ms) => format!(
                    "Warn after {} ms away, suppressed for {} ms after navigation",
                    ms, config.nav_window_ms
                ),
                None => "Disabled".to_string(),
            },
        });

        if let Some(path) = &config.store_path {
            checks.push(store_check(path));
        }
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
            message: "stdin is a pipe (replay input ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ATTN_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("attn Doctor Report");
        println!("==================");
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
        Err(AttnCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn store_check(path: &Path) -> DoctorCheck {
    if !path.exists() {
        return DoctorCheck {
            name: "session_store".to_string(),
            status: CheckStatus::Warning,
            message: "Session store file does not exist yet".to_string(),
        };
    }

    match FileStore::open(path) {
        Ok(store) => {
            let session = SessionStore::new(store);
            match session.session_id() {
                Some(id) => DoctorCheck {
                    name: "session_store".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Session {} with {} assigned passages",
                        id,
                        session.assigned_passages().len()
                    ),
                },
                None => DoctorCheck {
                    name: "session_store".to_string(),
                    status: CheckStatus::Warning,
                    message: "No session id; tracked pages will redirect to consent".to_string(),
                },
            }
        }
        Err(e) => DoctorCheck {
            name: "session_store".to_string(),
            status: CheckStatus::Error,
            message: format!("Cannot open session store: {}", e),
        },
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), AttnCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", get_input_json_schema());
            } else {
                println!("Input: one signal per line, or a replay script");
                println!();
                println!("Signal lines carry at_ms (epoch millis) and a signal:");
                println!("   - window_focus, window_blur");
                println!("   - visibility_change (with hidden: bool)");
                println!("   - page_hide, before_unload");
                println!("   - nav_mark (an in-app navigation was started)");
                println!();
                println!("A script wraps the lines with the page load:");
                println!("   - session_id, start_ms, initial {{ hidden, has_focus }}");
                println!("   - tracker {{ bucket, context, warn_threshold_ms, bucket_time }}");
                println!("   - nav_window_ms (default 2000), steps");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", get_output_json_schema());
            } else {
                println!("Output: emissions, each either a delivery or a warning");
                println!();
                println!("Deliveries name a mode (standard, unload_safe) and a record:");
                println!("   - attention: POST /api/log/attention {{ session_id, bucket, elapsed_ms }}");
                println!("   - rc_event: POST /api/log/rc_event {{ session_id, passage_id, page_name,");
                println!("     status (active|blur), start_time, duration_ms }}");
                println!("   - participation_end: POST /api/log/participation_end {{ session_id, finished_at_ms }}");
                println!();
                println!("Warnings carry blurred_ms, threshold_ms and the message shown.");
            }
        }
    }

    Ok(())
}

// Helper functions

fn format_output(outcome: &ReplayOutcome, format: &OutputFormat) -> Result<String, AttnCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for emission in &outcome.emissions {
                lines.push(serde_json::to_string(emission)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(outcome)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(outcome)?),
    }
}

fn get_input_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "attn.signal.v1",
        "description": "One recorded page signal",
        "type": "object",
        "required": ["at_ms", "signal"],
        "properties": {
            "at_ms": { "type": "integer" },
            "signal": {
                "type": "string",
                "enum": [
                    "window_focus",
                    "window_blur",
                    "visibility_change",
                    "page_hide",
                    "before_unload",
                    "nav_mark"
                ]
            },
            "hidden": { "type": "boolean" }
        }
    })
    .to_string()
}

fn get_output_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "attn.emission.v1",
        "description": "One emission from the attention state machine",
        "type": "object",
        "required": ["at_ms", "kind"],
        "properties": {
            "at_ms": { "type": "integer" },
            "kind": { "type": "string", "enum": ["deliver", "warn"] },
            "mode": { "type": "string", "enum": ["standard", "unload_safe"] },
            "record": {
                "type": "object",
                "required": ["record", "session_id"],
                "properties": {
                    "record": {
                        "type": "string",
                        "enum": ["attention", "rc_event", "participation_end"]
                    },
                    "session_id": { "type": "string" },
                    "bucket": { "type": "string" },
                    "elapsed_ms": { "type": "integer" },
                    "passage_id": { "type": "string" },
                    "page_name": { "type": "string" },
                    "status": { "type": "string", "enum": ["active", "blur"] },
                    "start_time": { "type": "integer" },
                    "duration_ms": { "type": "integer" },
                    "finished_at_ms": { "type": "integer" }
                }
            },
            "blurred_ms": { "type": "integer" },
            "threshold_ms": { "type": "integer" },
            "message": { "type": "string" }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum AttnCliError {
    Io(io::Error),
    Attention(AttentionError),
    Json(serde_json::Error),
    NoSignals,
    NoSession,
    MissingPage,
    NotTracked(String),
    Post(String),
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for AttnCliError {
    fn from(e: io::Error) -> Self {
        AttnCliError::Io(e)
    }
}

impl From<AttentionError> for AttnCliError {
    fn from(e: AttentionError) -> Self {
        AttnCliError::Attention(e)
    }
}

impl From<serde_json::Error> for AttnCliError {
    fn from(e: serde_json::Error) -> Self {
        AttnCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<AttnCliError> for CliError {
    fn from(e: AttnCliError) -> Self {
        match e {
            AttnCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            AttnCliError::Attention(AttentionError::Config(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Check the config file and ATTN_* environment variables".to_string()),
            },
            AttnCliError::Attention(
                e @ (AttentionError::InvalidEvent { .. } | AttentionError::OutOfOrder { .. }),
            ) => CliError {
                code: "INVALID_SIGNAL".to_string(),
                message: e.to_string(),
                hint: Some("Run 'attn validate' for details".to_string()),
            },
            AttnCliError::Attention(e) => CliError {
                code: "ATTENTION_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            AttnCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            AttnCliError::NoSignals => CliError {
                code: "NO_SIGNALS".to_string(),
                message: "No signals found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            AttnCliError::NoSession => CliError {
                code: "NO_SESSION".to_string(),
                message: "No session id available".to_string(),
                hint: Some("Pass --session or configure a session store".to_string()),
            },
            AttnCliError::MissingPage => CliError {
                code: "MISSING_PAGE".to_string(),
                message: "ndjson input needs the page it was recorded on".to_string(),
                hint: Some("Pass --page, e.g. --page passage --index 0".to_string()),
            },
            AttnCliError::NotTracked(msg) => CliError {
                code: "NOT_TRACKED".to_string(),
                message: msg,
                hint: Some("Check --session and --passages".to_string()),
            },
            AttnCliError::Post(msg) => CliError {
                code: "POST_FAILED".to_string(),
                message: msg,
                hint: Some("Run 'attn doctor' to check api_base".to_string()),
            },
            AttnCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} signals failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            AttnCliError::DoctorFailed => CliError {
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
    total_signals: usize,
    invalid_signals: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<usize>,
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

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SCRIPT_HEAD: &str = r#"{
        "session_id": "sess",
        "tracker": {"bucket": "reading_task1"},
        "start_ms": 0,
        "steps": ["#;

    #[test]
    fn test_validate_script_reports_out_of_order_step() {
        let input = format!(
            "{}{}]}}",
            SCRIPT_HEAD,
            r#"
            {"at_ms": 100, "signal": "window_blur"},
            {"at_ms": 900, "signal": "window_focus"},
            {"at_ms": 400, "signal": "page_hide"}"#
        );

        let (total, errors) = validate_script(&input);
        assert_eq!(total, 0);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].step, Some(3));
        assert_eq!(errors[0].line, None);

        let json = serde_json::to_value(&errors[0]).unwrap();
        assert_eq!(json["step"], 3);
        assert!(json.get("line").is_none());
    }

    #[test]
    fn test_validate_script_reports_json_line() {
        let input = format!("{}\n{{\"at_ms\": 100, \"signal\": \"wave\"}}]}}", SCRIPT_HEAD);

        let (_, errors) = validate_script(&input);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, Some(6));
        assert_eq!(errors[0].step, None);
    }

    #[test]
    fn test_validate_script_counts_steps() {
        let input = format!("{}{}]}}", SCRIPT_HEAD, r#"{"at_ms": 100, "signal": "window_blur"}"#);
        let (total, errors) = validate_script(&input);
        assert_eq!(total, 1);
        assert!(errors.is_empty());
    }
}
