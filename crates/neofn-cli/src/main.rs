mod logging;

use std::path::PathBuf;
use std::process;

use clap::error::ErrorKind;
use clap::Parser;
use colored::Colorize;
use neofn_core::{Context, EngineConfig, ExecutionEngine, ExecutionRequest, ExecutionResult, Failure, StderrSink};
use serde_json::Value as JsonValue;

use logging::LogFormat;

const EXIT_SUCCESS: i32 = 0;
const EXIT_USAGE: i32 = 1;
const EXIT_INPUT: i32 = 2;
const EXIT_FAILURE: i32 = 3;

/// neofn - run a guest function against a capability-scoped context
///
/// Guest `print` output goes to stderr; the JSON result goes to stdout.
#[derive(Parser, Debug)]
#[command(name = "neofn", version, about, long_about = None)]
struct Cli {
    /// Path to the guest source file
    function_file: PathBuf,

    /// Name of the function to invoke
    entry_point: String,

    /// Parameters passed to the entry point, as JSON
    params_json: String,

    /// Execution context `{"storage": {...}, "secrets": {...}}`, as JSON
    context_json: Option<String>,

    /// Log filter directive (e.g. `warn`, `neofn_core=debug`)
    #[arg(long, env = "NEOFN_LOG", default_value = "warn")]
    log_level: String,

    /// Log line layout
    #[arg(long, env = "NEOFN_LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Maximum nesting of guest function calls
    #[arg(long, env = "NEOFN_MAX_CALL_DEPTH", default_value_t = neofn_core::config::DEFAULT_MAX_CALL_DEPTH)]
    max_call_depth: usize,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// Print the full execution report (id, duration, storage) instead of the bare result
    #[arg(long)]
    report: bool,
}

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_SUCCESS,
                _ => EXIT_USAGE,
            };
            // Nothing more useful to do if stdout/stderr are gone
            let _ = e.print();
            return code;
        }
    };

    if let Err(e) = logging::init(&cli.log_level, cli.log_format) {
        print_error("usage", &e);
        return EXIT_USAGE;
    }

    let source = match std::fs::read_to_string(&cli.function_file) {
        Ok(source) => source,
        Err(e) => {
            print_error("input", &format!("cannot read {}: {}", cli.function_file.display(), e));
            return EXIT_INPUT;
        }
    };

    let params: JsonValue = match serde_json::from_str(&cli.params_json) {
        Ok(params) => params,
        Err(e) => {
            print_error("input", &format!("params_json is not valid JSON: {}", e));
            return EXIT_INPUT;
        }
    };

    let context = match cli.context_json.as_deref() {
        Some(text) => match Context::from_json(text) {
            Ok(context) => context,
            Err(e) => {
                print_error("input", &e.to_string());
                return EXIT_INPUT;
            }
        },
        None => Context::default(),
    };

    let engine =
        ExecutionEngine::new().with_config(EngineConfig::default().with_max_call_depth(cli.max_call_depth));
    tracing::debug!(
        file = %cli.function_file.display(),
        entry_point = %cli.entry_point,
        max_call_depth = cli.max_call_depth,
        "running guest function"
    );

    let request = ExecutionRequest::new(source, cli.entry_point)
        .with_params(params)
        .with_context(context);
    let report = engine.execute_request(request, &StderrSink);

    if cli.report {
        match serde_json::to_value(&report) {
            Ok(json) => print_json(&json, cli.pretty),
            Err(e) => {
                print_error("output", &e.to_string());
                return EXIT_FAILURE;
            }
        }
        if let ExecutionResult::Failure(failure) = &report.outcome {
            print_failure(failure);
            return EXIT_FAILURE;
        }
        return EXIT_SUCCESS;
    }

    match report.outcome {
        ExecutionResult::Success { result } => {
            print_json(&result, cli.pretty);
            EXIT_SUCCESS
        }
        ExecutionResult::Failure(failure) => {
            print_failure(&failure);
            EXIT_FAILURE
        }
    }
}

fn print_json(value: &JsonValue, pretty: bool) {
    if pretty {
        println!("{:#}", value);
    } else {
        println!("{}", value);
    }
}

fn print_error(label: &str, message: &str) {
    eprintln!("{}[{}]: {}", "error".red().bold(), label, message);
}

fn print_failure(failure: &Failure) {
    eprintln!("{}[{}]: {}", "error".red().bold(), failure.kind, failure.message);
    for frame in &failure.trace {
        eprintln!("  {} {}", "at".dimmed(), frame);
    }
}
