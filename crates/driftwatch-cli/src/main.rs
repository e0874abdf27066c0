// crates/driftwatch-cli/src/main.rs
// ============================================================================
// Module: CLI Entry Point
// Description: Command dispatcher for the Driftwatch gateway and one-shot
//              comparisons.
// Purpose: Provide an operator- and CI-friendly entry point that wraps the
//          same Orchestrator/Gateway contracts exposed over HTTP.
// Dependencies: clap, driftwatch-core, driftwatch-gateway, driftwatch-
//               orchestrator, driftwatch-store-sqlite, driftwatch-explain,
//               serde_json, thiserror, tokio, tracing, tracing-subscriber.
// ============================================================================

//! ## Overview
//! Two subcommands: `serve` launches the REST Gateway from a config file,
//! and `compare` runs a single comparison end to end against a local
//! `SQLite` file and prints the result, for smoke checks that don't want to
//! stand up the HTTP surface.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use driftwatch_core::CompareErrorCode;
use driftwatch_core::ComparisonId;
use driftwatch_core::PairKey;
use driftwatch_core::UrlValidation;
use driftwatch_core::UrlValidationOutcome;
use driftwatch_core::validate_url;
use driftwatch_explain::ExplainClient;
use driftwatch_explain::ExplainConfig as ExplainClientConfig;
use driftwatch_gateway::GatewayConfig;
use driftwatch_orchestrator::CompareInput;
use driftwatch_orchestrator::compare_environments;
use driftwatch_store_sqlite::PairStore;
use thiserror::Error;

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "driftwatch", arg_required_else_help = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the REST Gateway.
    Serve(ServeCommand),
    /// Run one comparison end to end and print the result.
    Compare(CompareCommand),
}

/// Configuration for the `serve` command.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Optional config file path (defaults to `driftwatch.toml` or an env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Configuration for the `compare` command.
#[derive(Args, Debug)]
struct CompareCommand {
    /// Optional config file path, used for the explanation provider settings.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Left (e.g. staging) URL.
    #[arg(long, value_name = "URL")]
    left_url: String,
    /// Right (e.g. production) URL.
    #[arg(long, value_name = "URL")]
    right_url: String,
    /// Optional display label for the left URL.
    #[arg(long, value_name = "LABEL")]
    left_label: Option<String>,
    /// Optional display label for the right URL.
    #[arg(long, value_name = "LABEL")]
    right_label: Option<String>,
    /// `SQLite` file to read and write the comparison through.
    #[arg(long, value_name = "PATH")]
    store: PathBuf,
}

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    message: String,
    code: CompareErrorCode,
}

impl CliError {
    fn new(code: CompareErrorCode, message: impl Into<String>) -> Self {
        Self { message: message.into(), code }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(command) => command_serve(command).await,
        Commands::Compare(command) => command_compare(&command),
    }
    .unwrap_or_else(|err| {
        emit_error(&err.message);
        exit_code_for(err.code)
    })
}

/// Executes the `serve` command.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let config = GatewayConfig::load(command.config.as_deref())
        .map_err(|err| CliError::new(CompareErrorCode::InternalError, format!("failed to load config: {err}")))?;
    driftwatch_gateway::serve(config)
        .await
        .map_err(|err| CliError::new(CompareErrorCode::InternalError, format!("gateway failed: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `compare` command.
fn command_compare(command: &CompareCommand) -> CliResult<ExitCode> {
    reject_invalid_url(&command.left_url)?;
    reject_invalid_url(&command.right_url)?;

    let config = GatewayConfig::load(command.config.as_deref())
        .map_err(|err| CliError::new(CompareErrorCode::InternalError, format!("failed to load config: {err}")))?;
    let explain = ExplainClient::new(ExplainClientConfig {
        endpoint: config.explain.endpoint.clone(),
        api_key: config.explain.resolve_api_key(),
        model: config.explain.model.clone(),
        timeout_ms: config.explain.timeout_ms,
    })
    .map_err(|err| CliError::new(CompareErrorCode::InternalError, format!("failed to build explanation client: {err}")))?;

    let store = PairStore::open(&command.store)
        .map_err(|err| CliError::new(CompareErrorCode::InternalError, format!("failed to open store: {err}")))?;

    let pair_key = PairKey::compute(&command.left_url, &command.right_url);
    let input = CompareInput {
        comparison_id: ComparisonId::generate(&pair_key),
        left_url: command.left_url.clone(),
        right_url: command.right_url.clone(),
        left_label: command.left_label.clone(),
        right_label: command.right_label.clone(),
    };

    let result = compare_environments(&input, &store, &explain)
        .map_err(|err| CliError::new(err.error_code(), err.to_string()))?;

    let rendered = serde_json::to_string_pretty(&result)
        .map_err(|err| CliError::new(CompareErrorCode::InternalError, format!("failed to render result: {err}")))?;
    write_stdout_line(&rendered)
        .map_err(|err| CliError::new(CompareErrorCode::InternalError, format!("failed to write stdout: {err}")))?;

    Ok(ExitCode::SUCCESS)
}

/// Rejects a URL the SSRF Guard would reject, before opening any store or
/// explanation client.
fn reject_invalid_url(url: &str) -> CliResult<()> {
    let validation = validate_url(url);
    if validation.is_ok() {
        return Ok(());
    }
    let UrlValidationOutcome::Rejected { reason } = validation.outcome else {
        return Ok(());
    };
    let code = if UrlValidation::is_ssrf_reason(&reason) { CompareErrorCode::SsrfBlocked } else { CompareErrorCode::InvalidUrl };
    Err(CliError::new(code, reason))
}

/// Maps a [`CompareErrorCode`] to a deterministic process exit code.
fn exit_code_for(code: CompareErrorCode) -> ExitCode {
    let raw = match code {
        CompareErrorCode::InvalidRequest => 1,
        CompareErrorCode::InvalidUrl => 2,
        CompareErrorCode::SsrfBlocked => 3,
        CompareErrorCode::Timeout => 4,
        CompareErrorCode::DnsError => 5,
        CompareErrorCode::TlsError => 6,
        CompareErrorCode::FetchError => 7,
        CompareErrorCode::InternalError => 8,
    };
    ExitCode::from(raw)
}

fn write_stdout_line(message: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

fn emit_error(message: &str) {
    use std::io::Write;
    let mut stderr = std::io::stderr();
    let _ = writeln!(&mut stderr, "{message}");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unit tests use unwrap for setup clarity.")]
mod tests {
    use super::*;

    #[test]
    fn exit_code_for_ssrf_blocked_is_three() {
        assert_eq!(exit_code_for(CompareErrorCode::SsrfBlocked), ExitCode::from(3));
    }

    #[test]
    fn reject_invalid_url_accepts_https_url() {
        assert!(reject_invalid_url("https://example.com/").is_ok());
    }

    #[test]
    fn reject_invalid_url_rejects_localhost() {
        let err = reject_invalid_url("http://localhost/").unwrap_err();
        assert_eq!(err.code, CompareErrorCode::SsrfBlocked);
    }
}
