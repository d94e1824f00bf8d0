//! `blockflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `block`    — run a single block and print its result envelope.
//! - `run`      — run a workflow JSON file and print the run report.
//! - `validate` — validate a workflow JSON file and print its layers.
//! - `list`     — print the registered block types.
//!
//! Logs go to stderr; stdout carries only JSON.

use std::collections::HashMap;
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use blocks::{
    BlockRegistry, ExecutionContext, ExecutionMode, NodeResult, ProgressEvent, ProgressSink,
    RetryPolicy,
};
use cache::{Cache, CacheConfig};
use clap::{Parser, Subcommand};
use engine::{ExecutorConfig, RunOptions, Workflow, WorkflowExecutor};
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const SECRET_ENV_PREFIX: &str = "BLOCKFLOW_SECRET_";
const DEFAULT_LOG_FILTER: &str = "blockflow=info,warn";

#[derive(Parser)]
#[command(
    name = "blockflow",
    about = "Run workflow blocks and DAGs from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single block and print its result envelope.
    Block {
        /// Registered block type.
        #[arg(long = "type")]
        block_type: String,
        /// Block config as inline JSON.  Read from stdin when omitted.
        #[arg(long, conflicts_with = "use_baseline")]
        config: Option<String>,
        /// Use the block's registered baseline config.
        #[arg(long)]
        use_baseline: bool,
        /// Block input as inline JSON.
        #[arg(long, default_value = "{}")]
        input: String,
        #[arg(long, env = "BLOCKFLOW_MODE", default_value = "production")]
        mode: ExecutionMode,
        /// Secret as NAME=VALUE; may be repeated.
        #[arg(long = "secret", value_parser = parse_secret)]
        secrets: Vec<(String, String)>,
    },
    /// Run a workflow definition JSON file.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Initial input as inline JSON.
        #[arg(long, default_value = "{}")]
        input: String,
        #[arg(long, env = "BLOCKFLOW_MODE", default_value = "production")]
        mode: ExecutionMode,
        /// Secret as NAME=VALUE; may be repeated.
        #[arg(long = "secret", value_parser = parse_secret)]
        secrets: Vec<(String, String)>,
        /// Bypass the response cache.
        #[arg(long)]
        no_cache: bool,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// List registered block types.
    List,
}

impl Command {
    /// Exit code for an error raised before a result exists.
    fn error_code(&self) -> u8 {
        match self {
            Command::Block { .. } => 2,
            _ => 1,
        }
    }
}

/// Forwards block progress to the log.
struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, event: ProgressEvent) {
        info!(node_id = %event.node_id, percent = event.percent, "{}", event.event);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let error_code = cli.command.error_code();

    match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(error_code)
        }
    }
}

async fn run(command: Command) -> anyhow::Result<ExitCode> {
    let registry = BlockRegistry::with_builtins().context("registering built-in blocks")?;

    match command {
        Command::Block {
            block_type,
            config,
            use_baseline,
            input,
            mode,
            secrets,
        } => {
            let metadata = registry.metadata(&block_type)?;
            let config = match config {
                Some(raw) => parse_json("--config", &raw)?,
                None if use_baseline => metadata.baseline_config.clone(),
                None => read_stdin_config()?,
            };
            let input = parse_json("--input", &input)?;
            let block = registry.create(&block_type)?;

            let ctx = ExecutionContext::standalone(block_type.as_str(), mode)
                .with_secrets(Arc::new(collect_secrets(secrets)))
                .with_cache(Arc::new(Cache::new(CacheConfig::enrichment())))
                .with_retry_policy(RetryPolicy::default())
                .with_timeout(Some(Duration::from_secs(60)))
                .with_progress(Arc::new(LogProgress));
            debug!(?ctx, "running block");

            let result = block.execute(&config, input, &ctx).await;
            print_json(&result)?;
            Ok(block_exit_code(&result))
        }

        Command::Run {
            path,
            input,
            mode,
            secrets,
            no_cache,
        } => {
            let workflow = load_workflow(&path)?;
            let input = parse_json("--input", &input)?;
            let executor = WorkflowExecutor::new(Arc::new(registry), ExecutorConfig::default())
                .with_cache(Arc::new(Cache::new(CacheConfig::enrichment())));
            let options = RunOptions {
                mode,
                secrets: collect_secrets(secrets),
                disable_cache: no_cache,
                progress: Some(Arc::new(LogProgress)),
                ..RunOptions::default()
            };

            let report = executor.run(&workflow, input, options).await?;
            print_json(&report)?;
            Ok(if report.is_completed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Command::Validate { path } => {
            let workflow = load_workflow(&path)?;
            let layers = engine::execution_layers(&workflow)?;
            info!("workflow is valid: {} nodes in {} layers", workflow.nodes.len(), layers.len());
            print_json(&layers)?;
            Ok(ExitCode::SUCCESS)
        }

        Command::List => {
            print_json(&registry.list())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// 0 completed, 1 failed.
fn block_exit_code(result: &NodeResult) -> ExitCode {
    if result.is_completed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn parse_json(what: &str, raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{what} is not valid JSON"))
}

/// Config piped on stdin; `null` when nothing is piped.
fn read_stdin_config() -> anyhow::Result<Value> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(Value::Null);
    }
    let mut raw = String::new();
    stdin
        .lock()
        .read_to_string(&mut raw)
        .context("cannot read config from stdin")?;
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    parse_json("stdin config", &raw)
}

fn load_workflow(path: &Path) -> anyhow::Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_secret(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_owned(), value.to_owned())),
        _ => Err(format!("expected NAME=VALUE, got '{raw}'")),
    }
}

/// `BLOCKFLOW_SECRET_<NAME>` variables overlaid with `--secret` flags.
fn collect_secrets(flags: Vec<(String, String)>) -> HashMap<String, String> {
    secrets_from(std::env::vars(), flags)
}

fn secrets_from<I>(env: I, flags: Vec<(String, String)>) -> HashMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut secrets: HashMap<String, String> = env
        .into_iter()
        .filter_map(|(key, value)| {
            let name = key.strip_prefix(SECRET_ENV_PREFIX)?;
            (!name.is_empty()).then(|| (name.to_owned(), value))
        })
        .collect();
    secrets.extend(flags);
    secrets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_flags_need_a_name_and_an_equals_sign() {
        assert_eq!(
            parse_secret("API_TOKEN=abc=def"),
            Ok(("API_TOKEN".into(), "abc=def".into()))
        );
        assert!(parse_secret("API_TOKEN").is_err());
        assert!(parse_secret("=value").is_err());
    }

    #[test]
    fn flags_override_environment_secrets() {
        let env = vec![
            ("BLOCKFLOW_SECRET_API_TOKEN".to_string(), "from-env".to_string()),
            ("BLOCKFLOW_SECRET_OTHER".to_string(), "kept".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ];
        let secrets = secrets_from(env, vec![("API_TOKEN".into(), "from-flag".into())]);

        assert_eq!(secrets.len(), 2);
        assert_eq!(secrets["API_TOKEN"], "from-flag");
        assert_eq!(secrets["OTHER"], "kept");
    }

    #[test]
    fn block_subcommand_parses() {
        let cli = Cli::try_parse_from([
            "blockflow", "block", "--type", "echo", "--input", "{\"v\":1}", "--mode", "test",
            "--secret", "A=b",
        ])
        .unwrap();
        match cli.command {
            Command::Block { block_type, mode, secrets, use_baseline, .. } => {
                assert_eq!(block_type, "echo");
                assert_eq!(mode, ExecutionMode::Test);
                assert_eq!(secrets, vec![("A".to_string(), "b".to_string())]);
                assert!(!use_baseline);
            }
            _ => panic!("expected block command"),
        }
    }

    #[test]
    fn config_and_baseline_are_exclusive() {
        let parsed = Cli::try_parse_from([
            "blockflow", "block", "--type", "echo", "--config", "{}", "--use-baseline",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn json_output_takes_reports_and_slices() {
        let registry = BlockRegistry::with_builtins().unwrap();
        assert!(print_json(&registry.list()).is_ok());
        assert!(print_json(&["a", "b"][..]).is_ok());
        assert!(print_json(&NodeResult::completed(serde_json::json!({ "v": 1 }))).is_ok());
    }

    #[test]
    fn only_block_errors_exit_with_two() {
        let block = Cli::try_parse_from(["blockflow", "block", "--type", "echo"]).unwrap();
        assert_eq!(block.command.error_code(), 2);
        let list = Cli::try_parse_from(["blockflow", "list"]).unwrap();
        assert_eq!(list.command.error_code(), 1);
    }
}
