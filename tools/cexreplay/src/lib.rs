pub mod aggregate;
pub mod config;
pub mod errors;
pub mod harness;
pub mod logging;
pub mod orchestrator;
pub mod runtime;
pub mod stage;
pub mod symbols;
pub mod toolchain;
pub mod trace;
pub mod types;

use clap::{error::ErrorKind, Parser, ValueEnum};
use config::{absolutize_path, load_config, resolve_paths, CliOverrides};
use errors::ReplayError;
use logging::{append_run_log, init_run_log};
use orchestrator::ReplayOrchestrator;
use runtime::ReplayRuntime;
use serde_json::json;
use std::io::Read;
use std::path::{Path, PathBuf};
use types::{OverflowPolicy, VerifierBackend};

#[derive(Debug, Clone, Parser)]
#[command(name = "cexreplay", version)]
#[command(about = "Replay a verifier error trace natively against the program under test")]
pub struct Cli {
    /// Verifier output containing the trace annotations, or `-` for stdin.
    #[arg(long)]
    pub trace: PathBuf,
    /// Compiled artifact of the program under test.
    #[arg(long)]
    pub program: PathBuf,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub harness: Option<PathBuf>,
    #[arg(long)]
    pub executable: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub verifier: Option<CliVerifier>,
    #[arg(long = "entry-point")]
    pub entry_points: Vec<String>,
    #[arg(long)]
    pub compiler: Option<String>,
    #[arg(long, value_enum)]
    pub overflow: Option<CliOverflow>,
    #[arg(long, default_value_t = false)]
    pub keep_temps: bool,
    /// Seconds each compiler invocation and the replay binary may run.
    #[arg(long)]
    pub timeout: Option<u64>,
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliVerifier {
    Corral,
    Boogie,
    Svcomp,
}

impl From<CliVerifier> for VerifierBackend {
    fn from(value: CliVerifier) -> Self {
        match value {
            CliVerifier::Corral => VerifierBackend::Corral,
            CliVerifier::Boogie => VerifierBackend::Boogie,
            CliVerifier::Svcomp => VerifierBackend::Svcomp,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliOverflow {
    FailFast,
    ClampToLast,
}

impl From<CliOverflow> for OverflowPolicy {
    fn from(value: CliOverflow) -> Self {
        match value {
            CliOverflow::FailFast => OverflowPolicy::FailFast,
            CliOverflow::ClampToLast => OverflowPolicy::ClampToLast,
        }
    }
}

pub fn run() -> Result<i32, ReplayError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| ReplayError::Io(e.to_string()))?;
    let runtime = ReplayRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &Path,
    runtime: &ReplayRuntime,
) -> Result<i32, ReplayError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(ReplayError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.as_deref().map(|path| absolutize_path(cwd, path)),
        harness_path: cli.harness.clone(),
        executable_path: cli.executable.clone(),
        verifier: cli.verifier.map(Into::into),
        entry_points: cli.entry_points.clone(),
        compiler: cli.compiler.clone(),
        overflow: cli.overflow.map(Into::into),
        keep_temps: cli.keep_temps,
        timeout_seconds: cli.timeout,
        log_path: cli.log_file.clone(),
    };
    let cfg = load_config(&overrides, runtime.file_system.as_ref())?;
    let orchestrator = ReplayOrchestrator::new(runtime, &cfg);

    // A skipped run leaves nothing behind, not even a run log.
    if let Some(skipped) = orchestrator.skip_if_unsupported() {
        return skipped.map(|report| report.exit_code());
    }

    if cfg.logging.enabled {
        init_run_log(absolutize_path(cwd, &cfg.logging.path));
    }

    let paths = resolve_paths(&cfg, &cli.trace, &cli.program, cwd, std::process::id());
    append_run_log(
        "info",
        "replay.run.started",
        json!({
            "trace": paths.trace.display().to_string(),
            "program": paths.program.display().to_string(),
            "harness": paths.harness.display().to_string(),
            "executable": paths.executable.display().to_string(),
            "verifier": cfg.replay.verifier.as_str(),
            "overflow": cfg.replay.overflow.as_str()
        }),
    );

    let trace_text = read_trace(runtime, cwd, &cli.trace)?;
    let run = orchestrator.drive(&paths, &trace_text);

    append_run_log(
        if run.error.is_some() { "error" } else { "info" },
        "replay.run.finished",
        json!({
            "stage": run.report.snapshot.stage.as_str(),
            "failure_reason": run.report.snapshot.failure_reason,
            "exit_code": run.report.exit_code()
        }),
    );
    run.into_result().map(|report| report.exit_code())
}

fn read_trace(
    runtime: &ReplayRuntime,
    cwd: &Path,
    trace: &Path,
) -> Result<String, ReplayError> {
    if trace.as_os_str() == "-" {
        let mut bytes = Vec::new();
        std::io::stdin()
            .read_to_end(&mut bytes)
            .map_err(|e| ReplayError::Io(e.to_string()))?;
        return Ok(String::from_utf8_lossy(&bytes).into_owned());
    }
    runtime.file_system.read_to_string(&absolutize_path(cwd, trace))
}
