use crate::errors::ReplayError;
use crate::runtime::FileSystem;
use crate::types::{is_reserved, OverflowPolicy, VerifierBackend};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub harness_path: Option<PathBuf>,
    pub executable_path: Option<PathBuf>,
    pub verifier: Option<VerifierBackend>,
    pub entry_points: Vec<String>,
    pub compiler: Option<String>,
    pub overflow: Option<OverflowPolicy>,
    pub keep_temps: bool,
    pub timeout_seconds: Option<u64>,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub replay: ReplayConfig,
    pub toolchain: ToolchainConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplayConfig {
    pub verifier: VerifierBackend,
    pub entry_points: Vec<String>,
    pub entry_symbol: String,
    pub overflow: OverflowPolicy,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolchainConfig {
    pub compiler: String,
    pub symbol_prefix: String,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    pub harness_path: Option<PathBuf>,
    pub executable_path: Option<PathBuf>,
    pub keep_temps: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            replay: ReplayConfig {
                verifier: VerifierBackend::Corral,
                entry_points: vec!["main".to_string()],
                entry_symbol: "replay_entry_main".to_string(),
                overflow: OverflowPolicy::FailFast,
                timeout_seconds: None,
            },
            toolchain: ToolchainConfig {
                compiler: "clang".to_string(),
                symbol_prefix: default_symbol_prefix().to_string(),
                timeout_seconds: None,
            },
            output: OutputConfig {
                harness_path: None,
                executable_path: None,
                keep_temps: false,
            },
            logging: LoggingConfig {
                enabled: true,
                path: PathBuf::from(".cache/cexreplay/runs.jsonl"),
            },
        }
    }
}

/// Mach-O linkers expect C symbols with a leading underscore.
fn default_symbol_prefix() -> &'static str {
    if cfg!(target_os = "macos") {
        "_"
    } else {
        ""
    }
}

impl ReplayConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

impl ToolchainConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    replay: Option<PartialReplayConfig>,
    toolchain: Option<PartialToolchainConfig>,
    output: Option<PartialOutputConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialReplayConfig {
    verifier: Option<VerifierBackend>,
    entry_points: Option<Vec<String>>,
    entry_symbol: Option<String>,
    overflow: Option<OverflowPolicy>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialToolchainConfig {
    compiler: Option<String>,
    symbol_prefix: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialOutputConfig {
    harness_path: Option<PathBuf>,
    executable_path: Option<PathBuf>,
    keep_temps: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    enabled: Option<bool>,
    path: Option<PathBuf>,
}

pub fn load_config(
    overrides: &CliOverrides,
    fs: &dyn FileSystem,
) -> Result<AppConfig, ReplayError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| ReplayError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(replay) = partial.replay {
        if let Some(verifier) = replay.verifier {
            cfg.replay.verifier = verifier;
        }
        if let Some(entry_points) = replay.entry_points {
            cfg.replay.entry_points = entry_points;
        }
        if let Some(entry_symbol) = replay.entry_symbol {
            cfg.replay.entry_symbol = entry_symbol;
        }
        if let Some(overflow) = replay.overflow {
            cfg.replay.overflow = overflow;
        }
        if replay.timeout_seconds.is_some() {
            cfg.replay.timeout_seconds = replay.timeout_seconds;
        }
    }

    if let Some(toolchain) = partial.toolchain {
        if let Some(compiler) = toolchain.compiler {
            cfg.toolchain.compiler = compiler;
        }
        if let Some(prefix) = toolchain.symbol_prefix {
            cfg.toolchain.symbol_prefix = prefix;
        }
        if toolchain.timeout_seconds.is_some() {
            cfg.toolchain.timeout_seconds = toolchain.timeout_seconds;
        }
    }

    if let Some(output) = partial.output {
        if output.harness_path.is_some() {
            cfg.output.harness_path = output.harness_path;
        }
        if output.executable_path.is_some() {
            cfg.output.executable_path = output.executable_path;
        }
        if let Some(keep_temps) = output.keep_temps {
            cfg.output.keep_temps = keep_temps;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(enabled) = logging.enabled {
            cfg.logging.enabled = enabled;
        }
        if let Some(path) = logging.path {
            cfg.logging.path = path;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(verifier) = overrides.verifier {
        cfg.replay.verifier = verifier;
    }
    if !overrides.entry_points.is_empty() {
        cfg.replay.entry_points = overrides.entry_points.clone();
    }
    if let Some(compiler) = &overrides.compiler {
        cfg.toolchain.compiler = compiler.clone();
    }
    if let Some(overflow) = overrides.overflow {
        cfg.replay.overflow = overflow;
    }
    if let Some(path) = &overrides.harness_path {
        cfg.output.harness_path = Some(path.clone());
    }
    if let Some(path) = &overrides.executable_path {
        cfg.output.executable_path = Some(path.clone());
    }
    if overrides.keep_temps {
        cfg.output.keep_temps = true;
    }
    if let Some(seconds) = overrides.timeout_seconds {
        cfg.toolchain.timeout_seconds = Some(seconds);
        cfg.replay.timeout_seconds = Some(seconds);
    }
    if let Some(path) = &overrides.log_path {
        cfg.logging.enabled = true;
        cfg.logging.path = path.clone();
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), ReplayError> {
    if cfg.toolchain.compiler.trim().is_empty() {
        return Err(ReplayError::InvalidConfig(
            "toolchain.compiler must not be empty".to_string(),
        ));
    }

    let symbol = cfg.replay.entry_symbol.trim();
    if symbol.is_empty() {
        return Err(ReplayError::InvalidConfig(
            "replay.entry_symbol must not be empty".to_string(),
        ));
    }
    if is_reserved(symbol) {
        return Err(ReplayError::InvalidConfig(format!(
            "replay.entry_symbol cannot be the reserved name {symbol}"
        )));
    }
    if !symbol
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ReplayError::InvalidConfig(format!(
            "replay.entry_symbol must be a C identifier, got {symbol}"
        )));
    }

    if cfg.replay.timeout_seconds == Some(0) || cfg.toolchain.timeout_seconds == Some(0) {
        return Err(ReplayError::InvalidConfig(
            "timeout_seconds must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

/// Harness and executable paths, derived from the program artifact unless configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayPaths {
    pub trace: PathBuf,
    pub program: PathBuf,
    pub harness: PathBuf,
    pub harness_object: PathBuf,
    pub executable: PathBuf,
}

pub fn resolve_paths(
    cfg: &AppConfig,
    trace: &Path,
    program: &Path,
    process_cwd: &Path,
    run_id: u32,
) -> ReplayPaths {
    let program = absolutize_path(process_cwd, program);
    let stem = program
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "program".to_string());
    let dir = program
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| process_cwd.to_path_buf());

    let harness = cfg
        .output
        .harness_path
        .as_deref()
        .map(|path| absolutize_path(process_cwd, path))
        .unwrap_or_else(|| dir.join(format!("{stem}-replay-harness.c")));
    let executable = cfg
        .output
        .executable_path
        .as_deref()
        .map(|path| absolutize_path(process_cwd, path))
        .unwrap_or_else(|| dir.join(format!("{stem}-replay")));
    let harness_object = harness.with_file_name(format!("{stem}-replay-stubs.{run_id}.bc"));

    ReplayPaths {
        trace: trace.to_path_buf(),
        program,
        harness,
        harness_object,
        executable,
    }
}

pub fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}
