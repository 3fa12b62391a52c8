use crate::config::ToolchainConfig;
use crate::errors::ReplayError;
use crate::logging::append_run_log;
use crate::runtime::{ProcessOutput, ProcessRequest, ProcessRunner};
use serde_json::json;
use std::path::Path;
use std::time::Duration;

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// Compiler driver invocations needed by a replay run.
pub struct Toolchain<'a> {
    runner: &'a dyn ProcessRunner,
    config: &'a ToolchainConfig,
}

impl<'a> Toolchain<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, config: &'a ToolchainConfig) -> Self {
        Self { runner, config }
    }

    /// Links the program under test on its own. A non-zero exit is expected
    /// whenever the program calls functions the verifier modelled.
    pub fn link_program(
        &self,
        program: &Path,
        executable: &Path,
    ) -> Result<ProcessOutput, ReplayError> {
        self.invoke(
            "first_compile",
            vec!["-o".to_string(), path_arg(executable), path_arg(program)],
        )
    }

    pub fn compile_harness(
        &self,
        harness: &Path,
        object: &Path,
    ) -> Result<ProcessOutput, ReplayError> {
        self.invoke(
            "recompile_harness",
            vec![
                "-c".to_string(),
                "-emit-llvm".to_string(),
                "-o".to_string(),
                path_arg(object),
                path_arg(harness),
            ],
        )
    }

    /// Links program and harness with `entry_symbol` as the program start.
    pub fn link_replay(
        &self,
        program: &Path,
        object: &Path,
        executable: &Path,
        entry_symbol: &str,
    ) -> Result<ProcessOutput, ReplayError> {
        self.invoke(
            "final_link",
            vec![
                self.entry_flag(entry_symbol),
                "-o".to_string(),
                path_arg(executable),
                path_arg(program),
                path_arg(object),
            ],
        )
    }

    pub fn entry_flag(&self, entry_symbol: &str) -> String {
        format!("-Wl,-e,{}{entry_symbol}", self.config.symbol_prefix)
    }

    /// Runs the replay binary. Timing out is reported on the output, not as an error.
    pub fn execute(
        &self,
        executable: &Path,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput, ReplayError> {
        append_run_log(
            "info",
            "replay.execute.started",
            json!({ "executable": path_arg(executable) }),
        );
        let out = self.runner.run(ProcessRequest {
            program: path_arg(executable),
            args: Vec::new(),
            cwd: executable.parent().map(Path::to_path_buf),
            timeout,
        })?;
        append_run_log(
            "info",
            "replay.execute.finished",
            json!({
                "executable": path_arg(executable),
                "exit_code": out.exit_code,
                "timed_out": out.timed_out,
                "stdout": out.stdout
            }),
        );
        Ok(out)
    }

    fn invoke(&self, stage: &str, args: Vec<String>) -> Result<ProcessOutput, ReplayError> {
        append_run_log(
            "debug",
            &format!("replay.{stage}.started"),
            json!({
                "compiler": self.config.compiler,
                "args": args
            }),
        );
        let out = self.runner.run(ProcessRequest {
            program: self.config.compiler.clone(),
            args,
            cwd: None,
            timeout: self.config.timeout(),
        })?;
        if out.timed_out {
            append_run_log(
                "error",
                &format!("replay.{stage}.timed_out"),
                json!({ "compiler": self.config.compiler }),
            );
            return Err(ReplayError::Timeout {
                stage: stage.to_string(),
                seconds: self.config.timeout_seconds.unwrap_or_default(),
            });
        }
        append_run_log(
            if out.exit_code == 0 { "debug" } else { "warn" },
            &format!("replay.{stage}.finished"),
            json!({
                "exit_code": out.exit_code,
                "stderr": out.stderr
            }),
        );
        Ok(out)
    }
}
