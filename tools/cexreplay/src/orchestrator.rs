//! Drives one replay run from trace text to verdict.
//!
//! ```text
//! Init ─► FirstCompile ─► LinkOk | LinkFailed ─► GenerateHarness
//!      ─► RecompileHarness ─► FinalLink ─► Execute ─► Success | Failure
//! ```
//!
//! An unsupported configuration ends in `Skipped` before any toolchain call.
//! Harness compile and final link failures end in `Aborted` and surface as
//! errors. A replay that runs but does not reach the error is a `Failure`
//! verdict, not an error.

use crate::aggregate::{aggregate, AggregatedTrace};
use crate::config::{AppConfig, ReplayConfig, ReplayPaths};
use crate::errors::ReplayError;
use crate::harness::{generate_harness, EntryReturn, GeneratedHarness, HarnessOptions};
use crate::logging::append_run_log;
use crate::runtime::ReplayRuntime;
use crate::stage::StageSnapshot;
use crate::symbols::{detect_missing_definitions, MissingSymbolSet};
use crate::toolchain::Toolchain;
use crate::trace::parse_trace;
use crate::types::{ReplayStage, Verdict, PROGRAM_START};
use serde_json::json;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub snapshot: StageSnapshot,
    pub missing: MissingSymbolSet,
    pub harness: Option<GeneratedHarness>,
    pub harness_digest: Option<String>,
    pub skipped_reason: Option<String>,
}

/// A finished run: the report as far as it got, plus the error that stopped it.
#[derive(Debug)]
pub struct ReplayRun {
    pub report: ReplayReport,
    pub error: Option<ReplayError>,
}

impl ReplayRun {
    pub fn into_result(self) -> Result<ReplayReport, ReplayError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.report),
        }
    }
}

impl ReplayReport {
    fn new() -> Self {
        Self {
            snapshot: StageSnapshot::default(),
            missing: MissingSymbolSet::new(),
            harness: None,
            harness_digest: None,
            skipped_reason: None,
        }
    }

    pub fn verdict(&self) -> Option<Verdict> {
        self.snapshot.verdict
    }

    /// Mirrors the replay binary's exit status; a skipped run exits cleanly.
    pub fn exit_code(&self) -> i32 {
        match self.snapshot.verdict {
            Some(Verdict::NotReproduced { exit_code, .. }) if exit_code != 0 => exit_code,
            Some(Verdict::NotReproduced { .. }) => 1,
            Some(Verdict::Reproduced) | None => 0,
        }
    }
}

/// Why this configuration cannot be replayed, if it cannot.
pub fn unsupported_reason(replay: &ReplayConfig) -> Option<String> {
    if !replay.verifier.supports_replay() {
        return Some(format!(
            "Replay for verifiers other than 'corral' currently unsupported (got '{}')",
            replay.verifier.as_str()
        ));
    }
    if replay.entry_points.len() != 1 || replay.entry_points[0] != PROGRAM_START {
        return Some(format!(
            "Replay for entry points other than '{PROGRAM_START}' currently unsupported (got '{}')",
            replay.entry_points.join(",")
        ));
    }
    None
}

pub fn harness_digest(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

pub struct ReplayOrchestrator<'a> {
    runtime: &'a ReplayRuntime,
    config: &'a AppConfig,
}

impl<'a> ReplayOrchestrator<'a> {
    pub fn new(runtime: &'a ReplayRuntime, config: &'a AppConfig) -> Self {
        Self { runtime, config }
    }

    /// Runs every stage and returns the report, or the error that aborted the run.
    pub fn run(
        &self,
        paths: &ReplayPaths,
        trace_text: &str,
    ) -> Result<ReplayReport, ReplayError> {
        self.drive(paths, trace_text).into_result()
    }

    /// Like [`run`](Self::run) but keeps the report of an aborted run, whose
    /// snapshot ends in `Aborted` with the failure reason recorded.
    pub fn drive(&self, paths: &ReplayPaths, trace_text: &str) -> ReplayRun {
        if let Some(skipped) = self.skip_if_unsupported() {
            return match skipped {
                Ok(report) => ReplayRun {
                    report,
                    error: None,
                },
                Err(error) => ReplayRun {
                    report: ReplayReport::new(),
                    error: Some(error),
                },
            };
        }

        let mut report = ReplayReport::new();
        let result = self.run_stages(paths, trace_text, &mut report);
        self.cleanup(paths);
        let Err(error) = result else {
            return ReplayRun {
                report,
                error: None,
            };
        };

        if !report.snapshot.stage.is_terminal() {
            if let Err(transition) = report.snapshot.abort(error.to_string()) {
                append_run_log(
                    "error",
                    "replay.abort.rejected",
                    json!({ "error": transition.to_string() }),
                );
            }
        }
        append_run_log(
            "error",
            "replay.aborted",
            json!({
                "history": report
                    .snapshot
                    .history
                    .iter()
                    .map(|stage| stage.as_str())
                    .collect::<Vec<_>>(),
                "error": error.to_string()
            }),
        );
        ReplayRun {
            report,
            error: Some(error),
        }
    }

    /// Ends the run in `Skipped` when the configuration cannot be replayed.
    /// Nothing is written to disk on this path.
    pub fn skip_if_unsupported(&self) -> Option<Result<ReplayReport, ReplayError>> {
        let reason = unsupported_reason(&self.config.replay)?;
        Some(self.skip(reason))
    }

    fn skip(&self, reason: String) -> Result<ReplayReport, ReplayError> {
        let mut report = ReplayReport::new();
        append_run_log(
            "info",
            "replay.skipped",
            json!({
                "verifier": self.config.replay.verifier.as_str(),
                "entry_points": self.config.replay.entry_points,
                "reason": reason
            }),
        );
        self.runtime
            .terminal
            .write_line(&format!("{reason}; skipping replay"))?;
        report.snapshot.transition(ReplayStage::Skipped)?;
        report.skipped_reason = Some(reason);
        Ok(report)
    }

    fn run_stages(
        &self,
        paths: &ReplayPaths,
        trace_text: &str,
        report: &mut ReplayReport,
    ) -> Result<(), ReplayError> {
        let toolchain = Toolchain::new(
            self.runtime.process_runner.as_ref(),
            &self.config.toolchain,
        );

        report.snapshot.transition(ReplayStage::FirstCompile)?;
        let first = toolchain.link_program(&paths.program, &paths.executable)?;
        if first.exit_code == 0 {
            report.snapshot.transition(ReplayStage::LinkOk)?;
        } else {
            report.snapshot.transition(ReplayStage::LinkFailed)?;
            report.missing = detect_missing_definitions(
                &first.diagnostics(),
                &self.config.toolchain.symbol_prefix,
            );
            append_run_log(
                "info",
                "replay.first_compile.link_failed",
                json!({
                    "exit_code": first.exit_code,
                    "missing": report.missing
                }),
            );
        }

        report.snapshot.transition(ReplayStage::GenerateHarness)?;
        let aggregated = aggregate(parse_trace(trace_text));
        for warning in &aggregated.warnings {
            self.runtime
                .terminal
                .write_line(&format!("warning: {warning}"))?;
        }
        append_run_log(
            "info",
            "replay.trace.aggregated",
            json!({
                "functions": aggregated.return_values.len(),
                "entry_candidates": aggregated.arguments.keys().collect::<Vec<_>>(),
                "warnings": aggregated.warnings.len()
            }),
        );
        let harness = self.generate(&aggregated, &report.missing);
        self.write_harness(paths, &harness, report)?;
        report.harness = Some(harness);

        report.snapshot.transition(ReplayStage::RecompileHarness)?;
        let compiled = toolchain.compile_harness(&paths.harness, &paths.harness_object)?;
        if compiled.exit_code != 0 {
            return Err(ReplayError::HarnessCompile(compiled.diagnostics()));
        }

        report.snapshot.transition(ReplayStage::FinalLink)?;
        // ELF linkers only warn about a missing entry symbol and fall back to
        // the program's own startup, so the wrapper is checked here instead.
        let entry_symbol = &self.config.replay.entry_symbol;
        let has_entry = report
            .harness
            .as_ref()
            .is_some_and(|harness| harness.wrappers.iter().any(|w| &w.symbol == entry_symbol));
        if !has_entry {
            return Err(ReplayError::FinalLink(format!(
                "no entry wrapper defines {entry_symbol}; the trace must annotate the arguments of exactly one entry function"
            )));
        }
        let linked = toolchain.link_replay(
            &paths.program,
            &paths.harness_object,
            &paths.executable,
            &self.config.replay.entry_symbol,
        )?;
        if linked.exit_code != 0 {
            return Err(ReplayError::FinalLink(linked.diagnostics()));
        }

        let terminal = self.runtime.terminal.as_ref();
        terminal.write_line(&format!(
            "Generated replay harness: {}",
            paths.harness.display()
        ))?;
        terminal.write_line(&format!(
            "Generated replay executable: {}",
            paths.executable.display()
        ))?;

        report.snapshot.transition(ReplayStage::Execute)?;
        let executed = toolchain.execute(&paths.executable, self.config.replay.timeout())?;
        let verdict = if executed.success() {
            Verdict::Reproduced
        } else {
            Verdict::NotReproduced {
                exit_code: executed.exit_code,
                timed_out: executed.timed_out,
            }
        };
        if executed.timed_out {
            terminal.write_line(&format!(
                "warning: replay executable did not finish within {}s",
                self.config.replay.timeout_seconds.unwrap_or_default()
            ))?;
        }
        report.snapshot.record_verdict(verdict)?;
        append_run_log(
            "info",
            "replay.verdict",
            json!({
                "reproduced": verdict == Verdict::Reproduced,
                "exit_code": executed.exit_code,
                "timed_out": executed.timed_out
            }),
        );
        terminal.write_line(verdict.sentence())?;
        Ok(())
    }

    fn generate(
        &self,
        aggregated: &AggregatedTrace,
        missing: &MissingSymbolSet,
    ) -> GeneratedHarness {
        // Unprefixed symbols mean an ELF target, where the entry has no caller.
        let entry_return = if self.config.toolchain.symbol_prefix.is_empty() {
            EntryReturn::Exit
        } else {
            EntryReturn::Return
        };
        let options = HarnessOptions {
            entry_symbol: self.config.replay.entry_symbol.clone(),
            overflow: self.config.replay.overflow,
            entry_return,
        };
        generate_harness(aggregated, missing, &options)
    }

    fn write_harness(
        &self,
        paths: &ReplayPaths,
        harness: &GeneratedHarness,
        report: &mut ReplayReport,
    ) -> Result<(), ReplayError> {
        let warnings = harness
            .warnings
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        for warning in &warnings {
            self.runtime
                .terminal
                .write_line(&format!("warning: {warning}"))?;
        }

        if let Some(parent) = paths.harness.parent() {
            if !parent.as_os_str().is_empty() {
                self.runtime.file_system.create_dir_all(parent)?;
            }
        }
        self.runtime
            .file_system
            .write_string(&paths.harness, &harness.source)?;

        let digest = harness_digest(&harness.source);
        append_run_log(
            "info",
            "replay.harness.written",
            json!({
                "path": paths.harness.display().to_string(),
                "sha256": digest,
                "stubbed": harness.stubbed,
                "wrappers": harness.wrappers.iter().map(|w| w.symbol.clone()).collect::<Vec<_>>(),
                "warnings": warnings
            }),
        );
        report.harness_digest = Some(digest);
        Ok(())
    }

    fn cleanup(&self, paths: &ReplayPaths) {
        if self.config.output.keep_temps {
            return;
        }
        let fs = self.runtime.file_system.as_ref();
        if fs.exists(&paths.harness_object) {
            if let Err(error) = fs.remove_file(&paths.harness_object) {
                append_run_log(
                    "warn",
                    "replay.cleanup.failed",
                    json!({
                        "path": paths.harness_object.display().to_string(),
                        "error": error.to_string()
                    }),
                );
            }
        }
    }
}
