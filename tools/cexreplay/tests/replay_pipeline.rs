use cexreplay::config::{resolve_paths, AppConfig, ReplayPaths};
use cexreplay::errors::ReplayError;
use cexreplay::orchestrator::{harness_digest, ReplayOrchestrator};
use cexreplay::runtime::{
    FakeFileSystem, FakeProcessRunner, FakeTerminal, FileSystem, ProcessOutput, ReplayRuntime,
};
use cexreplay::types::{ReplayStage, Verdict, VerifierBackend};
use std::path::Path;
use std::sync::Arc;

const TRACE: &str = include_str!("fixtures/traces/corral-error.txt");

const DARWIN_LINK_FAILURE: &str = "Undefined symbols for architecture arm64:\n\
  \"___VERIFIER_nondet_int\", referenced from:\n\
      _main in simple.bc\n\
  \"_read_sensor\", referenced from:\n\
      _main in simple.bc\n\
  \"___VERIFIER_assert\", referenced from:\n\
      _main in simple.bc\n\
ld: symbol(s) not found for architecture arm64\n";

struct Fixture {
    runtime: ReplayRuntime,
    fs: FakeFileSystem,
    process: FakeProcessRunner,
    terminal: FakeTerminal,
}

fn fixture() -> Fixture {
    let fs = FakeFileSystem::default();
    let process = FakeProcessRunner::default();
    let terminal = FakeTerminal::default();
    Fixture {
        runtime: ReplayRuntime {
            file_system: Arc::new(fs.clone()),
            process_runner: Arc::new(process.clone()),
            terminal: Arc::new(terminal.clone()),
        },
        fs,
        process,
        terminal,
    }
}

fn config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.toolchain.symbol_prefix = "_".to_string();
    cfg
}

fn paths(cfg: &AppConfig) -> ReplayPaths {
    resolve_paths(
        cfg,
        Path::new("trace.txt"),
        Path::new("simple.bc"),
        Path::new("/work"),
        7,
    )
}

fn queue_successful_run(process: &FakeProcessRunner, replay_exit: i32) {
    process.push_exit(1, "", DARWIN_LINK_FAILURE);
    process.push_exit(0, "", "");
    process.push_exit(0, "", "");
    process.push_exit(replay_exit, "error reached!\n", "");
}

#[test]
fn reproduced_trace_walks_every_stage_and_reports_success() {
    let fx = fixture();
    let cfg = config();
    let paths = paths(&cfg);
    queue_successful_run(&fx.process, 0);

    let report = ReplayOrchestrator::new(&fx.runtime, &cfg)
        .run(&paths, TRACE)
        .expect("replay");

    assert_eq!(report.snapshot.stage, ReplayStage::Success);
    assert_eq!(
        report.snapshot.history,
        vec![
            ReplayStage::Init,
            ReplayStage::FirstCompile,
            ReplayStage::LinkFailed,
            ReplayStage::GenerateHarness,
            ReplayStage::RecompileHarness,
            ReplayStage::FinalLink,
            ReplayStage::Execute,
            ReplayStage::Success,
        ]
    );
    assert_eq!(report.verdict(), Some(Verdict::Reproduced));
    assert_eq!(report.exit_code(), 0);
    assert_eq!(
        report.missing.iter().cloned().collect::<Vec<_>>(),
        vec!["__VERIFIER_assert", "__VERIFIER_nondet_int", "read_sensor"]
    );

    let harness = fx
        .fs
        .file("/work/simple-replay-harness.c")
        .expect("harness written");
    assert!(harness.contains("static const int __VERIFIER_nondet_int__replay_table[] = {3, -7};"));
    assert!(harness.contains("static const int read_sensor__replay_table[] = {42};"));
    assert!(harness.contains("int replay_entry_main() {\n  main(1);\n  return 0;\n}"));
    assert_eq!(report.harness_digest, Some(harness_digest(&harness)));

    let lines = fx.terminal.written_lines();
    assert_eq!(
        lines,
        vec![
            "Generated replay harness: /work/simple-replay-harness.c".to_string(),
            "Generated replay executable: /work/simple-replay".to_string(),
            "Error-trace replay successful.".to_string(),
        ]
    );

    let spawned = fx.process.spawned();
    assert_eq!(spawned.len(), 4);
    assert_eq!(spawned[0].args, vec!["-o", "/work/simple-replay", "/work/simple.bc"]);
    assert_eq!(spawned[1].args[3], "/work/simple-replay-stubs.7.bc");
    assert_eq!(spawned[2].args[0], "-Wl,-e,_replay_entry_main");
    assert_eq!(spawned[3].program, "/work/simple-replay");
}

#[test]
fn clean_first_link_means_nothing_is_stubbed() {
    let fx = fixture();
    let cfg = config();
    fx.process.push_exit(0, "", "");
    fx.process.push_exit(0, "", "");
    fx.process.push_exit(0, "", "");
    fx.process.push_exit(0, "", "");

    let report = ReplayOrchestrator::new(&fx.runtime, &cfg)
        .run(&paths(&cfg), TRACE)
        .expect("replay");

    assert!(report.missing.is_empty());
    assert_eq!(report.snapshot.history[2], ReplayStage::LinkOk);
    let harness = report.harness.expect("harness");
    assert!(harness.stubbed.is_empty());

    let lines = fx.terminal.written_lines();
    assert!(lines.contains(
        &"warning: using native implementation of function __VERIFIER_nondet_int; replay fidelity not guaranteed"
            .to_string()
    ));
    assert!(lines.contains(
        &"warning: using native implementation of function read_sensor; replay fidelity not guaranteed"
            .to_string()
    ));
}

#[test]
fn replay_that_misses_the_error_is_a_negative_verdict_not_an_error() {
    let fx = fixture();
    let cfg = config();
    queue_successful_run(&fx.process, 255);

    let report = ReplayOrchestrator::new(&fx.runtime, &cfg)
        .run(&paths(&cfg), TRACE)
        .expect("replay");

    assert_eq!(report.snapshot.stage, ReplayStage::Failure);
    assert_eq!(report.exit_code(), 255);
    assert_eq!(
        fx.terminal.written_lines().last().map(String::as_str),
        Some("Error-trace replay failed.")
    );
}

#[test]
fn replay_timeout_is_reported_as_failed_replay() {
    let fx = fixture();
    let mut cfg = config();
    cfg.replay.timeout_seconds = Some(2);
    fx.process.push_exit(0, "", "");
    fx.process.push_exit(0, "", "");
    fx.process.push_exit(0, "", "");
    fx.process.push_response(Ok(ProcessOutput {
        exit_code: -1,
        stdout: String::new(),
        stderr: String::new(),
        timed_out: true,
    }));

    let report = ReplayOrchestrator::new(&fx.runtime, &cfg)
        .run(&paths(&cfg), TRACE)
        .expect("replay");

    assert_eq!(
        report.verdict(),
        Some(Verdict::NotReproduced {
            exit_code: -1,
            timed_out: true
        })
    );
    let lines = fx.terminal.written_lines();
    assert!(lines.contains(&"warning: replay executable did not finish within 2s".to_string()));
    assert_eq!(fx.process.spawned()[3].timeout, cfg.replay.timeout());
}

#[test]
fn harness_compile_failure_surfaces_diagnostics_verbatim() {
    let fx = fixture();
    let cfg = config();
    fx.process.push_exit(1, "", DARWIN_LINK_FAILURE);
    fx.process
        .push_exit(1, "", "harness.c:12:5: error: expected ';' after expression");

    let err = ReplayOrchestrator::new(&fx.runtime, &cfg)
        .run(&paths(&cfg), TRACE)
        .expect_err("harness compile fails");

    match err {
        ReplayError::HarnessCompile(diagnostics) => {
            assert_eq!(diagnostics, "harness.c:12:5: error: expected ';' after expression")
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(fx.process.spawned().len(), 2);
    assert!(!fx
        .terminal
        .written_lines()
        .iter()
        .any(|line| line.starts_with("Generated replay executable")));
}

#[test]
fn final_link_failure_is_fatal() {
    let fx = fixture();
    let cfg = config();
    fx.process.push_exit(1, "", DARWIN_LINK_FAILURE);
    fx.process.push_exit(0, "", "");
    fx.process
        .push_exit(1, "", "ld: entry point (_replay_entry_main) undefined.");

    let err = ReplayOrchestrator::new(&fx.runtime, &cfg)
        .run(&paths(&cfg), TRACE)
        .expect_err("final link fails");

    assert!(matches!(err, ReplayError::FinalLink(ref d) if d.contains("entry point")));
    assert_eq!(fx.process.spawned().len(), 3);
}

#[test]
fn missing_compiler_is_a_process_error() {
    let fx = fixture();
    let cfg = config();
    fx.process
        .push_response(Err(ReplayError::Process("clang: not found".to_string())));

    let err = ReplayOrchestrator::new(&fx.runtime, &cfg)
        .run(&paths(&cfg), TRACE)
        .expect_err("no compiler");
    assert!(matches!(err, ReplayError::Process(_)));
    assert!(fx.fs.file("/work/simple-replay-harness.c").is_none());
}

#[test]
fn unsupported_verifier_skips_without_artifacts() {
    let fx = fixture();
    let mut cfg = config();
    cfg.replay.verifier = VerifierBackend::Boogie;

    let report = ReplayOrchestrator::new(&fx.runtime, &cfg)
        .run(&paths(&cfg), TRACE)
        .expect("skip is not an error");

    assert_eq!(report.snapshot.stage, ReplayStage::Skipped);
    assert_eq!(report.exit_code(), 0);
    assert!(fx.process.spawned().is_empty());
    assert!(fx.fs.file("/work/simple-replay-harness.c").is_none());
    let lines = fx.terminal.written_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("verifiers other than 'corral'"));
    assert!(lines[0].ends_with("skipping replay"));
}

#[test]
fn unsupported_entry_points_skip_without_artifacts() {
    let fx = fixture();
    let mut cfg = config();
    cfg.replay.entry_points = vec!["worker".to_string()];

    let report = ReplayOrchestrator::new(&fx.runtime, &cfg)
        .run(&paths(&cfg), TRACE)
        .expect("skip is not an error");

    assert_eq!(report.snapshot.stage, ReplayStage::Skipped);
    assert!(report
        .skipped_reason
        .as_deref()
        .unwrap_or_default()
        .contains("entry points other than 'main'"));
    assert!(fx.process.spawned().is_empty());
}

#[test]
fn harness_file_is_overwritten_each_run() {
    let fx = fixture();
    let cfg = config();
    fx.fs
        .write_string(Path::new("/work/simple-replay-harness.c"), "stale contents")
        .expect("seed");
    queue_successful_run(&fx.process, 0);

    ReplayOrchestrator::new(&fx.runtime, &cfg)
        .run(&paths(&cfg), TRACE)
        .expect("replay");

    let harness = fx
        .fs
        .file("/work/simple-replay-harness.c")
        .expect("harness");
    assert!(!harness.contains("stale contents"));
    assert!(harness.starts_with("//\n// Generated by cexreplay"));
}

#[test]
fn trace_and_harness_warnings_are_printed_but_do_not_stop_the_run() {
    let fx = fixture();
    let cfg = config();
    let trace =
        "(smack:ext:foo = 1)\n(smack:odd:key:with:fields = 2)\n(smack:arg:main:0 = 4)\n";
    fx.process.push_exit(
        1,
        "",
        "  \"_foo\", referenced from:\n  \"_bar\", referenced from:\n",
    );
    fx.process.push_exit(0, "", "");
    fx.process.push_exit(0, "", "");
    fx.process.push_exit(0, "", "");

    let report = ReplayOrchestrator::new(&fx.runtime, &cfg)
        .run(&paths(&cfg), trace)
        .expect("replay");

    assert_eq!(report.snapshot.stage, ReplayStage::Success);
    let lines = fx.terminal.written_lines();
    assert_eq!(
        &lines[..2],
        &[
            "warning: unexpected key odd:key:with:fields".to_string(),
            "warning: cannot generate stub for bar".to_string(),
        ]
    );
}

#[test]
fn trace_without_entry_annotations_stops_before_final_link() {
    let fx = fixture();
    let cfg = config();
    fx.process.push_exit(1, "", "  \"_foo\", referenced from:\n");
    fx.process.push_exit(0, "", "");

    let run = ReplayOrchestrator::new(&fx.runtime, &cfg)
        .drive(&paths(&cfg), "(smack:ext:foo = 1)\n");

    assert!(matches!(
        run.error,
        Some(ReplayError::FinalLink(ref d)) if d.contains("replay_entry_main")
    ));
    assert_eq!(run.report.snapshot.stage, ReplayStage::Aborted);
    assert_eq!(fx.process.spawned().len(), 2);
    assert!(fx
        .terminal
        .written_lines()
        .contains(&"warning: no entry-point argument annotations found".to_string()));
    assert!(!fx
        .terminal
        .written_lines()
        .iter()
        .any(|line| line.starts_with("Error-trace replay")));
}

#[test]
fn ambiguous_entry_annotations_stop_before_final_link() {
    let fx = fixture();
    let cfg = config();
    fx.process.push_exit(0, "", "");
    fx.process.push_exit(0, "", "");

    let err = ReplayOrchestrator::new(&fx.runtime, &cfg)
        .run(&paths(&cfg), "(smack:arg:main:0 = 1)\n(smack:arg:helper:0 = 2)\n")
        .expect_err("no single entry");

    assert!(matches!(err, ReplayError::FinalLink(_)));
    let harness = fx
        .fs
        .file("/work/simple-replay-harness.c")
        .expect("harness still written");
    assert!(harness.contains("int replay_entry_main_helper() {"));
    assert!(harness.contains("int replay_entry_main_main() {"));
    assert_eq!(fx.process.spawned().len(), 2);
}

#[test]
fn aborted_run_keeps_the_stage_history_and_reason() {
    let fx = fixture();
    let cfg = config();
    fx.process.push_exit(1, "", DARWIN_LINK_FAILURE);
    fx.process.push_exit(1, "", "harness.c:3:1: error: unknown type name 'bogus'");

    let run = ReplayOrchestrator::new(&fx.runtime, &cfg).drive(&paths(&cfg), TRACE);

    assert!(matches!(run.error, Some(ReplayError::HarnessCompile(_))));
    let snapshot = &run.report.snapshot;
    assert_eq!(snapshot.stage, ReplayStage::Aborted);
    assert_eq!(
        &snapshot.history[snapshot.history.len() - 2..],
        &[ReplayStage::RecompileHarness, ReplayStage::Aborted]
    );
    assert!(snapshot
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .contains("unknown type name 'bogus'"));
    assert!(run.report.harness.is_some());
}

#[test]
fn unprefixed_targets_get_an_entry_that_exits() {
    let fx = fixture();
    let mut cfg = config();
    cfg.toolchain.symbol_prefix = String::new();
    fx.process.push_exit(
        1,
        "",
        "/usr/bin/ld: simple.o: in function `main':\n\
simple.c:(.text+0x9): undefined reference to `read_sensor'\n",
    );
    fx.process.push_exit(0, "", "");
    fx.process.push_exit(0, "", "");
    fx.process.push_exit(0, "error reached!\n", "");

    let report = ReplayOrchestrator::new(&fx.runtime, &cfg)
        .run(&paths(&cfg), TRACE)
        .expect("replay");

    assert_eq!(report.snapshot.stage, ReplayStage::Success);
    assert_eq!(report.missing.len(), 1);
    let harness = fx
        .fs
        .file("/work/simple-replay-harness.c")
        .expect("harness");
    assert!(harness.contains("  main(1);\n  exit(EXIT_SUCCESS);\n}"));
    assert_eq!(fx.process.spawned()[2].args[0], "-Wl,-e,replay_entry_main");
}

#[test]
fn temporary_object_is_removed_unless_kept() {
    let fx = fixture();
    let cfg = config();
    let paths = paths(&cfg);
    fx.fs
        .write_string(&paths.harness_object, "bitcode")
        .expect("seed object");
    queue_successful_run(&fx.process, 0);
    ReplayOrchestrator::new(&fx.runtime, &cfg)
        .run(&paths, TRACE)
        .expect("replay");
    assert!(!fx.fs.exists(&paths.harness_object));

    let kept = fixture();
    let mut keep_cfg = config();
    keep_cfg.output.keep_temps = true;
    kept.fs
        .write_string(&paths.harness_object, "bitcode")
        .expect("seed object");
    queue_successful_run(&kept.process, 0);
    ReplayOrchestrator::new(&kept.runtime, &keep_cfg)
        .run(&paths, TRACE)
        .expect("replay");
    assert!(kept.fs.exists(&paths.harness_object));
}

#[test]
fn run_with_runtime_reads_trace_and_mirrors_replay_exit_code() {
    let fx = fixture();
    fx.fs
        .write_string(Path::new("/work/trace.txt"), TRACE)
        .expect("seed trace");
    fx.fs
        .write_string(
            Path::new("/work/replay.toml"),
            include_str!("fixtures/configs/no-logging.toml"),
        )
        .expect("seed config");
    queue_successful_run(&fx.process, 3);

    let args = [
        "cexreplay",
        "--trace",
        "trace.txt",
        "--program",
        "simple.bc",
        "--config",
        "replay.toml",
        "--harness",
        "out/h.c",
    ]
    .map(std::ffi::OsString::from);
    let code = cexreplay::run_with_runtime(&args, Path::new("/work"), &fx.runtime)
        .expect("run");

    assert_eq!(code, 3);
    assert!(fx.fs.file("/work/out/h.c").is_some());
    assert!(fx
        .fs
        .created_dirs()
        .contains(&Path::new("/work/out").to_path_buf()));
    assert_eq!(
        fx.process.spawned()[0].timeout,
        Some(std::time::Duration::from_secs(60))
    );
}

#[test]
fn run_with_runtime_skips_without_touching_the_file_system() {
    let fx = fixture();
    let args = [
        "cexreplay",
        "--trace",
        "missing-trace.txt",
        "--program",
        "simple.bc",
        "--verifier",
        "boogie",
        "--log-file",
        "logs/runs.jsonl",
    ]
    .map(std::ffi::OsString::from);

    let code = cexreplay::run_with_runtime(&args, Path::new("/work"), &fx.runtime)
        .expect("skip is not an error");

    assert_eq!(code, 0);
    assert!(fx.process.spawned().is_empty());
    assert!(fx.fs.created_dirs().is_empty());
    assert!(!fx.fs.exists(Path::new("/work/simple-replay-harness.c")));
    assert_eq!(fx.terminal.written_lines().len(), 1);
}
