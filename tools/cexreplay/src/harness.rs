//! Rendering of the replay harness translation unit.
//!
//! The harness is rebuilt from scratch on every run: a fixed preamble with
//! the assert/assume hooks, one stub per missing symbol that has recorded
//! return values, and an entry-point wrapper per argument-annotated function.

use crate::aggregate::AggregatedTrace;
use crate::symbols::MissingSymbolSet;
use crate::types::{is_reserved, OverflowPolicy};
use std::fmt;

pub const HARNESS_PREAMBLE: &str = r#"//
// Generated by cexreplay from a verifier error trace. Do not edit.
// This file is ephemeral and is rewritten on every replay run.
// Each stub below returns the values its function produced in the trace,
// in the order they were observed. Link this file with the program under
// test to reproduce the reported error natively.
//
#include <stdio.h>
#include <stdlib.h>

void __VERIFIER_assert(int b) {
  if (!b) {
    printf("error reached!\n");
    exit(EXIT_SUCCESS);
  }
}

void __VERIFIER_assume(int b) {
  if (!b) {
    printf("assumption does not hold.\n");
    exit(EXIT_FAILURE);
  }
}
"#;

pub const ERROR_REACHED_MARKER: &str = "error reached!";
pub const ASSUMPTION_VIOLATED_MARKER: &str = "assumption does not hold.";

/// How an entry wrapper finishes once its target returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryReturn {
    /// The loader calls the entry like `main` (Mach-O `LC_MAIN`).
    Return,
    /// The entry is the raw process entry and has no caller (ELF).
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessOptions {
    pub entry_symbol: String,
    pub overflow: OverflowPolicy,
    pub entry_return: EntryReturn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarnessWarning {
    CannotStub(String),
    NativeImplementation(String),
    MultipleEntryPoints(Vec<String>),
    NoEntryPoint,
}

impl fmt::Display for HarnessWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CannotStub(symbol) => write!(f, "cannot generate stub for {symbol}"),
            Self::NativeImplementation(symbol) => write!(
                f,
                "using native implementation of function {symbol}; replay fidelity not guaranteed"
            ),
            Self::MultipleEntryPoints(functions) => write!(
                f,
                "multiple entry-point argument annotations found: {}",
                functions.join(", ")
            ),
            Self::NoEntryPoint => write!(f, "no entry-point argument annotations found"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryWrapper {
    pub symbol: String,
    pub target: String,
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedHarness {
    pub source: String,
    pub stubbed: Vec<String>,
    pub wrappers: Vec<EntryWrapper>,
    pub warnings: Vec<HarnessWarning>,
}

pub fn generate_harness(
    trace: &AggregatedTrace,
    missing: &MissingSymbolSet,
    options: &HarnessOptions,
) -> GeneratedHarness {
    let mut source = String::from(HARNESS_PREAMBLE);
    let mut stubbed = Vec::new();
    let mut warnings = Vec::new();

    for symbol in missing.iter().filter(|symbol| !is_reserved(symbol)) {
        match trace.return_values.get(symbol) {
            Some(values) if !values.is_empty() => {
                source.push('\n');
                source.push_str(&render_stub(symbol, values, options.overflow));
                stubbed.push(symbol.clone());
            }
            _ => warnings.push(HarnessWarning::CannotStub(symbol.clone())),
        }
    }

    for function in trace.return_values.keys() {
        if !missing.contains(function) {
            warnings.push(HarnessWarning::NativeImplementation(function.clone()));
        }
    }

    let candidates = trace.arguments.keys().cloned().collect::<Vec<_>>();
    match candidates.len() {
        0 => warnings.push(HarnessWarning::NoEntryPoint),
        1 => {}
        _ => warnings.push(HarnessWarning::MultipleEntryPoints(candidates.clone())),
    }

    let mut wrappers = Vec::new();
    for function in &candidates {
        // With several candidates none of them may claim the entry symbol.
        let symbol = if candidates.len() == 1 {
            options.entry_symbol.clone()
        } else {
            format!("{}_{function}", options.entry_symbol)
        };
        let wrapper = EntryWrapper {
            symbol,
            target: function.clone(),
            arguments: trace
                .arguments_for(function)
                .into_iter()
                .map(str::to_string)
                .collect(),
        };
        source.push('\n');
        source.push_str(&render_wrapper(&wrapper, options.entry_return));
        wrappers.push(wrapper);
    }

    GeneratedHarness {
        source,
        stubbed,
        wrappers,
        warnings,
    }
}

fn render_stub(function: &str, values: &[String], overflow: OverflowPolicy) -> String {
    let table = format!("{function}__replay_table");
    let idx = format!("{function}__replay_idx");
    let len = format!("(sizeof({table}) / sizeof({table}[0]))");

    let mut code = String::new();
    code.push_str(&format!("// stub for function: {function}\n"));
    code.push_str(&format!(
        "static const int {table}[] = {{{}}};\n",
        values.join(", ")
    ));
    code.push_str(&format!("static unsigned long {idx} = 0;\n\n"));
    code.push_str(&format!("int {function}() {{\n"));
    match overflow {
        OverflowPolicy::FailFast => {
            code.push_str(&format!("  if ({idx} >= {len}) {{\n"));
            code.push_str(&format!(
                "    printf(\"replay values exhausted for {function}.\\n\");\n"
            ));
            code.push_str("    exit(EXIT_FAILURE);\n");
            code.push_str("  }\n");
        }
        OverflowPolicy::ClampToLast => {
            code.push_str(&format!("  if ({idx} >= {len})\n"));
            code.push_str(&format!("    return {table}[{len} - 1];\n"));
        }
    }
    code.push_str(&format!("  return {table}[{idx}++];\n"));
    code.push_str("}\n");
    code
}

fn render_wrapper(wrapper: &EntryWrapper, entry_return: EntryReturn) -> String {
    let mut code = String::new();
    code.push_str(&format!("// entry point wrapper for: {}\n", wrapper.target));
    code.push_str(&format!("int {}();\n\n", wrapper.target));
    code.push_str(&format!("int {}() {{\n", wrapper.symbol));
    code.push_str(&format!(
        "  {}({});\n",
        wrapper.target,
        wrapper.arguments.join(", ")
    ));
    match entry_return {
        EntryReturn::Return => code.push_str("  return 0;\n"),
        EntryReturn::Exit => code.push_str("  exit(EXIT_SUCCESS);\n"),
    }
    code.push_str("}\n");
    code
}
