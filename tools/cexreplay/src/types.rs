use serde::{Deserialize, Serialize};

/// Reserved name of the assertion hook defined by every generated harness.
pub const ASSERT_HOOK: &str = "__VERIFIER_assert";
/// Reserved name of the assumption hook defined by every generated harness.
pub const ASSUME_HOOK: &str = "__VERIFIER_assume";
/// Conventional program start symbol; never stubbed.
pub const PROGRAM_START: &str = "main";

pub const RESERVED_NAMES: [&str; 3] = [ASSERT_HOOK, ASSUME_HOOK, PROGRAM_START];

pub fn is_reserved(symbol: &str) -> bool {
    RESERVED_NAMES.contains(&symbol)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifierBackend {
    Corral,
    Boogie,
    Svcomp,
}

impl VerifierBackend {
    pub fn parse_cli(value: &str) -> Option<Self> {
        match value {
            "corral" => Some(Self::Corral),
            "boogie" => Some(Self::Boogie),
            "svcomp" => Some(Self::Svcomp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Corral => "corral",
            Self::Boogie => "boogie",
            Self::Svcomp => "svcomp",
        }
    }

    /// Only corral emits the `(smack:...)` value annotations replay depends on.
    pub fn supports_replay(self) -> bool {
        matches!(self, Self::Corral)
    }
}

/// What a generated stub does when replay calls it more often than the trace recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    FailFast,
    ClampToLast,
}

impl OverflowPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailFast => "fail_fast",
            Self::ClampToLast => "clamp_to_last",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStage {
    Init,
    FirstCompile,
    LinkOk,
    LinkFailed,
    GenerateHarness,
    RecompileHarness,
    FinalLink,
    Execute,
    Success,
    Failure,
    Skipped,
    Aborted,
}

impl ReplayStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::FirstCompile => "first_compile",
            Self::LinkOk => "link_ok",
            Self::LinkFailed => "link_failed",
            Self::GenerateHarness => "generate_harness",
            Self::RecompileHarness => "recompile_harness",
            Self::FinalLink => "final_link",
            Self::Execute => "execute",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failure | Self::Skipped | Self::Aborted
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The replay binary reached the error and exited with success status.
    Reproduced,
    /// The binary ran but did not signal the error.
    NotReproduced { exit_code: i32, timed_out: bool },
}

impl Verdict {
    pub fn sentence(self) -> &'static str {
        match self {
            Self::Reproduced => "Error-trace replay successful.",
            Self::NotReproduced { .. } => "Error-trace replay failed.",
        }
    }
}
