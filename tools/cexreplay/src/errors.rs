use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: String, seconds: u64 },
    #[error("generated harness failed to compile:\n{0}")]
    HarnessCompile(String),
    #[error("final link of replay executable failed:\n{0}")]
    FinalLink(String),
    #[error("illegal transition: {0}")]
    InvalidTransition(String),
}
