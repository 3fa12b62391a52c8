use crate::errors::ReplayError;
use crate::types::{ReplayStage, Verdict};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub stage: ReplayStage,
    pub history: Vec<ReplayStage>,
    pub verdict: Option<Verdict>,
    pub failure_reason: Option<String>,
}

impl Default for StageSnapshot {
    fn default() -> Self {
        Self {
            stage: ReplayStage::Init,
            history: vec![ReplayStage::Init],
            verdict: None,
            failure_reason: None,
        }
    }
}

impl StageSnapshot {
    pub fn transition(&mut self, next: ReplayStage) -> Result<(), ReplayError> {
        validate_transition(self.stage, next)?;
        self.stage = next;
        self.history.push(next);
        Ok(())
    }

    pub fn record_verdict(&mut self, verdict: Verdict) -> Result<(), ReplayError> {
        let next = match verdict {
            Verdict::Reproduced => ReplayStage::Success,
            Verdict::NotReproduced { .. } => ReplayStage::Failure,
        };
        self.transition(next)?;
        self.verdict = Some(verdict);
        Ok(())
    }

    /// Moves to `Aborted` from any non-terminal stage.
    pub fn abort(&mut self, reason: impl Into<String>) -> Result<(), ReplayError> {
        self.failure_reason = Some(reason.into());
        self.transition(ReplayStage::Aborted)
    }
}

pub fn validate_transition(from: ReplayStage, to: ReplayStage) -> Result<(), ReplayError> {
    use ReplayStage as S;

    let allowed = match from {
        S::Init => matches!(to, S::FirstCompile | S::Skipped | S::Aborted),
        S::FirstCompile => matches!(to, S::LinkOk | S::LinkFailed | S::Aborted),
        S::LinkOk | S::LinkFailed => matches!(to, S::GenerateHarness | S::Aborted),
        S::GenerateHarness => matches!(to, S::RecompileHarness | S::Aborted),
        S::RecompileHarness => matches!(to, S::FinalLink | S::Aborted),
        S::FinalLink => matches!(to, S::Execute | S::Aborted),
        S::Execute => matches!(to, S::Success | S::Failure | S::Aborted),
        S::Success | S::Failure | S::Skipped | S::Aborted => false,
    };

    if !allowed {
        return Err(ReplayError::InvalidTransition(format!(
            "{} -> {}",
            from.as_str(),
            to.as_str()
        )));
    }
    Ok(())
}
