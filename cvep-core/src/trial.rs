/// Presentation state machine: `Idle -> Presenting -> {Completed, Aborted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentationState {
    #[default]
    Idle,
    Presenting,
    Completed,
    Aborted,
}

/// How a trial ended. Abort is a normal outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialOutcome {
    Completed,
    Aborted,
}

impl TrialOutcome {
    /// Legacy status code: 0 completed, 1 aborted.
    pub fn status(self) -> u8 {
        match self {
            TrialOutcome::Completed => 0,
            TrialOutcome::Aborted => 1,
        }
    }

    pub fn is_aborted(self) -> bool {
        matches!(self, TrialOutcome::Aborted)
    }
}

impl From<TrialOutcome> for PresentationState {
    fn from(outcome: TrialOutcome) -> Self {
        match outcome {
            TrialOutcome::Completed => PresentationState::Completed,
            TrialOutcome::Aborted => PresentationState::Aborted,
        }
    }
}
