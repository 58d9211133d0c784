use crate::models::{DuelId, DuelStatus, PlayerId, ProblemId};

/// Why a duel operation was refused.
#[derive(Debug, thiserror::Error)]
pub enum DuelError {
    #[error("duel {0} does not exist")]
    DuelNotFound(DuelId),

    #[error("duel {duel} is inactive ({status})")]
    InactiveDuel { duel: DuelId, status: DuelStatus },

    #[error("player {player} is not a participant of duel {duel}")]
    NotParticipant { duel: DuelId, player: PlayerId },

    #[error("no code submitted")]
    EmptyCode,

    #[error("no problem available to start a duel")]
    NoProblemAvailable,

    #[error("problem {0} does not exist")]
    ProblemNotFound(ProblemId),

    #[error(transparent)]
    Repository(#[from] anyhow::Error),
}

impl DuelError {
    /// Caller mistakes, reported as-is and never worth retrying.
    ///
    /// Everything else is an infrastructure failure that deserves an alert.
    pub fn is_input_error(&self) -> bool {
        match self {
            DuelError::DuelNotFound(_)
            | DuelError::InactiveDuel { .. }
            | DuelError::NotParticipant { .. }
            | DuelError::EmptyCode => true,
            DuelError::NoProblemAvailable
            | DuelError::ProblemNotFound(_)
            | DuelError::Repository(_) => false,
        }
    }
}
