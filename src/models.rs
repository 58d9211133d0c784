//! Records shared by the matchmaking queue, the duel lifecycle and the repositories.

use std::{fmt, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::verdict::Verdict;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Stable player identity, as resolved by the identity collaborator.
    PlayerId
);
id_type!(
    /// Identity of a [`Problem`].
    ProblemId
);
id_type!(
    /// Identity of a [`Duel`].
    DuelId
);
id_type!(
    /// Identity of a [`Submission`].
    SubmissionId
);

/// How hard a problem is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// A problem two players race to solve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub id: ProblemId,
    pub title: String,
    pub difficulty: Difficulty,
    /// Wall-clock limit of one execution of a submission.
    pub time_limit: Duration,
    /// Harness template the submitted code is substituted into.
    pub harness: PathBuf,
}

/// Where a duel is in its lifecycle.
///
/// `Completed` and `Abandoned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuelStatus {
    Pending,
    Active,
    Completed,
    Abandoned,
}

impl DuelStatus {
    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        match self {
            DuelStatus::Pending | DuelStatus::Active => false,
            DuelStatus::Completed | DuelStatus::Abandoned => true,
        }
    }
}

impl fmt::Display for DuelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DuelStatus::Pending => "pending",
            DuelStatus::Active => "active",
            DuelStatus::Completed => "completed",
            DuelStatus::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// A two-player contest bound to one problem.
///
/// `winner` is set if and only if `status` is [`DuelStatus::Completed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duel {
    pub id: DuelId,
    pub problem: ProblemId,
    /// Participants, in join order.
    pub players: [PlayerId; 2],
    pub status: DuelStatus,
    pub winner: Option<PlayerId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Bumped on every state change. Watchers compare it to detect progress.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Duel {
    /// True if `player` is one of the two participants.
    pub fn has_player(&self, player: PlayerId) -> bool {
        self.players.contains(&player)
    }

    /// The other participant, if `player` takes part in this duel.
    pub fn opponent_of(&self, player: PlayerId) -> Option<PlayerId> {
        match self.players {
            [a, b] if a == player => Some(b),
            [a, b] if b == player => Some(a),
            _ => None,
        }
    }
}

/// Fields a conditional duel update writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuelUpdate {
    pub status: DuelStatus,
    pub winner: Option<PlayerId>,
}

impl DuelUpdate {
    /// Keep the duel active, only bumping its last-update timestamp.
    pub fn touch() -> Self {
        Self {
            status: DuelStatus::Active,
            winner: None,
        }
    }

    /// Complete the duel with `winner`.
    pub fn completed(winner: PlayerId) -> Self {
        Self {
            status: DuelStatus::Completed,
            winner: Some(winner),
        }
    }

    /// Abandon the duel.
    pub fn abandoned() -> Self {
        Self {
            status: DuelStatus::Abandoned,
            winner: None,
        }
    }
}

/// One judged attempt. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub duel: DuelId,
    pub player: PlayerId,
    pub code: String,
    pub verdict: Verdict,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
}

/// A submission before the repository assigned it an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubmission {
    pub duel: DuelId,
    pub player: PlayerId,
    pub code: String,
    pub verdict: Verdict,
}
