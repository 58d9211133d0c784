//! Storage collaborators of the duel core.
//!
//! The core only relies on the [`DuelRepository`] and [`ProblemRepository`] traits. The
//! mutex-guarded in-memory implementations fit tests, the CLI and single-process deployments;
//! a database-backed implementation has to provide the same atomic conditional update.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::bail;
use rand::seq::SliceRandom;
use time::OffsetDateTime;

use crate::models::{
    Difficulty, Duel, DuelId, DuelStatus, DuelUpdate, NewSubmission, PlayerId, Problem,
    ProblemId, Submission, SubmissionId,
};

/// Durable duel and submission records.
pub trait DuelRepository: Send + Sync {
    /// Create a duel with fresh timestamps.
    fn create(
        &self,
        problem: ProblemId,
        players: [PlayerId; 2],
        status: DuelStatus,
    ) -> anyhow::Result<Duel>;

    fn get(&self, id: DuelId) -> anyhow::Result<Option<Duel>>;

    /// Every duel matching `predicate`.
    fn filter(&self, predicate: &dyn Fn(&Duel) -> bool) -> anyhow::Result<Vec<Duel>>;

    /// Atomically apply `update` if the duel is currently `expected`, bumping `updated_at`.
    ///
    /// Returns the updated duel, or `None` if the duel is missing or its status differs.
    fn update_if(
        &self,
        id: DuelId,
        expected: DuelStatus,
        update: DuelUpdate,
    ) -> anyhow::Result<Option<Duel>>;

    /// Append a submission to the audit log.
    fn append_submission(&self, submission: NewSubmission) -> anyhow::Result<Submission>;

    /// Submissions of a duel, oldest first.
    fn submissions(&self, duel: DuelId) -> anyhow::Result<Vec<Submission>>;
}

/// Read access to the problem set.
pub trait ProblemRepository: Send + Sync {
    fn get(&self, id: ProblemId) -> anyhow::Result<Option<Problem>>;

    /// Uniformly random problem, `None` if there is none.
    fn random_pick(&self) -> anyhow::Result<Option<Problem>>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // every critical section leaves the maps consistent, so a poisoned lock is still usable
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct DuelTables {
    next_duel: u64,
    next_submission: u64,
    duels: BTreeMap<DuelId, Duel>,
    submissions: Vec<Submission>,
}

/// In-memory [`DuelRepository`].
#[derive(Debug, Default)]
pub struct InMemoryDuelRepository {
    tables: Mutex<DuelTables>,
}

impl InMemoryDuelRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the last-update timestamp of a duel, bypassing the lifecycle.
    ///
    /// Meant for importing records and for fixtures that need an aged duel.
    pub fn set_updated_at(&self, id: DuelId, updated_at: OffsetDateTime) -> anyhow::Result<()> {
        let mut tables = lock(&self.tables);
        let Some(duel) = tables.duels.get_mut(&id) else {
            bail!("duel {id} does not exist");
        };
        duel.updated_at = updated_at;
        Ok(())
    }
}

impl DuelRepository for InMemoryDuelRepository {
    fn create(
        &self,
        problem: ProblemId,
        players: [PlayerId; 2],
        status: DuelStatus,
    ) -> anyhow::Result<Duel> {
        if players[0] == players[1] {
            bail!("a duel needs two distinct players, got {} twice", players[0]);
        }
        let mut tables = lock(&self.tables);
        tables.next_duel += 1;
        let now = OffsetDateTime::now_utc();
        let duel = Duel {
            id: DuelId(tables.next_duel),
            problem,
            players,
            status,
            winner: None,
            created_at: now,
            updated_at: now,
        };
        tables.duels.insert(duel.id, duel.clone());
        Ok(duel)
    }

    fn get(&self, id: DuelId) -> anyhow::Result<Option<Duel>> {
        Ok(lock(&self.tables).duels.get(&id).cloned())
    }

    fn filter(&self, predicate: &dyn Fn(&Duel) -> bool) -> anyhow::Result<Vec<Duel>> {
        Ok(lock(&self.tables)
            .duels
            .values()
            .filter(|duel| predicate(duel))
            .cloned()
            .collect())
    }

    fn update_if(
        &self,
        id: DuelId,
        expected: DuelStatus,
        update: DuelUpdate,
    ) -> anyhow::Result<Option<Duel>> {
        if (update.status == DuelStatus::Completed) != update.winner.is_some() {
            bail!("a winner is required for, and only for, completed duels");
        }

        let mut tables = lock(&self.tables);
        let Some(duel) = tables.duels.get_mut(&id) else {
            return Ok(None);
        };
        if duel.status != expected {
            return Ok(None);
        }
        if let Some(winner) = update.winner {
            if !duel.has_player(winner) {
                bail!("player {winner} is not part of duel {id}");
            }
        }
        duel.status = update.status;
        duel.winner = update.winner;
        // strictly increasing, watchers compare timestamps for equality
        let now = OffsetDateTime::now_utc();
        duel.updated_at = if now > duel.updated_at {
            now
        } else {
            duel.updated_at + time::Duration::nanoseconds(1)
        };
        Ok(Some(duel.clone()))
    }

    fn append_submission(&self, submission: NewSubmission) -> anyhow::Result<Submission> {
        let mut tables = lock(&self.tables);
        tables.next_submission += 1;
        let submission = Submission {
            id: SubmissionId(tables.next_submission),
            duel: submission.duel,
            player: submission.player,
            code: submission.code,
            verdict: submission.verdict,
            submitted_at: OffsetDateTime::now_utc(),
        };
        tables.submissions.push(submission.clone());
        Ok(submission)
    }

    fn submissions(&self, duel: DuelId) -> anyhow::Result<Vec<Submission>> {
        Ok(lock(&self.tables)
            .submissions
            .iter()
            .filter(|s| s.duel == duel)
            .cloned()
            .collect())
    }
}

/// In-memory [`ProblemRepository`].
#[derive(Debug, Default)]
pub struct InMemoryProblemRepository {
    problems: Mutex<Vec<Problem>>,
}

impl InMemoryProblemRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default problem set, with harnesses looked up in `harness_dir`.
    ///
    /// The crate ships these harnesses under `harnesses/`.
    pub fn with_default_problems(harness_dir: impl AsRef<Path>) -> Self {
        let dir = harness_dir.as_ref();
        let repository = Self::new();
        repository.insert(
            "Two Sum",
            Difficulty::Easy,
            Duration::from_secs(5),
            dir.join("two_sum_test.c"),
        );
        repository.insert(
            "Longest Common Prefix",
            Difficulty::Easy,
            Duration::from_secs(5),
            dir.join("longest_common_prefix.c"),
        );
        repository
    }

    /// Add a problem and return it with its new identity.
    pub fn insert(
        &self,
        title: impl Into<String>,
        difficulty: Difficulty,
        time_limit: Duration,
        harness: impl Into<std::path::PathBuf>,
    ) -> Problem {
        let mut problems = lock(&self.problems);
        let problem = Problem {
            id: ProblemId(problems.len() as u64 + 1),
            title: title.into(),
            difficulty,
            time_limit,
            harness: harness.into(),
        };
        problems.push(problem.clone());
        problem
    }
}

impl ProblemRepository for InMemoryProblemRepository {
    fn get(&self, id: ProblemId) -> anyhow::Result<Option<Problem>> {
        Ok(lock(&self.problems).iter().find(|p| p.id == id).cloned())
    }

    fn random_pick(&self) -> anyhow::Result<Option<Problem>> {
        Ok(lock(&self.problems)
            .choose(&mut rand::thread_rng())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::Verdict;

    #[test]
    fn update_if_is_conditional() {
        let repo = InMemoryDuelRepository::new();
        let duel = repo
            .create(ProblemId(1), [PlayerId(1), PlayerId(2)], DuelStatus::Active)
            .unwrap();

        let completed = repo
            .update_if(duel.id, DuelStatus::Active, DuelUpdate::completed(PlayerId(2)))
            .unwrap()
            .unwrap();
        assert_eq!(completed.status, DuelStatus::Completed);
        assert_eq!(completed.winner, Some(PlayerId(2)));
        assert!(completed.updated_at > duel.updated_at);

        let second = repo
            .update_if(duel.id, DuelStatus::Active, DuelUpdate::completed(PlayerId(1)))
            .unwrap();
        assert!(second.is_none());
        assert_eq!(repo.get(duel.id).unwrap().unwrap().winner, Some(PlayerId(2)));
    }

    #[test]
    fn winner_must_be_a_participant() {
        let repo = InMemoryDuelRepository::new();
        let duel = repo
            .create(ProblemId(1), [PlayerId(1), PlayerId(2)], DuelStatus::Active)
            .unwrap();
        assert!(repo
            .update_if(duel.id, DuelStatus::Active, DuelUpdate::completed(PlayerId(3)))
            .is_err());
        assert!(repo
            .create(ProblemId(1), [PlayerId(1), PlayerId(1)], DuelStatus::Active)
            .is_err());
    }

    #[test]
    fn submissions_are_listed_per_duel() {
        let repo = InMemoryDuelRepository::new();
        for duel in [DuelId(1), DuelId(2), DuelId(1)] {
            repo.append_submission(NewSubmission {
                duel,
                player: PlayerId(1),
                code: "int x;".to_owned(),
                verdict: Verdict::error("nope"),
            })
            .unwrap();
        }
        let listed = repo.submissions(DuelId(1)).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].id < listed[1].id);
    }

    #[test]
    fn random_pick_on_empty_set() {
        let problems = InMemoryProblemRepository::new();
        assert!(problems.random_pick().unwrap().is_none());
        let two_sum = problems.insert(
            "Two Sum",
            Difficulty::Easy,
            Duration::from_secs(5),
            "two_sum_test.c",
        );
        assert_eq!(problems.random_pick().unwrap(), Some(two_sum.clone()));
        assert_eq!(problems.get(two_sum.id).unwrap(), Some(two_sum));
    }
}
