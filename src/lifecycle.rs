//! Duel state machine: `pending → active → {completed, abandoned}`.
//!
//! Only matchmaking creates active duels, only a winning submission completes one and only
//! staleness abandons one. Completed and abandoned are terminal.
//!
//! Staleness is lazy. An active duel without progress for longer than the TTL is rewritten to
//! abandoned by the first read path that looks at it; every such path goes through
//! [`expire_if_stale`].

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use crate::{
    configuration::Configuration,
    error::DuelError,
    matchmaking::MatchmakingQueue,
    models::{Duel, DuelId, DuelStatus, DuelUpdate, NewSubmission, PlayerId, Submission},
    repository::{DuelRepository, ProblemRepository},
    sandbox::Judge,
    verdict::Verdict,
};

/// True if `duel` is active and has not been updated for more than `ttl` at `now`.
pub fn is_stale(duel: &Duel, ttl: Duration, now: OffsetDateTime) -> bool {
    duel.status == DuelStatus::Active && now - duel.updated_at > ttl
}

/// Abandon `duel` if it is stale, and return its current state.
///
/// If another caller changed the duel first, the stored state is returned instead.
pub fn expire_if_stale(
    repository: &dyn DuelRepository,
    duel: Duel,
    ttl: Duration,
) -> anyhow::Result<Duel> {
    if !is_stale(&duel, ttl, OffsetDateTime::now_utc()) {
        return Ok(duel);
    }
    match repository.update_if(duel.id, DuelStatus::Active, DuelUpdate::abandoned())? {
        Some(abandoned) => {
            info!(duel = %abandoned.id, "stale duel abandoned");
            Ok(abandoned)
        }
        None => Ok(repository.get(duel.id)?.unwrap_or(duel)),
    }
}

/// The non-stale active duel of `player`, the newest one if there are several.
///
/// Stale duels met on the way are abandoned.
pub fn active_duel_for(
    repository: &dyn DuelRepository,
    player: PlayerId,
    ttl: Duration,
) -> anyhow::Result<Option<Duel>> {
    let candidates =
        repository.filter(&|d| d.status == DuelStatus::Active && d.has_player(player))?;

    let mut active = None;
    for duel in candidates {
        let duel = expire_if_stale(repository, duel, ttl)?;
        if duel.status != DuelStatus::Active {
            continue;
        }
        match &active {
            Some(current) if at_least_as_new(current, &duel) => {}
            _ => active = Some(duel),
        }
    }
    Ok(active)
}

fn at_least_as_new(current: &Duel, other: &Duel) -> bool {
    (current.created_at, current.id) >= (other.created_at, other.id)
}

/// Accepts submissions and drives duels to their end.
pub struct DuelController {
    duels: Arc<dyn DuelRepository>,
    problems: Arc<dyn ProblemRepository>,
    judge: Arc<dyn Judge>,
    queue: Arc<MatchmakingQueue>,
    duel_ttl: Duration,
    long_poll_timeout: Duration,
    long_poll_interval: Duration,
}

impl DuelController {
    pub fn new(
        config: &Configuration,
        duels: Arc<dyn DuelRepository>,
        problems: Arc<dyn ProblemRepository>,
        judge: Arc<dyn Judge>,
        queue: Arc<MatchmakingQueue>,
    ) -> DuelController {
        DuelController {
            duels,
            problems,
            judge,
            queue,
            duel_ttl: config.duel_ttl,
            long_poll_timeout: config.long_poll_timeout,
            long_poll_interval: config.long_poll_interval,
        }
    }

    /// Judge `code` for `player` in `duel`, and complete the duel if it passes.
    ///
    /// The submission is recorded whatever the verdict. The verdict is returned even when a
    /// concurrent winner got the duel first.
    ///
    /// # Errors
    ///
    /// [`DuelError::InactiveDuel`], [`DuelError::NotParticipant`] and [`DuelError::EmptyCode`]
    /// reject the submission before anything runs. The remaining variants report
    /// infrastructure failures.
    #[instrument(skip(self, code), fields(code_len = code.len()))]
    pub fn submit(
        &self,
        duel: DuelId,
        player: PlayerId,
        code: &str,
    ) -> Result<Verdict, DuelError> {
        let current = self.load(duel)?;
        if current.status != DuelStatus::Active {
            return Err(DuelError::InactiveDuel {
                duel,
                status: current.status,
            });
        }
        if !current.has_player(player) {
            return Err(DuelError::NotParticipant { duel, player });
        }
        if code.is_empty() {
            return Err(DuelError::EmptyCode);
        }
        let problem = self
            .problems
            .get(current.problem)?
            .ok_or(DuelError::ProblemNotFound(current.problem))?;

        let verdict = self.judge.judge(code, &problem.harness, problem.time_limit);

        self.duels.append_submission(NewSubmission {
            duel,
            player,
            code: code.to_owned(),
            verdict: verdict.clone(),
        })?;

        if verdict.is_success() {
            match self
                .duels
                .update_if(duel, DuelStatus::Active, DuelUpdate::completed(player))?
            {
                Some(_) => info!(%duel, winner = %player, "duel completed"),
                None => warn!(%duel, %player, "successful submission after the duel ended"),
            }
            // either way neither player belongs in the queue any more
            self.queue.purge(&current.players);
        } else if self
            .duels
            .update_if(duel, DuelStatus::Active, DuelUpdate::touch())?
            .is_none()
        {
            debug!(%duel, "duel ended while the submission was judged");
        }

        Ok(verdict)
    }

    /// Current state of `duel` as seen by `player`.
    pub fn get_duel(&self, duel: DuelId, player: PlayerId) -> Result<Duel, DuelError> {
        let current = self.load(duel)?;
        if !current.has_player(player) {
            return Err(DuelError::NotParticipant { duel, player });
        }
        Ok(current)
    }

    /// Long-poll variant of [`get_duel`](Self::get_duel).
    ///
    /// Rereads the duel until its `updated_at` differs from `since` or the long-poll timeout
    /// elapses, then returns the current state. A finished duel is returned at once.
    #[instrument(skip(self))]
    pub fn wait_for_update(
        &self,
        duel: DuelId,
        player: PlayerId,
        since: OffsetDateTime,
    ) -> Result<Duel, DuelError> {
        let deadline = Instant::now() + self.long_poll_timeout;
        loop {
            let current = self.get_duel(duel, player)?;
            let now = Instant::now();
            if current.updated_at != since || current.status.is_terminal() || now >= deadline {
                return Ok(current);
            }
            thread::sleep(self.long_poll_interval.min(deadline - now));
        }
    }

    /// Submissions of `duel`, oldest first.
    pub fn submissions(&self, duel: DuelId) -> Result<Vec<Submission>, DuelError> {
        Ok(self.duels.submissions(duel)?)
    }

    /// Abandon every active duel and return how many were abandoned.
    ///
    /// Operator reset after a crash.
    #[instrument(skip(self))]
    pub fn abandon_active_duels(&self) -> anyhow::Result<usize> {
        let active = self.duels.filter(&|d| d.status == DuelStatus::Active)?;
        let mut abandoned = 0;
        for duel in active {
            if self
                .duels
                .update_if(duel.id, DuelStatus::Active, DuelUpdate::abandoned())?
                .is_some()
            {
                abandoned += 1;
            }
        }
        info!(abandoned, "active duels abandoned");
        Ok(abandoned)
    }

    fn load(&self, duel: DuelId) -> Result<Duel, DuelError> {
        let current = self
            .duels
            .get(duel)?
            .ok_or(DuelError::DuelNotFound(duel))?;
        Ok(expire_if_stale(self.duels.as_ref(), current, self.duel_ttl)?)
    }
}
