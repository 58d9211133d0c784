//! FIFO matchmaking of idle players into new duels.
//!
//! Clients poll [`MatchmakingQueue::poll`] repeatedly until they get a duel. Polling is
//! idempotent: a waiting player keeps a single entry, a matched player keeps getting the same
//! duel until it ends.
//!
//! The waiting list lives in process memory only and is empty after a restart. One mutex
//! guards the whole read-check-act sequence of [`poll`](MatchmakingQueue::poll), duel
//! creation included, so concurrent pollers can never pop the same entries twice nor put a
//! player in two duels.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::Serialize;
use tracing::{debug, error, info, instrument, trace};

use crate::{
    error::DuelError,
    lifecycle::active_duel_for,
    models::{Duel, DuelStatus, PlayerId},
    repository::{DuelRepository, ProblemRepository},
};

/// Answer to a matchmaking poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollOutcome {
    /// The player already takes part in an active duel.
    AlreadyInDuel { duel: Duel },
    /// This poll paired the player into a new duel.
    Matched { duel: Duel },
    /// Still waiting. `position` is 1-based.
    WaitingForOpponent { position: usize, queue_size: usize },
}

impl PollOutcome {
    /// The duel of the player, if any.
    pub fn duel(&self) -> Option<&Duel> {
        match self {
            PollOutcome::AlreadyInDuel { duel } | PollOutcome::Matched { duel } => Some(duel),
            PollOutcome::WaitingForOpponent { .. } => None,
        }
    }
}

/// Answer to a matchmaking cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    NotInQueue,
}

/// The waiting list and the pairing logic.
pub struct MatchmakingQueue {
    waiting: Mutex<VecDeque<PlayerId>>,
    duels: Arc<dyn DuelRepository>,
    problems: Arc<dyn ProblemRepository>,
    duel_ttl: Duration,
}

impl MatchmakingQueue {
    pub fn new(
        duels: Arc<dyn DuelRepository>,
        problems: Arc<dyn ProblemRepository>,
        duel_ttl: Duration,
    ) -> MatchmakingQueue {
        MatchmakingQueue {
            waiting: Mutex::new(VecDeque::new()),
            duels,
            problems,
            duel_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PlayerId>> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the queue, or learn about the duel the player was put in.
    ///
    /// # Errors
    ///
    /// Repository failures, and [`DuelError::NoProblemAvailable`] when a pair could not be given
    /// a problem. Entries are never lost on error: the popped pair goes back to the front.
    #[instrument(skip(self))]
    pub fn poll(&self, player: PlayerId) -> Result<PollOutcome, DuelError> {
        let mut waiting = self.lock();

        if let Some(duel) = active_duel_for(self.duels.as_ref(), player, self.duel_ttl)? {
            waiting.retain(|p| *p != player);
            trace!(duel = %duel.id, "player already in a duel");
            return Ok(PollOutcome::AlreadyInDuel { duel });
        }

        if !waiting.contains(&player) {
            waiting.push_back(player);
            debug!(queue_size = waiting.len(), "player joined the queue");
        }

        let created = self.drain(&mut waiting)?;
        if let Some(duel) = created.into_iter().find(|d| d.has_player(player)) {
            return Ok(PollOutcome::Matched { duel });
        }

        match waiting.iter().position(|p| *p == player) {
            Some(index) => Ok(PollOutcome::WaitingForOpponent {
                position: index + 1,
                queue_size: waiting.len(),
            }),
            // dropped while being paired with a partner that turned out to be busy
            None => match active_duel_for(self.duels.as_ref(), player, self.duel_ttl)? {
                Some(duel) => Ok(PollOutcome::AlreadyInDuel { duel }),
                None => {
                    waiting.push_back(player);
                    Ok(PollOutcome::WaitingForOpponent {
                        position: waiting.len(),
                        queue_size: waiting.len(),
                    })
                }
            },
        }
    }

    /// Pair the two oldest entries while at least two players wait.
    fn drain(&self, waiting: &mut VecDeque<PlayerId>) -> Result<Vec<Duel>, DuelError> {
        let mut created = Vec::new();

        while waiting.len() >= 2 {
            let (Some(first), Some(second)) = (waiting.pop_front(), waiting.pop_front()) else {
                break;
            };

            let busy = self
                .has_active_duel(first)
                .and_then(|first_busy| Ok((first_busy, self.has_active_duel(second)?)));
            let (first_busy, second_busy) = match busy {
                Ok(busy) => busy,
                Err(e) => {
                    requeue_front(waiting, first, second);
                    return Err(e.into());
                }
            };

            // the unmatched entry goes back to the front: it was waiting before anyone behind it
            match (first_busy, second_busy) {
                (false, false) => {}
                (true, false) => {
                    debug!(busy = %first, requeued = %second, "pairing aborted");
                    waiting.push_front(second);
                    continue;
                }
                (false, true) => {
                    debug!(busy = %second, requeued = %first, "pairing aborted");
                    waiting.push_front(first);
                    continue;
                }
                (true, true) => {
                    debug!(%first, %second, "both players already in a duel");
                    continue;
                }
            }

            let problem = match self.problems.random_pick() {
                Ok(Some(problem)) => problem,
                Ok(None) => {
                    requeue_front(waiting, first, second);
                    error!("no problem available, cannot create duel");
                    return Err(DuelError::NoProblemAvailable);
                }
                Err(e) => {
                    requeue_front(waiting, first, second);
                    return Err(e.into());
                }
            };

            match self
                .duels
                .create(problem.id, [first, second], DuelStatus::Active)
            {
                Ok(duel) => {
                    info!(
                        duel = %duel.id,
                        problem = %problem.title,
                        %first,
                        %second,
                        "duel created"
                    );
                    created.push(duel);
                }
                Err(e) => {
                    requeue_front(waiting, first, second);
                    return Err(e.into());
                }
            }
        }

        Ok(created)
    }

    fn has_active_duel(&self, player: PlayerId) -> anyhow::Result<bool> {
        Ok(active_duel_for(self.duels.as_ref(), player, self.duel_ttl)?.is_some())
    }

    /// Leave the queue.
    #[instrument(skip(self))]
    pub fn cancel(&self, player: PlayerId) -> CancelOutcome {
        let mut waiting = self.lock();
        match waiting.iter().position(|p| *p == player) {
            Some(index) => {
                waiting.remove(index);
                debug!("player left the queue");
                CancelOutcome::Cancelled
            }
            None => CancelOutcome::NotInQueue,
        }
    }

    /// Remove `players` from the queue if present.
    pub fn purge(&self, players: &[PlayerId]) {
        self.lock().retain(|p| !players.contains(p));
    }

    /// Empty the queue.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Waiting players, oldest first.
    pub fn waiting_players(&self) -> Vec<PlayerId> {
        self.lock().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

fn requeue_front(waiting: &mut VecDeque<PlayerId>, first: PlayerId, second: PlayerId) {
    waiting.push_front(second);
    waiting.push_front(first);
}
