//! Entry point of the duel core.
//!
//! [`DuelServer`] wires one [`SandboxRunner`], one [`MatchmakingQueue`] and one
//! [`DuelController`] around the two repositories, and exposes the operations a transport
//! layer (HTTP handlers, a CLI, tests) calls on behalf of an authenticated player.
//!
//! # Concurrency
//!
//! Every method takes `&self` and the server is `Send + Sync`: share it in an `Arc` across
//! request threads. [`DuelServer::submit_code`] blocks for the whole compile and run, and
//! [`DuelServer::wait_for_duel_update`] for up to the configured long-poll timeout, so neither
//! belongs on an async executor thread.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use code_duel::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::from_env();
//!     let server = DuelServer::new(
//!         config,
//!         Arc::new(InMemoryDuelRepository::new()),
//!         Arc::new(InMemoryProblemRepository::with_default_problems("harnesses")),
//!     )?;
//!
//!     server.join_or_poll_match(PlayerId(1))?;
//!     if let PollOutcome::Matched { duel } = server.join_or_poll_match(PlayerId(2))? {
//!         let verdict = server.submit_code(duel.id, PlayerId(2), "int main_solution;")?;
//!         println!("{}", serde_json::to_string(&verdict)?);
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{error, instrument};

use crate::{
    configuration::Configuration,
    error::DuelError,
    history::{player_history, PlayerHistory},
    lifecycle::DuelController,
    logger::init_logger,
    matchmaking::{CancelOutcome, MatchmakingQueue, PollOutcome},
    models::{Duel, DuelId, PlayerId, Submission},
    repository::{DuelRepository, ProblemRepository},
    sandbox::{Judge, SandboxRunner},
    verdict::Verdict,
};

/// Number of duels listed by [`DuelServer::history`].
pub const HISTORY_LENGTH: usize = 20;

pub struct DuelServer {
    config: Configuration,
    duels: Arc<dyn DuelRepository>,
    queue: Arc<MatchmakingQueue>,
    controller: DuelController,
}

impl DuelServer {
    /// Build a server judging with a [`SandboxRunner`].
    ///
    /// Installs the file logger when `config` asks for it.
    #[instrument(skip_all)]
    pub fn new(
        config: Configuration,
        duels: Arc<dyn DuelRepository>,
        problems: Arc<dyn ProblemRepository>,
    ) -> anyhow::Result<DuelServer> {
        if config.log {
            init_logger(&config)?;
        }
        let judge = Arc::new(SandboxRunner::new(&config));
        Ok(Self::with_judge(config, duels, problems, judge))
    }

    /// Build a server around any [`Judge`]. Never touches the global logger.
    pub fn with_judge(
        config: Configuration,
        duels: Arc<dyn DuelRepository>,
        problems: Arc<dyn ProblemRepository>,
        judge: Arc<dyn Judge>,
    ) -> DuelServer {
        let queue = Arc::new(MatchmakingQueue::new(
            duels.clone(),
            problems.clone(),
            config.duel_ttl,
        ));
        let controller =
            DuelController::new(&config, duels.clone(), problems, judge, queue.clone());
        DuelServer {
            config,
            duels,
            queue,
            controller,
        }
    }

    /// Join the matchmaking queue, or learn about the duel the player is in.
    pub fn join_or_poll_match(&self, player: PlayerId) -> Result<PollOutcome, DuelError> {
        self.queue.poll(player).inspect_err(report)
    }

    pub fn cancel_match(&self, player: PlayerId) -> CancelOutcome {
        self.queue.cancel(player)
    }

    /// Judge a submission. See [`DuelController::submit`].
    pub fn submit_code(
        &self,
        duel: DuelId,
        player: PlayerId,
        code: &str,
    ) -> Result<Verdict, DuelError> {
        self.controller.submit(duel, player, code).inspect_err(report)
    }

    pub fn get_duel(&self, duel: DuelId, player: PlayerId) -> Result<Duel, DuelError> {
        self.controller.get_duel(duel, player).inspect_err(report)
    }

    /// Block until the duel changes after `since`, or the long-poll timeout elapses.
    pub fn wait_for_duel_update(
        &self,
        duel: DuelId,
        player: PlayerId,
        since: OffsetDateTime,
    ) -> Result<Duel, DuelError> {
        self.controller
            .wait_for_update(duel, player, since)
            .inspect_err(report)
    }

    /// Submissions of `duel`, for a participant.
    pub fn submissions(
        &self,
        duel: DuelId,
        player: PlayerId,
    ) -> Result<Vec<Submission>, DuelError> {
        self.controller.get_duel(duel, player)?;
        self.controller.submissions(duel).inspect_err(report)
    }

    /// Statistics and the [`HISTORY_LENGTH`] most recent duels of `player`.
    pub fn history(&self, player: PlayerId) -> Result<PlayerHistory, DuelError> {
        player_history(self.duels.as_ref(), player, self.config.duel_ttl, HISTORY_LENGTH)
            .map_err(DuelError::from)
            .inspect_err(report)
    }

    /// Operator reset: empty the queue and abandon every active duel.
    #[instrument(skip(self))]
    pub fn reset(&self) -> anyhow::Result<usize> {
        self.queue.clear();
        self.controller.abandon_active_duels()
    }

    pub fn queue(&self) -> &MatchmakingQueue {
        &self.queue
    }
}

fn report(e: &DuelError) {
    if !e.is_input_error() {
        error!("{e:#}");
    }
}
