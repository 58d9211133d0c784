//! Per-player record of past and ongoing duels.

use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    lifecycle::expire_if_stale,
    models::{Duel, DuelId, DuelStatus, PlayerId, ProblemId},
    repository::DuelRepository,
};

/// Outcome of one duel from the point of view of one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchResult {
    Win,
    Loss,
    Abandoned,
    InProgress,
}

impl MatchResult {
    fn of(duel: &Duel, player: PlayerId) -> MatchResult {
        match duel.status {
            DuelStatus::Completed if duel.winner == Some(player) => MatchResult::Win,
            DuelStatus::Completed => MatchResult::Loss,
            DuelStatus::Abandoned => MatchResult::Abandoned,
            DuelStatus::Pending | DuelStatus::Active => MatchResult::InProgress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchRecord {
    pub duel: DuelId,
    pub problem: ProblemId,
    pub opponent: PlayerId,
    pub result: MatchResult,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlayerStatistics {
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    pub abandoned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerHistory {
    pub statistics: PlayerStatistics,
    /// Newest first.
    pub recent_matches: Vec<MatchRecord>,
}

/// Statistics over every duel of `player`, plus its `limit` most recent duels.
///
/// Stale duels are abandoned before being counted.
pub fn player_history(
    repository: &dyn DuelRepository,
    player: PlayerId,
    ttl: Duration,
    limit: usize,
) -> anyhow::Result<PlayerHistory> {
    let mut duels = repository
        .filter(&|d| d.has_player(player))?
        .into_iter()
        .map(|d| expire_if_stale(repository, d, ttl))
        .collect::<anyhow::Result<Vec<_>>>()?;
    duels.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

    let mut statistics = PlayerStatistics {
        total: duels.len(),
        ..Default::default()
    };
    let mut recent_matches = Vec::with_capacity(limit.min(duels.len()));
    for duel in &duels {
        let result = MatchResult::of(duel, player);
        match result {
            MatchResult::Win => statistics.wins += 1,
            MatchResult::Loss => statistics.losses += 1,
            MatchResult::Abandoned => statistics.abandoned += 1,
            MatchResult::InProgress => {}
        }
        let Some(opponent) = duel.opponent_of(player) else {
            continue;
        };
        if recent_matches.len() < limit {
            recent_matches.push(MatchRecord {
                duel: duel.id,
                problem: duel.problem,
                opponent,
                result,
                updated_at: duel.updated_at,
            });
        }
    }

    Ok(PlayerHistory {
        statistics,
        recent_matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::DuelUpdate,
        repository::InMemoryDuelRepository,
    };

    const TTL: Duration = Duration::from_secs(600);

    #[test]
    fn counts_results_and_orders_newest_first() {
        let repo = InMemoryDuelRepository::new();
        let won = repo
            .create(ProblemId(1), [PlayerId(1), PlayerId(2)], DuelStatus::Active)
            .unwrap();
        repo.update_if(won.id, DuelStatus::Active, DuelUpdate::completed(PlayerId(1)))
            .unwrap();
        let lost = repo
            .create(ProblemId(2), [PlayerId(3), PlayerId(1)], DuelStatus::Active)
            .unwrap();
        repo.update_if(lost.id, DuelStatus::Active, DuelUpdate::completed(PlayerId(3)))
            .unwrap();
        let stale = repo
            .create(ProblemId(1), [PlayerId(1), PlayerId(4)], DuelStatus::Active)
            .unwrap();
        repo.set_updated_at(stale.id, OffsetDateTime::now_utc() - time::Duration::hours(2))
            .unwrap();
        let ongoing = repo
            .create(ProblemId(2), [PlayerId(5), PlayerId(1)], DuelStatus::Active)
            .unwrap();
        repo.create(ProblemId(2), [PlayerId(6), PlayerId(7)], DuelStatus::Active)
            .unwrap();

        let history = player_history(&repo, PlayerId(1), TTL, 10).unwrap();
        assert_eq!(
            history.statistics,
            PlayerStatistics {
                total: 4,
                wins: 1,
                losses: 1,
                abandoned: 1
            }
        );
        let ids: Vec<_> = history.recent_matches.iter().map(|m| m.duel).collect();
        assert_eq!(ids, vec![ongoing.id, stale.id, lost.id, won.id]);
        let results: Vec<_> = history.recent_matches.iter().map(|m| m.result).collect();
        assert_eq!(
            results,
            vec![
                MatchResult::InProgress,
                MatchResult::Abandoned,
                MatchResult::Loss,
                MatchResult::Win
            ]
        );
        assert_eq!(history.recent_matches[2].opponent, PlayerId(3));
    }

    #[test]
    fn limit_only_shortens_the_list() {
        let repo = InMemoryDuelRepository::new();
        for opponent in 2..6 {
            repo.create(ProblemId(1), [PlayerId(1), PlayerId(opponent)], DuelStatus::Active)
                .unwrap();
        }
        let history = player_history(&repo, PlayerId(1), TTL, 2).unwrap();
        assert_eq!(history.statistics.total, 4);
        assert_eq!(history.recent_matches.len(), 2);
        assert_eq!(history.recent_matches[0].opponent, PlayerId(5));
    }

    #[test]
    fn result_wire_shape() {
        assert_eq!(
            serde_json::to_value(MatchResult::InProgress).unwrap(),
            serde_json::json!("in_progress")
        );
    }
}
