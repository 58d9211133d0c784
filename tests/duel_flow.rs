use std::{sync::Arc, thread, time::Duration};

use code_duel::{history::MatchResult, prelude::*};
use time::OffsetDateTime;

mod common;

const WINNING_CODE: &str = "int* twoSum(int* n, int s, int t) { int* result = 0; return result; }";
const LOSING_CODE: &str = "int* twoSum(int* n, int s, int t) { return 0; }";

fn matched(outcome: PollOutcome) -> Duel {
    match outcome {
        PollOutcome::Matched { duel } | PollOutcome::AlreadyInDuel { duel } => duel,
        other => panic!("expected a duel, got {other:?}"),
    }
}

#[test]
fn full_duel() {
    common::init_debug_logger();
    let t = common::server(Configuration::new());
    let (alice, bob) = (PlayerId(1), PlayerId(2));

    assert_eq!(
        t.server.join_or_poll_match(alice).unwrap(),
        PollOutcome::WaitingForOpponent {
            position: 1,
            queue_size: 1
        }
    );
    let PollOutcome::Matched { duel } = t.server.join_or_poll_match(bob).unwrap() else {
        panic!("bob should have been matched");
    };
    assert_eq!(duel.players, [alice, bob]);
    assert_eq!(duel.status, DuelStatus::Active);

    // alice learns about the duel on her next poll, and keeps getting the same one
    assert_eq!(
        t.server.join_or_poll_match(alice).unwrap(),
        PollOutcome::AlreadyInDuel { duel: duel.clone() }
    );
    assert_eq!(matched(t.server.join_or_poll_match(alice).unwrap()).id, duel.id);

    let verdict = t.server.submit_code(duel.id, alice, LOSING_CODE).unwrap();
    assert_eq!(verdict.status, VerdictStatus::TestFailed);
    assert_eq!(t.server.get_duel(duel.id, bob).unwrap().status, DuelStatus::Active);

    let verdict = t.server.submit_code(duel.id, bob, WINNING_CODE).unwrap();
    assert!(verdict.is_success());

    let finished = t.server.get_duel(duel.id, alice).unwrap();
    assert_eq!(finished.status, DuelStatus::Completed);
    assert_eq!(finished.winner, Some(bob));

    assert!(matches!(
        t.server.submit_code(duel.id, alice, WINNING_CODE),
        Err(DuelError::InactiveDuel {
            status: DuelStatus::Completed,
            ..
        })
    ));

    let submissions = t.server.submissions(duel.id, alice).unwrap();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].player, alice);
    assert_eq!(submissions[1].player, bob);

    // the judge got the problem's harness
    let submitted = t.judge.submitted.lock().unwrap();
    assert!(submitted
        .iter()
        .all(|(harness, _)| harness.starts_with(common::harness_dir())));
    drop(submitted);

    let history = t.server.history(bob).unwrap();
    assert_eq!(history.statistics.wins, 1);
    assert_eq!(history.recent_matches[0].opponent, alice);
    assert_eq!(history.recent_matches[0].result, MatchResult::Win);
    assert_eq!(t.server.history(alice).unwrap().statistics.losses, 1);

    // both are free again
    assert!(matches!(
        t.server.join_or_poll_match(alice).unwrap(),
        PollOutcome::WaitingForOpponent { .. }
    ));
}

#[test]
fn timeout_keeps_the_duel_running() {
    let t = common::server(Configuration::new());
    t.server.join_or_poll_match(PlayerId(1)).unwrap();
    let duel = matched(t.server.join_or_poll_match(PlayerId(2)).unwrap());

    let verdict = t
        .server
        .submit_code(duel.id, PlayerId(1), "int main() { while (1); }")
        .unwrap();
    assert_eq!(verdict.status, VerdictStatus::Timeout);

    let current = t.server.get_duel(duel.id, PlayerId(2)).unwrap();
    assert_eq!(current.status, DuelStatus::Active);
    assert_eq!(current.winner, None);
    assert!(current.updated_at > duel.updated_at);
}

#[test]
fn input_errors() {
    let t = common::server(Configuration::new());
    t.server.join_or_poll_match(PlayerId(1)).unwrap();
    let duel = matched(t.server.join_or_poll_match(PlayerId(2)).unwrap());

    let err = t.server.submit_code(duel.id, PlayerId(3), WINNING_CODE).unwrap_err();
    assert!(matches!(err, DuelError::NotParticipant { .. }));
    assert!(err.is_input_error());

    let err = t.server.submit_code(duel.id, PlayerId(1), "").unwrap_err();
    assert!(matches!(err, DuelError::EmptyCode));

    assert!(matches!(
        t.server.get_duel(DuelId(999), PlayerId(1)),
        Err(DuelError::DuelNotFound(_))
    ));
    assert!(t.judge.submitted.lock().unwrap().is_empty());
}

#[test]
fn stale_duel_frees_both_players() {
    let t = common::server(Configuration::new().with_duel_ttl(Duration::from_secs(60)));
    t.server.join_or_poll_match(PlayerId(1)).unwrap();
    let old = matched(t.server.join_or_poll_match(PlayerId(2)).unwrap());
    t.duels
        .set_updated_at(old.id, OffsetDateTime::now_utc() - time::Duration::minutes(2))
        .unwrap();

    assert!(matches!(
        t.server.join_or_poll_match(PlayerId(2)).unwrap(),
        PollOutcome::WaitingForOpponent { .. }
    ));
    let abandoned = t.server.get_duel(old.id, PlayerId(1)).unwrap();
    assert_eq!(abandoned.status, DuelStatus::Abandoned);
    assert_eq!(abandoned.winner, None);

    let fresh = matched(t.server.join_or_poll_match(PlayerId(1)).unwrap());
    assert_ne!(fresh.id, old.id);
    assert_eq!(fresh.players, [PlayerId(2), PlayerId(1)]);
    assert_eq!(
        t.server.history(PlayerId(1)).unwrap().statistics.abandoned,
        1
    );
}

#[test]
fn cancel_and_reset() {
    let t = common::server(Configuration::new());
    t.server.join_or_poll_match(PlayerId(1)).unwrap();
    assert_eq!(t.server.cancel_match(PlayerId(1)), CancelOutcome::Cancelled);
    assert_eq!(t.server.cancel_match(PlayerId(1)), CancelOutcome::NotInQueue);

    t.server.join_or_poll_match(PlayerId(1)).unwrap();
    let duel = matched(t.server.join_or_poll_match(PlayerId(2)).unwrap());
    t.server.join_or_poll_match(PlayerId(3)).unwrap();

    assert_eq!(t.server.reset().unwrap(), 1);
    assert!(t.server.queue().is_empty());
    assert_eq!(
        t.server.get_duel(duel.id, PlayerId(1)).unwrap().status,
        DuelStatus::Abandoned
    );
}

#[test]
fn watcher_sees_the_winning_submission() {
    let t = common::server(
        Configuration::new().with_long_poll(Duration::from_secs(5), Duration::from_millis(10)),
    );
    t.server.join_or_poll_match(PlayerId(1)).unwrap();
    let duel = matched(t.server.join_or_poll_match(PlayerId(2)).unwrap());

    let server = &t.server;
    let seen = thread::scope(|s| {
        let watcher =
            s.spawn(|| server.wait_for_duel_update(duel.id, PlayerId(1), duel.updated_at));
        thread::sleep(Duration::from_millis(50));
        server.submit_code(duel.id, PlayerId(2), WINNING_CODE).unwrap();
        watcher.join().unwrap()
    })
    .unwrap();

    assert_eq!(seen.status, DuelStatus::Completed);
    assert_eq!(seen.winner, Some(PlayerId(2)));
}

#[test]
fn wire_shapes() {
    let t = common::server(Configuration::new());
    let waiting = t.server.join_or_poll_match(PlayerId(1)).unwrap();
    assert_eq!(
        serde_json::to_value(&waiting).unwrap(),
        serde_json::json!({"status": "waiting_for_opponent", "position": 1, "queue_size": 1})
    );

    let matched = t.server.join_or_poll_match(PlayerId(2)).unwrap();
    let value = serde_json::to_value(&matched).unwrap();
    assert_eq!(value["status"], "matched");
    assert_eq!(value["duel"]["status"], "active");
    assert_eq!(value["duel"]["players"], serde_json::json!([1, 2]));
    assert!(value["duel"]["winner"].is_null());

    let duel = matched.duel().unwrap();
    let verdict = t.server.submit_code(duel.id, PlayerId(1), WINNING_CODE).unwrap();
    assert_eq!(
        serde_json::to_value(&verdict).unwrap(),
        serde_json::json!({"status": "success", "tests": {"1": {"status": "PASS", "message": ""}}})
    );
}

#[test]
fn simultaneous_winners_keep_a_single_completion() {
    common::init_debug_logger();
    let judge = Arc::new(common::BarrierJudge::new(2));
    let server = common::server_with_judge(Configuration::new(), judge);
    server.join_or_poll_match(PlayerId(1)).unwrap();
    let duel = matched(server.join_or_poll_match(PlayerId(2)).unwrap());
    let id = duel.id;

    let verdicts = thread::scope(|s| {
        let server = &server;
        let submitters: Vec<_> = duel
            .players
            .iter()
            .map(|&player| s.spawn(move || server.submit_code(id, player, WINNING_CODE)))
            .collect();
        submitters
            .into_iter()
            .map(|submitter| submitter.join().unwrap().unwrap())
            .collect::<Vec<_>>()
    });
    assert!(verdicts.iter().all(Verdict::is_success));

    let finished = server.get_duel(id, PlayerId(1)).unwrap();
    assert_eq!(finished.status, DuelStatus::Completed);
    let winner = finished.winner.unwrap();
    assert!(duel.players.contains(&winner));
    assert_eq!(server.submissions(id, PlayerId(2)).unwrap().len(), 2);

    let reread = server.get_duel(id, PlayerId(2)).unwrap();
    assert_eq!(reread.winner, Some(winner));
    assert_eq!(reread.updated_at, finished.updated_at);
    assert!(server.queue().is_empty());
}
