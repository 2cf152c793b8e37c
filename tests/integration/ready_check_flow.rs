//! Ready-check lifecycle across joins, timeouts and evictions

use scrim_room::queue::UnreachablePolicy;
use scrim_room::types::{BestOf, Notification, QueueEvent};
use scrim_room::{matchmaking_error, MatchmakingError};

use crate::fixtures::{create_test_system, expire_ready_check, player_ids};

#[tokio::test(start_paused = true)]
async fn test_one_unready_player_is_evicted_and_rest_keep_waiting() {
    let mut system = create_test_system(10, UnreachablePolicy::EvictAtTimeout);
    let ids = player_ids(10);

    for id in &ids {
        system.coordinator.join(id, BestOf::One).await.unwrap();
    }
    for id in &ids[..9] {
        system.coordinator.mark_ready(id).unwrap();
    }
    expire_ready_check().await;

    let evicted: Vec<_> = system
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            QueueEvent::PlayersEvicted { player_ids, .. } => Some(player_ids),
            _ => None,
        })
        .collect();
    assert_eq!(evicted, vec![vec!["P10".to_string()]]);

    let snapshot = system.coordinator.pool_snapshot(BestOf::One).unwrap();
    assert_eq!(snapshot.players, ids[..9].to_vec());
    assert!(snapshot.batch.is_none());
    assert!(system
        .coordinator
        .ready_players(BestOf::One)
        .unwrap()
        .is_empty());

    assert_eq!(system.coordinator.status("P10").unwrap(), None);
    assert_eq!(system.coordinator.status("P1").unwrap(), Some(BestOf::One));
    assert_eq!(
        system.notifier.delivered_to("P10").last(),
        Some(&Notification::RemovedNotReady {
            best_of: BestOf::One
        })
    );

    let stats = system.coordinator.stats().unwrap();
    assert_eq!(stats.ready_checks_retried, 1);
    assert_eq!(stats.players_evicted, 1);
    assert_eq!(stats.matches_formed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_includes_players_who_joined_during_check() {
    let mut system = create_test_system(4, UnreachablePolicy::EvictAtTimeout);

    for id in player_ids(5) {
        system.coordinator.join(&id, BestOf::Three).await.unwrap();
    }
    for id in ["P1", "P2", "P3"] {
        system.coordinator.mark_ready(id).unwrap();
    }
    expire_ready_check().await;

    let snapshot = system.coordinator.pool_snapshot(BestOf::Three).unwrap();
    assert_eq!(snapshot.players, vec!["P1", "P2", "P3", "P5"]);
    let batch = snapshot.batch.expect("ready check reissued");
    assert_eq!(batch.members, vec!["P1", "P2", "P3", "P5"]);
    assert!(batch.ready.is_empty());

    for id in ["P1", "P2", "P3", "P5"] {
        system.coordinator.mark_ready(id).unwrap();
    }
    system.drain_events();
    expire_ready_check().await;

    let formed = system.formed_matches();
    assert_eq!(formed.len(), 1);
    assert_eq!(formed[0].team1, vec!["P1", "P2"]);
    assert_eq!(formed[0].team2, vec!["P3", "P5"]);
    assert!(system
        .coordinator
        .pool_snapshot(BestOf::Three)
        .unwrap()
        .players
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_member_leaving_fails_the_check_without_eviction() {
    let mut system = create_test_system(4, UnreachablePolicy::EvictAtTimeout);

    for id in player_ids(4) {
        system.coordinator.join(&id, BestOf::Five).await.unwrap();
    }
    for id in ["P1", "P2", "P3"] {
        system.coordinator.mark_ready(id).unwrap();
    }
    assert_eq!(
        system.coordinator.leave("P4").unwrap(),
        Some(BestOf::Five)
    );
    expire_ready_check().await;

    let events = system.drain_events();
    assert!(!events
        .iter()
        .any(|event| matches!(event, QueueEvent::MatchFormed(_))));
    assert!(!events
        .iter()
        .any(|event| matches!(event, QueueEvent::PlayersEvicted { .. })));

    let snapshot = system.coordinator.pool_snapshot(BestOf::Five).unwrap();
    assert_eq!(snapshot.players, vec!["P1", "P2", "P3"]);
    assert!(snapshot.batch.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_player_evicted_immediately() {
    let mut system = create_test_system(2, UnreachablePolicy::EvictImmediately);
    system.notifier.set_unreachable("P2");

    system.coordinator.join("P1", BestOf::One).await.unwrap();
    let err = system
        .coordinator
        .join("P2", BestOf::One)
        .await
        .unwrap_err();

    match matchmaking_error(&err) {
        Some(MatchmakingError::UserUnreachable { player_ids }) => {
            assert_eq!(player_ids, &vec!["P2".to_string()])
        }
        other => panic!("unexpected error: {:?}", other),
    }

    assert_eq!(system.coordinator.status("P2").unwrap(), None);
    assert_eq!(
        system
            .coordinator
            .pool_snapshot(BestOf::One)
            .unwrap()
            .players,
        vec!["P1"]
    );
    assert!(system
        .drain_events()
        .iter()
        .any(|event| matches!(event, QueueEvent::PlayersEvicted { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_player_kept_until_deadline() {
    let system = create_test_system(2, UnreachablePolicy::EvictAtTimeout);
    system.notifier.set_unreachable("P2");

    system.coordinator.join("P1", BestOf::One).await.unwrap();
    assert!(system.coordinator.join("P2", BestOf::One).await.is_err());
    assert_eq!(system.coordinator.status("P2").unwrap(), Some(BestOf::One));

    system.coordinator.mark_ready("P1").unwrap();
    expire_ready_check().await;

    assert_eq!(system.coordinator.status("P2").unwrap(), None);
    assert_eq!(
        system
            .coordinator
            .pool_snapshot(BestOf::One)
            .unwrap()
            .players,
        vec!["P1"]
    );
    assert_eq!(system.coordinator.stats().unwrap().notification_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_ready_errors() {
    let system = create_test_system(2, UnreachablePolicy::EvictAtTimeout);

    let err = system.coordinator.mark_ready("ghost").unwrap_err();
    assert!(matches!(
        matchmaking_error(&err),
        Some(MatchmakingError::NotQueued { .. })
    ));

    system.coordinator.join("P1", BestOf::Three).await.unwrap();
    let err = system.coordinator.mark_ready("P1").unwrap_err();
    assert!(matches!(
        matchmaking_error(&err),
        Some(MatchmakingError::NotEligible { .. })
    ));

    let err = system
        .coordinator
        .join("P1", BestOf::Three)
        .await
        .unwrap_err();
    assert!(matches!(
        matchmaking_error(&err),
        Some(MatchmakingError::AlreadyQueued { .. })
    ));

    system.coordinator.join("P2", BestOf::Three).await.unwrap();
    system.coordinator.mark_ready("P1").unwrap();
    let err = system.coordinator.mark_ready("P1").unwrap_err();
    assert!(matches!(
        matchmaking_error(&err),
        Some(MatchmakingError::AlreadyReady { .. })
    ));

    let err = system.coordinator.join_raw("P3", 2).await.unwrap_err();
    assert!(matches!(
        matchmaking_error(&err),
        Some(MatchmakingError::InvalidFormat { value: 2 })
    ));
}
