//! Integration tests for the scrim-room core
//!
//! These tests drive the public API end to end:
//! - queue, ready check and hand-off for every format
//! - veto sessions opened from formed matches
//! - concurrent joins and leaves

mod fixtures;

mod integration {
    mod ready_check_flow;
    mod veto_flow;
}

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scrim_room::queue::UnreachablePolicy;
use scrim_room::types::{BestOf, Notification, QueueEvent};
use scrim_room::veto::{TeamNumber, VetoAction};
use scrim_room::Side;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use fixtures::{create_test_system, create_test_system_with_timeout, expire_ready_check, player_ids};

#[tokio::test(start_paused = true)]
async fn test_complete_bo3_flow_from_queue_to_maps() {
    let mut system = create_test_system(4, UnreachablePolicy::EvictAtTimeout);

    for id in player_ids(4) {
        system.coordinator.join(&id, BestOf::Three).await.unwrap();
    }
    for id in player_ids(4) {
        system.coordinator.mark_ready(&id).unwrap();
    }
    expire_ready_check().await;

    let formed = system.formed_matches().pop().expect("match formed");
    assert_eq!(formed.team1, vec!["P1", "P2"]);
    assert_eq!(formed.team2, vec!["P3", "P4"]);
    assert!(formed.team1_first_pick);
    assert!(formed.veto_opened);

    let registry = &system.registry;
    let match_id = formed.match_id;
    let (one, two) = (formed.captain1.as_str(), formed.captain2.as_str());

    registry.ban(match_id, one, "Ascent").unwrap();
    registry.ban(match_id, two, "bind").unwrap();
    registry.pick(match_id, one, "HAVEN").unwrap();
    registry.pick_side(match_id, two, Side::Defense).unwrap();
    registry.pick(match_id, two, "Split").unwrap();
    registry.pick_side(match_id, one, Side::Attack).unwrap();
    registry.ban(match_id, one, "Fracture").unwrap();
    registry.ban(match_id, two, "Lotus").unwrap();

    assert_eq!(registry.current_phase(match_id).unwrap(), None);
    let outcome = registry.close(match_id).unwrap();

    let maps: Vec<_> = outcome
        .maps
        .iter()
        .map(|m| (m.map_id.as_str(), m.picked_by, m.side))
        .collect();
    assert_eq!(
        maps,
        vec![
            ("HAVEN", Some(TeamNumber::One), Some(Side::Defense)),
            ("SPLIT", Some(TeamNumber::Two), Some(Side::Attack)),
            ("PEARL", None, None),
        ]
    );
    assert_eq!(registry.active_sessions().unwrap(), 0);

    let announcements = system
        .notifier
        .count(|n| matches!(n, Notification::MatchFormed { .. }));
    assert_eq!(announcements, 4);
}

#[tokio::test(start_paused = true)]
async fn test_every_format_forms_one_batch_in_join_order() {
    for best_of in BestOf::ALL {
        let mut system = create_test_system(10, UnreachablePolicy::EvictAtTimeout);

        for id in player_ids(10) {
            system.coordinator.join(&id, best_of).await.unwrap();
        }

        let batches: Vec<_> = system
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                QueueEvent::ReadyCheckIssued { members, .. } => Some(members),
                _ => None,
            })
            .collect();
        assert_eq!(batches, vec![player_ids(10)], "{}", best_of);
    }
}

#[tokio::test(start_paused = true)]
async fn test_formats_are_independent() {
    let mut system = create_test_system(2, UnreachablePolicy::EvictAtTimeout);

    system.coordinator.join("a1", BestOf::One).await.unwrap();
    system.coordinator.join("b1", BestOf::Five).await.unwrap();
    system.coordinator.join("a2", BestOf::One).await.unwrap();

    system.coordinator.mark_ready("a1").unwrap();
    system.coordinator.mark_ready("a2").unwrap();
    expire_ready_check().await;

    let formed = system.formed_matches();
    assert_eq!(formed.len(), 1);
    assert_eq!(formed[0].best_of, BestOf::One);
    assert_eq!(
        system
            .coordinator
            .pool_snapshot(BestOf::Five)
            .unwrap()
            .players,
        vec!["b1"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_joins_form_exactly_one_batch() {
    let mut system = create_test_system(10, UnreachablePolicy::EvictAtTimeout);
    let ids = player_ids(15);

    let joins = ids
        .iter()
        .map(|id| system.coordinator.join(id, BestOf::Three));
    let results = join_all(joins).await;
    assert!(results.iter().all(|r| r.is_ok()));

    let snapshot = system.coordinator.pool_snapshot(BestOf::Three).unwrap();
    assert_eq!(snapshot.players.len(), 15);
    let unique: HashSet<_> = snapshot.players.iter().collect();
    assert_eq!(unique.len(), 15);

    let issued = system
        .drain_events()
        .into_iter()
        .filter(|event| matches!(event, QueueEvent::ReadyCheckIssued { .. }))
        .count();
    assert_eq!(issued, 1);
    assert_eq!(snapshot.batch.unwrap().members.len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_format_switching_keeps_one_assignment() {
    let system = create_test_system(10, UnreachablePolicy::EvictAtTimeout);

    let switches = BestOf::ALL
        .iter()
        .cycle()
        .take(12)
        .map(|&best_of| system.coordinator.join("hopper", best_of));
    let _ = join_all(switches).await;

    let current = system.coordinator.status("hopper").unwrap().unwrap();
    let mut seen = 0;
    for best_of in BestOf::ALL {
        let players = system.coordinator.pool_snapshot(best_of).unwrap().players;
        let count = players.iter().filter(|p| *p == "hopper").count();
        if best_of == current {
            assert_eq!(count, 1);
        }
        seen += count;
    }
    assert_eq!(seen, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_mixed_traffic_keeps_pools_and_assignments_consistent() {
    let timeout = Duration::from_millis(20);
    let system = create_test_system_with_timeout(4, UnreachablePolicy::EvictAtTimeout, timeout);
    let ids = player_ids(40);

    let tasks: Vec<_> = (0..16u64)
        .map(|task| {
            let coordinator = system.coordinator.clone();
            let ids = ids.clone();
            tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(task);
                for op in 0..400 {
                    let player = &ids[rng.gen_range(0..ids.len())];
                    match rng.gen_range(0..4) {
                        0 | 1 => {
                            let best_of = BestOf::ALL[rng.gen_range(0..BestOf::ALL.len())];
                            let _ = coordinator.join(player, best_of).await;
                        }
                        2 => {
                            let _ = coordinator.mark_ready(player);
                        }
                        _ => {
                            let _ = coordinator.leave(player);
                        }
                    }
                    if op % 25 == 0 {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                }
            })
        })
        .collect();

    for result in join_all(tasks).await {
        result.unwrap();
    }

    // let outstanding checks resolve before freezing the state
    tokio::time::sleep(timeout * 5).await;
    system.coordinator.shutdown().unwrap();

    let mut pools: HashMap<String, Vec<BestOf>> = HashMap::new();
    for best_of in BestOf::ALL {
        for player in system.coordinator.pool_snapshot(best_of).unwrap().players {
            pools.entry(player).or_default().push(best_of);
        }
    }

    for (player, formats) in &pools {
        assert_eq!(formats.len(), 1, "{} queued in {:?}", player, formats);
        assert_eq!(
            system.coordinator.status(player).unwrap(),
            Some(formats[0]),
            "{} assigned elsewhere",
            player
        );
    }
    for player in &ids {
        if let Some(best_of) = system.coordinator.status(player).unwrap() {
            assert_eq!(
                pools.get(player).map(Vec::as_slice),
                Some(&[best_of][..]),
                "{} assigned to {} but not in its pool",
                player,
                best_of
            );
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_veto_rejects_out_of_turn_actions() {
    let mut system = create_test_system(2, UnreachablePolicy::EvictAtTimeout);
    system.coordinator.join("cap1", BestOf::Five).await.unwrap();
    system.coordinator.join("cap2", BestOf::Five).await.unwrap();
    system.coordinator.mark_ready("cap1").unwrap();
    system.coordinator.mark_ready("cap2").unwrap();
    expire_ready_check().await;

    let formed = system.formed_matches().pop().unwrap();
    let registry = &system.registry;

    // team two may not act during team one's ban
    assert!(registry.ban(formed.match_id, "cap2", "Ascent").is_err());
    // a pick during a ban phase is refused
    assert!(registry.pick(formed.match_id, "cap1", "Ascent").is_err());

    let phase = registry.current_phase(formed.match_id).unwrap().unwrap();
    assert_eq!(phase.order, 1);
    assert_eq!(phase.action, VetoAction::Ban);
}
