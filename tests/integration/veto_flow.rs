//! Veto sessions opened by formed matches

use scrim_room::error::VetoRejection;
use scrim_room::maps::DEFAULT_MAP_POOL;
use scrim_room::queue::UnreachablePolicy;
use scrim_room::types::{BestOf, FormedMatch, Side};
use scrim_room::veto::{TeamNumber, VetoAction, VetoRegistry};
use scrim_room::{matchmaking_error, MatchmakingError};

use crate::fixtures::{create_test_system, expire_ready_check, player_ids, TestSystem};

async fn formed_match(best_of: BestOf) -> (TestSystem, FormedMatch) {
    let mut system = create_test_system(4, UnreachablePolicy::EvictAtTimeout);
    for id in player_ids(4) {
        system.coordinator.join(&id, best_of).await.unwrap();
    }
    for id in player_ids(4) {
        system.coordinator.mark_ready(&id).unwrap();
    }
    expire_ready_check().await;

    let formed = system.formed_matches().pop().expect("match formed");
    (system, formed)
}

fn rejection(err: &anyhow::Error) -> Option<&VetoRejection> {
    match matchmaking_error(err) {
        Some(MatchmakingError::InvalidVetoAction { reason }) => Some(reason),
        _ => None,
    }
}

/// Play every remaining phase with the first available map
fn play_out(registry: &VetoRegistry, formed: &FormedMatch) {
    let captains = registry.captains(formed.match_id).unwrap();
    while let Some(phase) = registry.current_phase(formed.match_id).unwrap() {
        let captain = captains.captain_for(phase.team);
        match phase.action {
            VetoAction::SidePick => {
                registry
                    .pick_side(formed.match_id, captain, Side::Attack)
                    .unwrap();
            }
            action => {
                let map = registry.available_maps(formed.match_id).unwrap()[0].clone();
                if action == VetoAction::Ban {
                    registry.ban(formed.match_id, captain, &map.name).unwrap();
                } else {
                    registry.pick(formed.match_id, captain, &map.name).unwrap();
                }
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_bo3_two_bans_hand_pick_to_team_one() {
    let (system, formed) = formed_match(BestOf::Three).await;
    let registry = &system.registry;

    let captains = registry.captains(formed.match_id).unwrap();
    assert_eq!(captains.team_one, "P1");
    assert_eq!(captains.team_two, "P3");

    registry.ban(formed.match_id, "P1", "ASCENT").unwrap();
    registry.ban(formed.match_id, "P3", "BIND").unwrap();

    let phase = registry.current_phase(formed.match_id).unwrap().unwrap();
    assert_eq!(phase.order, 3);
    assert_eq!(phase.team, TeamNumber::One);
    assert_eq!(phase.action, VetoAction::Pick);

    let summary = registry.summary(formed.match_id).unwrap();
    assert_eq!(summary.banned_maps, vec!["ASCENT", "BIND"]);
    assert!(!summary.is_complete);
}

#[tokio::test(start_paused = true)]
async fn test_wrong_action_does_not_advance() {
    let (system, formed) = formed_match(BestOf::Three).await;
    let registry = &system.registry;

    let err = registry.pick(formed.match_id, "P1", "Haven").unwrap_err();
    assert!(matches!(
        rejection(&err),
        Some(VetoRejection::WrongAction {
            order: 1,
            expected: VetoAction::Ban,
            attempted: VetoAction::Pick,
            ..
        })
    ));

    let err = registry
        .pick_side(formed.match_id, "P1", Side::Defense)
        .unwrap_err();
    assert!(rejection(&err).is_some());

    assert_eq!(registry.current_phase(formed.match_id).unwrap().unwrap().order, 1);
    assert!(registry.summary(formed.match_id).unwrap().banned_maps.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_map_cannot_be_banned_twice_or_picked_after_ban() {
    let (system, formed) = formed_match(BestOf::Three).await;
    let registry = &system.registry;

    registry.ban(formed.match_id, "P1", "Ascent").unwrap();

    let err = registry.ban(formed.match_id, "P3", "ascent").unwrap_err();
    assert_eq!(
        rejection(&err),
        Some(&VetoRejection::MapBanned {
            map_id: "ASCENT".to_string()
        })
    );
    assert_eq!(registry.current_phase(formed.match_id).unwrap().unwrap().order, 2);

    registry.ban(formed.match_id, "P3", "Bind").unwrap();
    let err = registry.pick(formed.match_id, "P1", "Ascent").unwrap_err();
    assert!(matches!(
        rejection(&err),
        Some(VetoRejection::MapBanned { .. })
    ));

    let err = registry.pick(formed.match_id, "P1", "Dust2").unwrap_err();
    assert!(matches!(
        rejection(&err),
        Some(VetoRejection::UnknownMap { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_only_the_acting_captain_may_move() {
    let (system, formed) = formed_match(BestOf::Three).await;
    let registry = &system.registry;

    for player in ["P2", "P3", "P4", "stranger"] {
        let err = registry.ban(formed.match_id, player, "Ascent").unwrap_err();
        assert!(
            matches!(
                matchmaking_error(&err),
                Some(MatchmakingError::NotEligible { .. })
            ),
            "{} should not be able to ban",
            player
        );
    }

    assert_eq!(registry.current_phase(formed.match_id).unwrap().unwrap().order, 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_requires_completion() {
    let (system, formed) = formed_match(BestOf::Three).await;
    let registry = &system.registry;

    registry.ban(formed.match_id, "P1", "Ascent").unwrap();
    let err = registry.close(formed.match_id).unwrap_err();
    assert_eq!(
        rejection(&err),
        Some(&VetoRejection::VetoInProgress { order: 2 })
    );
    assert_eq!(registry.active_sessions().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_bo5_plays_four_picks_and_a_decider() {
    let (system, formed) = formed_match(BestOf::Five).await;
    let registry = &system.registry;

    play_out(registry, &formed);

    let err = registry.ban(formed.match_id, "P1", "Ascent").unwrap_err();
    assert_eq!(rejection(&err), Some(&VetoRejection::VetoComplete));

    let outcome = registry.close(formed.match_id).unwrap();
    assert_eq!(outcome.maps.len(), 5);

    let pickers: Vec<_> = outcome.maps.iter().map(|m| m.picked_by).collect();
    assert_eq!(
        pickers,
        vec![
            Some(TeamNumber::One),
            Some(TeamNumber::Two),
            Some(TeamNumber::One),
            Some(TeamNumber::Two),
            None,
        ]
    );
    assert!(outcome.maps[..4].iter().all(|m| m.side == Some(Side::Attack)));
    assert_eq!(outcome.maps[4].side, None);

    let err = registry.summary(formed.match_id).unwrap_err();
    assert!(matches!(
        matchmaking_error(&err),
        Some(MatchmakingError::MatchNotFound { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_bo1_skips_veto() {
    let (system, formed) = formed_match(BestOf::One).await;

    assert!(!formed.veto_opened);
    assert_eq!(system.registry.active_sessions().unwrap(), 0);
    assert!(system.registry.current_phase(formed.match_id).is_err());

    let map_id = formed.map_id.expect("bo1 plays a drawn map");
    assert!(DEFAULT_MAP_POOL.contains(&map_id.as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_vetoed_formats_leave_the_map_to_captains() {
    for best_of in [BestOf::Three, BestOf::Five] {
        let (_system, formed) = formed_match(best_of).await;
        assert!(formed.veto_opened);
        assert_eq!(formed.map_id, None);
    }
}
