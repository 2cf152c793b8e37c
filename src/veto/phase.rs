//! Veto phase descriptors and the static per-format phase sequences

use crate::types::BestOf;
use serde::{Deserialize, Serialize};

/// The kind of move a phase asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VetoAction {
    Ban,
    Pick,
    SidePick,
}

impl std::fmt::Display for VetoAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VetoAction::Ban => write!(f, "ban"),
            VetoAction::Pick => write!(f, "pick"),
            VetoAction::SidePick => write!(f, "side_pick"),
        }
    }
}

/// Team slot within a veto. Team one is the team holding first pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TeamNumber {
    One,
    Two,
}

impl TeamNumber {
    pub fn value(self) -> u8 {
        match self {
            TeamNumber::One => 1,
            TeamNumber::Two => 2,
        }
    }

    pub fn opponent(self) -> Self {
        match self {
            TeamNumber::One => TeamNumber::Two,
            TeamNumber::Two => TeamNumber::One,
        }
    }
}

impl From<TeamNumber> for u8 {
    fn from(team: TeamNumber) -> Self {
        team.value()
    }
}

impl TryFrom<u8> for TeamNumber {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TeamNumber::One),
            2 => Ok(TeamNumber::Two),
            other => Err(format!("team number must be 1 or 2, got {}", other)),
        }
    }
}

impl std::fmt::Display for TeamNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// One step of a veto: at position `order` (1-based), `team` must `action`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VetoPhase {
    pub order: u8,
    pub team: TeamNumber,
    pub action: VetoAction,
}

impl VetoPhase {
    const fn new(order: u8, team: TeamNumber, action: VetoAction) -> Self {
        Self {
            order,
            team,
            action,
        }
    }
}

/// Best of three over a seven map pool: two bans, two picks with the
/// opposing team choosing side, two more bans, and the last map is the decider.
pub const BO3_SEQUENCE: [VetoPhase; 8] = [
    VetoPhase::new(1, TeamNumber::One, VetoAction::Ban),
    VetoPhase::new(2, TeamNumber::Two, VetoAction::Ban),
    VetoPhase::new(3, TeamNumber::One, VetoAction::Pick),
    VetoPhase::new(4, TeamNumber::Two, VetoAction::SidePick),
    VetoPhase::new(5, TeamNumber::Two, VetoAction::Pick),
    VetoPhase::new(6, TeamNumber::One, VetoAction::SidePick),
    VetoPhase::new(7, TeamNumber::One, VetoAction::Ban),
    VetoPhase::new(8, TeamNumber::Two, VetoAction::Ban),
];

/// Best of five over a seven map pool: two bans then four alternating
/// pick/side pairs, leaving the decider.
pub const BO5_SEQUENCE: [VetoPhase; 10] = [
    VetoPhase::new(1, TeamNumber::One, VetoAction::Ban),
    VetoPhase::new(2, TeamNumber::Two, VetoAction::Ban),
    VetoPhase::new(3, TeamNumber::One, VetoAction::Pick),
    VetoPhase::new(4, TeamNumber::Two, VetoAction::SidePick),
    VetoPhase::new(5, TeamNumber::Two, VetoAction::Pick),
    VetoPhase::new(6, TeamNumber::One, VetoAction::SidePick),
    VetoPhase::new(7, TeamNumber::One, VetoAction::Pick),
    VetoPhase::new(8, TeamNumber::Two, VetoAction::SidePick),
    VetoPhase::new(9, TeamNumber::Two, VetoAction::Pick),
    VetoPhase::new(10, TeamNumber::One, VetoAction::SidePick),
];

/// Built-in phase sequence for a format. Best of one has none: the queue
/// coordinator draws its single map when the match is formed.
pub fn default_sequence(best_of: BestOf) -> Option<&'static [VetoPhase]> {
    match best_of {
        BestOf::One => None,
        BestOf::Three => Some(&BO3_SEQUENCE),
        BestOf::Five => Some(&BO5_SEQUENCE),
    }
}
