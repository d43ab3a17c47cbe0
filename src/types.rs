use serde::{Deserialize, Serialize};

/// Stable identifier of a normalized card, assigned once at boot.
pub type CardId = String;

/// Identifier of one WebSocket session (a ULID string).
pub type SessionId = String;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WinCondition {
    Points { target_points: u16 },
    Cycles { target_cycles: u16 },
    CardsFinish,
}

/// Room stage machine. `Paused` is a side state reachable from any round
/// stage; resuming re-enters `ActiveChooses`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    // waiting for players to join with the room code
    Joining,
    // storyteller picks a card from their hand and writes the clue
    ActiveChooses,
    // guessers nominate cards to match the clue
    PlayersChoose,
    // guessers vote on which table card is the storyteller's
    Voting,
    // payout is shown; everyone readies up for the next round
    Results,
    // below the player floor, waiting for a moderator to resume
    Paused,
    // game is over
    End,
}

impl Stage {
    /// Stages in which roster changes take effect immediately.
    pub fn is_safe(self) -> bool {
        matches!(self, Stage::Joining | Stage::Paused)
    }

    /// Stages that belong to a round in flight.
    pub fn is_round_stage(self) -> bool {
        matches!(
            self,
            Stage::ActiveChooses | Stage::PlayersChoose | Stage::Voting | Stage::Results
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MembershipKind {
    Player,
    Observer,
}

/// Per-member snapshot embedded in every `RoomState` broadcast.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemberInfo {
    pub connected: bool,
    pub points: u32,
    // stage-specific readiness (nominated, voted, or ready for next round)
    pub ready: bool,
    pub observer: bool,
    pub auto_join_on_next_round: bool,
}

/// Tunable per-room rules. Everything here is moderator-adjustable over the
/// wire and read at the next point that consumes it (deal or scoring pass).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    pub cards_per_hand: u8,
    pub votes_per_guesser: u8,
    pub nominations_per_guesser: u8,
    pub storyteller_loss_complement: u8,
    pub bonus_double_vote_on_threshold_correct_loss: bool,
    pub bonus_correct_guess_on_threshold_correct_loss: bool,
    pub allow_midgame_join: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            cards_per_hand: 6,
            votes_per_guesser: 1,
            nominations_per_guesser: 1,
            storyteller_loss_complement: 0,
            bonus_double_vote_on_threshold_correct_loss: false,
            bonus_correct_guess_on_threshold_correct_loss: false,
            allow_midgame_join: true,
        }
    }
}

pub const MIN_ACTIVE_PLAYERS: usize = 3;
pub const MAX_NAME_LEN: usize = 30;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MAX_CARDS_PER_HAND: u8 = 12;
pub const MAX_VOTES_PER_GUESSER: u8 = 3;
pub const MAX_NOMINATIONS_PER_GUESSER: u8 = 3;
pub const MAX_LOSS_COMPLEMENT: u8 = 8;
