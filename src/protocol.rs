//! Wire protocol: JSON objects with exactly one top-level key naming the
//! variant. Unknown keys fail deserialization instead of being ignored.

use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMsg {
    CreateRoom {
        #[serde(default)]
        win_condition: Option<WinCondition>,
        #[serde(default)]
        creator_name: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
    JoinRoom {
        room_id: String,
        name: String,
        token: String,
        #[serde(default)]
        password: Option<String>,
    },
    Ready {},
    StartGame {},
    LeaveRoom {},
    KickPlayer {
        player: String,
    },
    SetModerator {
        player: String,
        enabled: bool,
    },
    SetObserver {
        player: String,
        enabled: bool,
    },
    RequestJoinFromObserver {},
    SetAllowMidgameJoin {
        enabled: bool,
    },
    SetStorytellerLossComplement {
        complement: u8,
    },
    SetVotesPerGuesser {
        votes: u8,
    },
    SetCardsPerHand {
        cards: u8,
    },
    SetNominationsPerGuesser {
        cards: u8,
    },
    ResumeGame {},
    ActivePlayerChooseCard {
        card: CardId,
        description: String,
    },
    PlayerChooseCards {
        cards: Vec<CardId>,
    },
    SubmitVotes {
        cards: Vec<CardId>,
    },
    Ping {},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMsg {
    RoomState {
        room_id: String,
        players: HashMap<String, MemberInfo>,
        creator: Option<String>,
        moderators: Vec<String>,
        stage: Stage,
        paused_reason: Option<String>,
        active_player: Option<String>,
        player_order: Vec<String>,
        round: u16,
        cards_remaining: u32,
        deck_refill_count: u32,
        win_condition: WinCondition,
        config: RoomConfig,
    },
    StartRound {
        hand: Vec<CardId>,
    },
    PlayersChoose {
        hand: Vec<CardId>,
        description: String,
    },
    BeginVoting {
        center_cards: Vec<CardId>,
        description: String,
        disabled_cards: Vec<CardId>,
        votes_per_guesser: u8,
    },
    Results {
        player_to_current_cards: HashMap<String, Vec<CardId>>,
        player_to_votes: HashMap<String, Vec<CardId>>,
        active_card: CardId,
        point_change: HashMap<String, u32>,
    },
    EndGame {},
    ErrorMsg {
        reason: String,
    },
    InvalidRoomId {},
    Kicked {
        reason: String,
    },
    LeftRoom {
        reason: String,
    },
    SupersededBySameToken {},
}
