//! The room engine: one `Room` owns a game's entire state and is the only
//! writer of it. Commands are serialized by a single lock held from command
//! receipt through broadcast enqueue, so every observer of room state sees
//! transitions in order.

pub mod directory;
mod roster;
mod round;
mod score;

use crate::cards::CardRegistry;
use crate::error::RoomError;
use crate::protocol::{ClientMsg, ServerMsg};
use crate::types::*;
use crate::ws::hub::SessionHub;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

pub(crate) const NEED_PLAYERS_REASON: &str = "Need at least 3 active players";

pub fn get_time_s() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug)]
pub(crate) struct Member {
    pub token: String,
    pub kind: MembershipKind,
    pub connected: bool,
    pub session: Option<SessionId>,
    pub points: u32,
    pub ready: bool,
    pub auto_join_on_next_round: bool,
}

#[derive(Debug)]
pub(crate) struct RoomState {
    pub room_id: String,
    pub password: Option<String>,
    pub creator: Option<String>,
    // once the creator leaves, the room stays creator-less
    pub creator_departed: bool,
    pub moderators: HashSet<String>,
    pub no_connected_moderator_since: Option<Instant>,
    pub members: HashMap<String, Member>,
    // fixed join-order list; storyteller rotation indexes into this
    pub join_order: Vec<String>,
    pub hands: HashMap<String, Vec<CardId>>,
    pub deck: Vec<CardId>,
    pub discard: HashSet<CardId>,
    pub stage: Stage,
    pub paused_reason: Option<String>,
    pub round: u16,
    pub storyteller: Option<String>,
    pub description: String,
    pub clue_card: Option<CardId>,
    // round-private; entries outlive a departing member so the table stays
    // coherent for everyone else
    pub nominations: HashMap<String, Vec<CardId>>,
    pub votes: HashMap<String, Vec<CardId>>,
    pub table_order: Vec<CardId>,
    pub last_point_change: HashMap<String, u32>,
    pub win_condition: WinCondition,
    pub config: RoomConfig,
    pub deck_refill_count: u32,
}

impl RoomState {
    pub fn active_players(&self) -> Vec<String> {
        self.join_order
            .iter()
            .filter(|name| {
                self.members
                    .get(*name)
                    .map(|m| m.kind == MembershipKind::Player)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.members
            .values()
            .filter(|m| m.kind == MembershipKind::Player)
            .count()
    }

    /// Join-order rotation list: connected active players only.
    pub fn eligible_storytellers(&self) -> Vec<String> {
        self.join_order
            .iter()
            .filter(|name| {
                self.members
                    .get(*name)
                    .map(|m| m.kind == MembershipKind::Player && m.connected)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    pub fn guessers(&self) -> Vec<String> {
        self.active_players()
            .into_iter()
            .filter(|name| self.storyteller.as_deref() != Some(name.as_str()))
            .collect()
    }

    pub fn is_active_player(&self, name: &str) -> bool {
        self.members
            .get(name)
            .map(|m| m.kind == MembershipKind::Player)
            .unwrap_or(false)
    }

    pub fn is_creator(&self, name: &str) -> bool {
        self.creator.as_deref() == Some(name)
    }

    pub fn is_moderator(&self, name: &str) -> bool {
        self.members.contains_key(name) && self.moderators.contains(name)
    }

    pub fn member_name_by_session(&self, session: &str) -> Option<String> {
        self.members
            .iter()
            .find(|(_, m)| m.session.as_deref() == Some(session))
            .map(|(name, _)| name.clone())
    }

    pub fn all_guessers_nominated(&self) -> bool {
        let guessers = self.guessers();
        !guessers.is_empty() && guessers.iter().all(|g| self.nominations.contains_key(g))
    }

    pub fn all_guessers_voted(&self) -> bool {
        let guessers = self.guessers();
        !guessers.is_empty() && guessers.iter().all(|g| self.votes.contains_key(g))
    }

    pub fn active_players_all_ready(&self) -> bool {
        let actives = self.active_players();
        !actives.is_empty()
            && actives
                .iter()
                .all(|name| self.members.get(name).map(|m| m.ready).unwrap_or(false))
    }

    pub fn clear_ready(&mut self) {
        for member in self.members.values_mut() {
            member.ready = false;
        }
    }

    pub fn room_state_msg(&self) -> ServerMsg {
        let players = self
            .members
            .iter()
            .map(|(name, m)| {
                (
                    name.clone(),
                    MemberInfo {
                        connected: m.connected,
                        points: m.points,
                        ready: m.ready,
                        observer: m.kind == MembershipKind::Observer,
                        auto_join_on_next_round: m.auto_join_on_next_round,
                    },
                )
            })
            .collect();

        let mut moderators: Vec<String> = self.moderators.iter().cloned().collect();
        moderators.sort();

        ServerMsg::RoomState {
            room_id: self.room_id.clone(),
            players,
            creator: self.creator.clone(),
            moderators,
            stage: self.stage,
            paused_reason: self.paused_reason.clone(),
            active_player: self.storyteller.clone(),
            player_order: self.active_players(),
            round: self.round,
            cards_remaining: self.deck.len() as u32,
            deck_refill_count: self.deck_refill_count,
            win_condition: self.win_condition,
            config: self.config.clone(),
        }
    }

    pub fn results_msg(&self) -> ServerMsg {
        ServerMsg::Results {
            player_to_current_cards: self.nominations.clone(),
            player_to_votes: self.votes.clone(),
            active_card: self.clue_card.clone().unwrap_or_default(),
            point_change: self.last_point_change.clone(),
        }
    }
}

pub struct Room {
    state: Mutex<RoomState>,
    hub: Arc<SessionHub>,
    registry: Arc<CardRegistry>,
    last_touch: AtomicU64,
}

impl Room {
    pub fn new(
        room_id: &str,
        registry: Arc<CardRegistry>,
        hub: Arc<SessionHub>,
        win_condition: WinCondition,
        creator: Option<String>,
        password: Option<String>,
    ) -> Self {
        let mut deck: Vec<CardId> = registry.card_ids().to_vec();
        deck.shuffle(&mut rand::thread_rng());

        let state = RoomState {
            room_id: room_id.to_string(),
            password,
            creator,
            creator_departed: false,
            moderators: HashSet::new(),
            no_connected_moderator_since: None,
            members: HashMap::new(),
            join_order: Vec::new(),
            hands: HashMap::new(),
            deck,
            discard: HashSet::new(),
            stage: Stage::Joining,
            paused_reason: None,
            round: 0,
            storyteller: None,
            description: String::new(),
            clue_card: None,
            nominations: HashMap::new(),
            votes: HashMap::new(),
            table_order: Vec::new(),
            last_point_change: HashMap::new(),
            win_condition,
            config: RoomConfig::default(),
            deck_refill_count: 0,
        };

        Self {
            state: Mutex::new(state),
            hub,
            registry,
            last_touch: AtomicU64::new(get_time_s()),
        }
    }

    pub fn last_touch(&self) -> u64 {
        self.last_touch.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.last_touch.store(get_time_s(), Ordering::Relaxed);
    }

    pub async fn member_count(&self) -> usize {
        self.state.lock().await.members.len()
    }

    pub async fn snapshot(&self) -> ServerMsg {
        self.state.lock().await.room_state_msg()
    }

    /// Dispatch one in-room command from a bound session. Rejections go back
    /// to the sender only; accepted commands end with an invariant sweep.
    pub async fn handle_command(&self, session: &SessionId, msg: ClientMsg) {
        self.touch();
        let mut st = self.state.lock().await;

        if self.maybe_promote_moderator(&mut st) {
            self.broadcast_room_state(&st);
        }

        let Some(name) = st.member_name_by_session(session) else {
            return;
        };

        let result = match msg {
            ClientMsg::Ping {} => Ok(()),
            ClientMsg::Ready {} => self.cmd_ready(&mut st, &name),
            ClientMsg::StartGame {} => self.cmd_start_game(&mut st, &name),
            ClientMsg::LeaveRoom {} => self.cmd_leave(&mut st, &name),
            ClientMsg::KickPlayer { player } => self.cmd_kick(&mut st, &name, player.trim()),
            ClientMsg::SetModerator { player, enabled } => {
                self.cmd_set_moderator(&mut st, &name, player.trim(), enabled)
            }
            ClientMsg::SetObserver { player, enabled } => {
                self.cmd_set_observer(&mut st, &name, player.trim(), enabled)
            }
            ClientMsg::RequestJoinFromObserver {} => {
                self.cmd_request_join_from_observer(&mut st, &name)
            }
            ClientMsg::SetAllowMidgameJoin { enabled } => {
                self.cmd_set_allow_midgame_join(&mut st, &name, enabled)
            }
            ClientMsg::SetStorytellerLossComplement { complement } => {
                self.cmd_set_loss_complement(&mut st, &name, complement)
            }
            ClientMsg::SetVotesPerGuesser { votes } => {
                self.cmd_set_votes_per_guesser(&mut st, &name, votes)
            }
            ClientMsg::SetCardsPerHand { cards } => {
                self.cmd_set_cards_per_hand(&mut st, &name, cards)
            }
            ClientMsg::SetNominationsPerGuesser { cards } => {
                self.cmd_set_nominations_per_guesser(&mut st, &name, cards)
            }
            ClientMsg::ResumeGame {} => self.cmd_resume_game(&mut st, &name),
            ClientMsg::ActivePlayerChooseCard { card, description } => {
                self.cmd_choose_clue(&mut st, &name, card, description)
            }
            ClientMsg::PlayerChooseCards { cards } => self.cmd_nominate(&mut st, &name, cards),
            ClientMsg::SubmitVotes { cards } => self.cmd_submit_votes(&mut st, &name, cards),
            // room binding happens before dispatch; a bound session cannot
            // join or create again
            ClientMsg::JoinRoom { .. } | ClientMsg::CreateRoom { .. } => {
                Err(RoomError::StageForbidsAction)
            }
        };

        match result {
            Ok(()) => self.enforce_invariants(&st),
            Err(err) => self.hub.send(session, err.to_msg()),
        }
    }

    /// Periodic sweep (moderator continuity) driven by the directory.
    pub async fn run_maintenance(&self) {
        let mut st = self.state.lock().await;
        if self.maybe_promote_moderator(&mut st) {
            self.broadcast_room_state(&st);
        }
    }

    pub(crate) fn send_to_member(&self, st: &RoomState, name: &str, msg: ServerMsg) {
        if let Some(session) = st.members.get(name).and_then(|m| m.session.as_ref()) {
            self.hub.send(session, msg);
        }
    }

    pub(crate) fn broadcast(&self, st: &RoomState, msg: ServerMsg) {
        for member in st.members.values() {
            if let Some(session) = member.session.as_ref() {
                self.hub.send(session, msg.clone());
            }
        }
    }

    pub(crate) fn broadcast_room_state(&self, st: &RoomState) {
        self.broadcast(st, st.room_state_msg());
    }

    fn enforce_invariants(&self, st: &RoomState) {
        if let Err(violation) = check_invariants(st, &self.registry) {
            tracing::error!(
                "room {} reached an inconsistent state: {}",
                st.room_id,
                violation
            );
            std::process::exit(70);
        }
    }
}

/// Structural checks that must hold at every quiescent point. A failure here
/// means the engine itself is broken, and the process must not keep running.
pub(crate) fn check_invariants(st: &RoomState, registry: &CardRegistry) -> Result<(), String> {
    let mut seen: HashMap<&str, &'static str> = HashMap::new();
    let table_live = matches!(st.stage, Stage::PlayersChoose | Stage::Voting);

    let mut buckets: Vec<(&'static str, Vec<&CardId>)> = vec![
        ("draw pile", st.deck.iter().collect()),
        ("discard", st.discard.iter().collect()),
    ];
    for (name, hand) in &st.hands {
        if !st.members.contains_key(name) {
            return Err(format!("hand retained for departed member {name}"));
        }
        buckets.push(("hand", hand.iter().collect()));
    }
    if table_live {
        let mut table: Vec<&CardId> = st.nominations.values().flatten().collect();
        if let Some(clue) = &st.clue_card {
            table.push(clue);
        }
        buckets.push(("table", table));
    }

    for (bucket, cards) in buckets {
        for card in cards {
            if !registry.contains(card) {
                return Err(format!("{bucket} holds unknown card {card}"));
            }
            if let Some(previous) = seen.insert(card.as_str(), bucket) {
                return Err(format!("card {card} is in both {previous} and {bucket}"));
            }
        }
    }

    if let Some(creator) = &st.creator {
        let is_member = st.members.contains_key(creator);
        let is_moderator = st.moderators.contains(creator);
        if is_member != is_moderator {
            return Err(format!(
                "creator {creator} membership/moderator mismatch ({is_member}/{is_moderator})"
            ));
        }
    }

    if matches!(
        st.stage,
        Stage::ActiveChooses | Stage::PlayersChoose | Stage::Voting
    ) {
        let storyteller = st
            .storyteller
            .as_deref()
            .ok_or_else(|| "round stage without a storyteller".to_string())?;
        if !st.is_active_player(storyteller) {
            return Err(format!("storyteller {storyteller} is not an active player"));
        }
    }

    if st.stage == Stage::Voting {
        let expected = 1 + st.nominations.values().map(Vec::len).sum::<usize>();
        if st.table_order.len() != expected {
            return Err(format!(
                "table has {} cards, expected {expected}",
                st.table_order.len()
            ));
        }
    }

    if st.active_count() < MIN_ACTIVE_PLAYERS
        && !matches!(st.stage, Stage::Joining | Stage::Paused | Stage::End)
    {
        return Err(format!(
            "{} active players in stage {:?}",
            st.active_count(),
            st.stage
        ));
    }

    let hand_cap = st.config.cards_per_hand as usize;
    if matches!(st.stage, Stage::ActiveChooses | Stage::PlayersChoose) {
        for (name, hand) in &st.hands {
            if hand.len() > hand_cap {
                return Err(format!("{name} holds {} cards (cap {hand_cap})", hand.len()));
            }
        }
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testutil::Harness;
    use super::*;
    use crate::protocol::ClientMsg;

    #[tokio::test]
    async fn creator_is_moderator_while_present() {
        let h = Harness::new(40, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.state(|st| {
            assert_eq!(st.creator.as_deref(), Some("ada"));
            assert!(st.moderators.contains("ada"));
        })
        .await;
        h.check().await;
    }

    #[tokio::test]
    async fn creator_leave_makes_room_creator_less() {
        let mut h = Harness::new(40, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.send("ada", ClientMsg::LeaveRoom {}).await;
        h.state(|st| {
            assert_eq!(st.creator, None);
            assert!(!st.moderators.contains("ada"));
        })
        .await;

        // a later joiner does not inherit the creator slot
        h.join("dee").await.unwrap();
        h.state(|st| assert_eq!(st.creator, None)).await;
    }

    #[tokio::test]
    async fn commands_from_unbound_sessions_are_ignored() {
        let h = Harness::new(40, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        let (stranger, _rx) = h.hub.register();
        h.room.handle_command(&stranger, ClientMsg::Ready {}).await;
        assert_eq!(h.stage().await, Stage::Joining);
    }

    #[tokio::test]
    async fn invariants_catch_duplicated_cards() {
        let h = Harness::new(40, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.mutate(|st| {
            let card = st.deck[0].clone();
            st.discard.insert(card);
        })
        .await;
        let broken = h
            .state(|st| check_invariants(st, &testutil::registry(40)).is_err())
            .await;
        assert!(broken);
    }
}
