//! Round pipeline: dealing (with refill and cards-finish termination), the
//! clue, nominations, voting, and the payout handoff.

use super::*;
use crate::error::RoomError;
use rand::seq::SliceRandom;

impl Room {
    /// Enter `ActiveChooses`: promote waiting observers, top up every active
    /// hand, and hand the storyteller their turn.
    pub(super) fn start_round(&self, st: &mut RoomState) {
        // stage-atomic roster changes land exactly here
        let names: Vec<String> = st.join_order.clone();
        for name in &names {
            if let Some(member) = st.members.get_mut(name) {
                if member.kind == MembershipKind::Observer && member.auto_join_on_next_round {
                    member.kind = MembershipKind::Player;
                    member.auto_join_on_next_round = false;
                }
            }
        }

        if st.active_count() < MIN_ACTIVE_PLAYERS {
            self.pause_room(st, NEED_PLAYERS_REASON);
            return;
        }

        st.clue_card = None;
        st.nominations.clear();
        st.votes.clear();
        st.table_order.clear();
        st.description.clear();
        st.last_point_change.clear();
        st.storyteller = None;

        let actives = st.active_players();
        let target = st.config.cards_per_hand as usize;

        // a lowered hand target sheds the excess into the discard set
        let mut excess = Vec::new();
        for name in &actives {
            let hand = st.hands.entry(name.clone()).or_default();
            while hand.len() > target {
                if let Some(card) = hand.pop() {
                    excess.push(card);
                }
            }
        }
        st.discard.extend(excess);

        let needed: usize = actives
            .iter()
            .map(|name| target.saturating_sub(st.hands.get(name).map_or(0, Vec::len)))
            .sum();

        if st.deck.len() < needed {
            if matches!(st.win_condition, WinCondition::CardsFinish) {
                // the deal must complete in full; a short deck ends the game
                self.end_game(st);
                return;
            }
            self.refill_deck(st);
            if st.deck.len() < needed {
                tracing::warn!(
                    "room {}: registry cannot fill {} hands of {}; ending game",
                    st.room_id,
                    actives.len(),
                    target
                );
                self.end_game(st);
                return;
            }
        }

        st.deck.shuffle(&mut rand::thread_rng());
        for name in &actives {
            let hand = st.hands.entry(name.clone()).or_default();
            while hand.len() < target {
                match st.deck.pop() {
                    Some(card) => hand.push(card),
                    None => break,
                }
            }
        }

        let eligible = st.eligible_storytellers();
        let Some(storyteller) = eligible
            .get(st.round as usize % eligible.len().max(1))
            .cloned()
        else {
            self.pause_room(st, NEED_PLAYERS_REASON);
            return;
        };

        st.storyteller = Some(storyteller.clone());
        st.stage = Stage::ActiveChooses;
        st.paused_reason = None;
        st.clear_ready();

        let hand = st.hands.get(&storyteller).cloned().unwrap_or_default();
        self.send_to_member(st, &storyteller, ServerMsg::StartRound { hand });
        self.broadcast_room_state(st);
    }

    /// Void the round in flight: table and clue cards leave play, round
    /// bookkeeping resets. The round counter is untouched.
    pub(super) fn cancel_round(&self, st: &mut RoomState) {
        if let Some(clue) = st.clue_card.take() {
            st.discard.insert(clue);
        }
        for (_, cards) in st.nominations.drain() {
            st.discard.extend(cards);
        }
        st.votes.clear();
        st.table_order.clear();
        st.description.clear();
        st.last_point_change.clear();
        st.storyteller = None;
    }

    /// Top up the draw pile from registry cards not currently held or on the
    /// table. Discarded cards re-enter circulation here.
    fn refill_deck(&self, st: &mut RoomState) {
        let mut fresh: Vec<CardId> = {
            let mut in_play: HashSet<&str> =
                st.hands.values().flatten().map(String::as_str).collect();
            in_play.extend(st.deck.iter().map(String::as_str));
            if let Some(clue) = &st.clue_card {
                in_play.insert(clue.as_str());
            }
            for cards in st.nominations.values() {
                in_play.extend(cards.iter().map(String::as_str));
            }

            self.registry
                .card_ids()
                .iter()
                .filter(|id| !in_play.contains(id.as_str()))
                .cloned()
                .collect()
        };

        fresh.shuffle(&mut rand::thread_rng());
        st.deck.append(&mut fresh);
        st.discard.clear();
        st.deck_refill_count += 1;

        tracing::debug!(
            "room {}: deck refilled to {} cards (refill #{})",
            st.room_id,
            st.deck.len(),
            st.deck_refill_count
        );
    }

    pub(super) fn cmd_start_game(&self, st: &mut RoomState, name: &str) -> Result<(), RoomError> {
        if st.stage != Stage::Joining {
            return Err(RoomError::StageForbidsAction);
        }
        if !st.is_moderator(name) {
            return Err(RoomError::PermissionDenied);
        }
        if st.active_count() < MIN_ACTIVE_PLAYERS {
            return Err(RoomError::NotEnoughPlayers);
        }

        self.start_round(st);
        Ok(())
    }

    pub(super) fn cmd_ready(&self, st: &mut RoomState, name: &str) -> Result<(), RoomError> {
        match st.stage {
            // in the lobby, a moderator's Ready doubles as StartGame
            Stage::Joining => {
                if !st.is_moderator(name) {
                    return Ok(());
                }
                if st.active_count() < MIN_ACTIVE_PLAYERS {
                    return Err(RoomError::NotEnoughPlayers);
                }
                self.start_round(st);
                Ok(())
            }
            Stage::Results => {
                if !st.is_active_player(name) {
                    return Err(RoomError::PermissionDenied);
                }
                if let Some(member) = st.members.get_mut(name) {
                    member.ready = true;
                }
                if st.active_players_all_ready() {
                    self.advance_after_results(st);
                } else {
                    self.broadcast_room_state(st);
                }
                Ok(())
            }
            _ => Err(RoomError::StageForbidsAction),
        }
    }

    pub(super) fn cmd_choose_clue(
        &self,
        st: &mut RoomState,
        name: &str,
        card: CardId,
        description: String,
    ) -> Result<(), RoomError> {
        if st.stage != Stage::ActiveChooses {
            return Err(RoomError::StageForbidsAction);
        }
        if st.storyteller.as_deref() != Some(name) {
            return Err(RoomError::PermissionDenied);
        }
        let description = description.trim();
        if description.is_empty() {
            return Err(RoomError::EmptyDescription);
        }

        let hand = st.hands.get_mut(name).ok_or(RoomError::CardNotInHand)?;
        let pos = hand
            .iter()
            .position(|c| *c == card)
            .ok_or(RoomError::CardNotInHand)?;
        let clue = hand.remove(pos);

        st.clue_card = Some(clue);
        st.description = description.chars().take(MAX_DESCRIPTION_LEN).collect();
        st.stage = Stage::PlayersChoose;
        st.clear_ready();
        if let Some(member) = st.members.get_mut(name) {
            member.ready = true;
        }

        for guesser in st.guessers() {
            let hand = st.hands.get(&guesser).cloned().unwrap_or_default();
            self.send_to_member(
                st,
                &guesser,
                ServerMsg::PlayersChoose {
                    hand,
                    description: st.description.clone(),
                },
            );
        }
        self.broadcast_room_state(st);
        Ok(())
    }

    pub(super) fn cmd_nominate(
        &self,
        st: &mut RoomState,
        name: &str,
        cards: Vec<CardId>,
    ) -> Result<(), RoomError> {
        if st.stage != Stage::PlayersChoose {
            return Err(RoomError::StageForbidsAction);
        }
        if !st.is_active_player(name) || st.storyteller.as_deref() == Some(name) {
            return Err(RoomError::PermissionDenied);
        }
        if cards.len() != st.config.nominations_per_guesser as usize {
            return Err(RoomError::WrongVoteCount);
        }
        let unique: HashSet<&CardId> = cards.iter().collect();
        if unique.len() != cards.len() {
            return Err(RoomError::DuplicateNomination);
        }

        // validate against hand plus any earlier nomination before touching
        // state, so a rejected resubmission changes nothing
        let hand = st.hands.get(name).ok_or(RoomError::CardNotInHand)?;
        let previous = st.nominations.get(name);
        for card in &cards {
            let in_hand = hand.contains(card);
            let in_previous = previous.map(|p| p.contains(card)).unwrap_or(false);
            if !in_hand && !in_previous {
                return Err(RoomError::CardNotInHand);
            }
        }

        if let Some(previous) = st.nominations.remove(name) {
            if let Some(hand) = st.hands.get_mut(name) {
                hand.extend(previous);
            }
        }
        if let Some(hand) = st.hands.get_mut(name) {
            for card in &cards {
                if let Some(pos) = hand.iter().position(|c| c == card) {
                    hand.remove(pos);
                }
            }
        }
        st.nominations.insert(name.to_string(), cards);
        if let Some(member) = st.members.get_mut(name) {
            member.ready = true;
        }

        if st.all_guessers_nominated() {
            self.enter_voting(st);
        } else {
            self.broadcast_room_state(st);
        }
        Ok(())
    }

    pub(super) fn enter_voting(&self, st: &mut RoomState) {
        st.stage = Stage::Voting;
        st.clear_ready();
        if let Some(storyteller) = st.storyteller.clone() {
            if let Some(member) = st.members.get_mut(&storyteller) {
                member.ready = true;
            }
        }

        let mut table: Vec<CardId> = st.nominations.values().flatten().cloned().collect();
        if let Some(clue) = &st.clue_card {
            table.push(clue.clone());
        }
        table.shuffle(&mut rand::thread_rng());
        st.table_order = table;

        for player in st.active_players() {
            let disabled = st.nominations.get(&player).cloned().unwrap_or_default();
            self.send_to_member(
                st,
                &player,
                ServerMsg::BeginVoting {
                    center_cards: st.table_order.clone(),
                    description: st.description.clone(),
                    disabled_cards: disabled,
                    votes_per_guesser: st.config.votes_per_guesser,
                },
            );
        }
        self.broadcast_room_state(st);
    }

    pub(super) fn cmd_submit_votes(
        &self,
        st: &mut RoomState,
        name: &str,
        cards: Vec<CardId>,
    ) -> Result<(), RoomError> {
        if st.stage != Stage::Voting {
            return Err(RoomError::StageForbidsAction);
        }
        if !st.is_active_player(name) || st.storyteller.as_deref() == Some(name) {
            return Err(RoomError::PermissionDenied);
        }
        if cards.len() != st.config.votes_per_guesser as usize {
            return Err(RoomError::WrongVoteCount);
        }
        // stacking several tokens on one card is allowed; off-table isn't
        for card in &cards {
            if !st.table_order.contains(card) {
                return Err(RoomError::UnknownCardId);
            }
        }
        if let Some(own) = st.nominations.get(name) {
            if cards.iter().any(|card| own.contains(card)) {
                return Err(RoomError::VoteOnOwnCard);
            }
        }

        st.votes.insert(name.to_string(), cards);
        if let Some(member) = st.members.get_mut(name) {
            member.ready = true;
        }

        if st.all_guessers_voted() {
            self.enter_results(st);
        } else {
            self.broadcast_room_state(st);
        }
        Ok(())
    }

    /// Payout: score the round with snapshot semantics, retire the table,
    /// then either end the game or wait for everyone to ready up.
    pub(super) fn enter_results(&self, st: &mut RoomState) {
        st.stage = Stage::Results;

        let point_change = score::compute_round_scores(st);
        for (name, delta) in &point_change {
            if let Some(member) = st.members.get_mut(name) {
                member.points += delta;
            }
        }
        st.last_point_change = point_change;

        if let Some(clue) = st.clue_card.clone() {
            st.discard.insert(clue);
        }
        for cards in st.nominations.values() {
            st.discard.extend(cards.iter().cloned());
        }
        st.table_order.clear();

        st.round += 1;
        st.clear_ready();

        self.broadcast(st, st.results_msg());
        self.broadcast_room_state(st);

        if score::should_end_game(st) {
            self.end_game(st);
        }
    }

    pub(super) fn advance_after_results(&self, st: &mut RoomState) {
        // the roster may have shifted since the payout; re-check the win
        if score::should_end_game(st) {
            self.end_game(st);
        } else {
            self.start_round(st);
        }
    }

    pub(super) fn end_game(&self, st: &mut RoomState) {
        st.stage = Stage::End;
        st.paused_reason = None;
        self.broadcast(st, ServerMsg::EndGame {});
        self.broadcast_room_state(st);
    }

    /// Stage-appropriate private recap for a (re)joining session.
    pub(super) fn catch_up_msg(&self, st: &RoomState, name: &str) -> Option<ServerMsg> {
        let is_active = st.is_active_player(name);
        let is_storyteller = st.storyteller.as_deref() == Some(name);

        match st.stage {
            Stage::ActiveChooses if is_storyteller => Some(ServerMsg::StartRound {
                hand: st.hands.get(name).cloned().unwrap_or_default(),
            }),
            Stage::PlayersChoose if is_active && !is_storyteller => {
                Some(ServerMsg::PlayersChoose {
                    hand: st.hands.get(name).cloned().unwrap_or_default(),
                    description: st.description.clone(),
                })
            }
            Stage::Voting if is_active => Some(ServerMsg::BeginVoting {
                center_cards: st.table_order.clone(),
                description: st.description.clone(),
                disabled_cards: st.nominations.get(name).cloned().unwrap_or_default(),
                votes_per_guesser: st.config.votes_per_guesser,
            }),
            Stage::Results => Some(st.results_msg()),
            Stage::End => Some(ServerMsg::EndGame {}),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::Harness;
    use super::*;
    use crate::protocol::ClientMsg;

    async fn ready_all(h: &mut Harness, names: &[&str]) {
        for name in names {
            h.send(name, ClientMsg::Ready {}).await;
        }
    }

    #[tokio::test]
    async fn starting_deals_full_hands_from_the_deck() {
        let mut h = Harness::new(40, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.send("ada", ClientMsg::StartGame {}).await;

        assert_eq!(h.stage().await, Stage::ActiveChooses);
        for name in ["ada", "bob", "cam"] {
            assert_eq!(h.hand(name).await.len(), 6);
        }
        h.state(|st| {
            assert_eq!(st.deck.len(), 40 - 18);
            assert_eq!(st.deck_refill_count, 0);
        })
        .await;
        h.check().await;
    }

    #[tokio::test]
    async fn game_cannot_start_below_three_players() {
        let mut h = Harness::new(40, WinCondition::CardsFinish, &["ada", "bob"]).await;
        h.send("ada", ClientMsg::StartGame {}).await;
        assert_eq!(h.stage().await, Stage::Joining);

        let msgs = h.drain("ada");
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMsg::ErrorMsg { reason } if reason.contains("3")
        )));
    }

    #[tokio::test]
    async fn storyteller_only_gets_the_start_round_hand() {
        let mut h = Harness::new(40, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.send("ada", ClientMsg::StartGame {}).await;
        let storyteller = h.storyteller().await;
        assert_eq!(storyteller, "ada");

        let storyteller_msgs = h.drain("ada");
        assert!(storyteller_msgs
            .iter()
            .any(|m| matches!(m, ServerMsg::StartRound { hand } if hand.len() == 6)));
        let guesser_msgs = h.drain("bob");
        assert!(!guesser_msgs
            .iter()
            .any(|m| matches!(m, ServerMsg::StartRound { .. })));
    }

    #[tokio::test]
    async fn clue_moves_the_card_out_of_the_storyteller_hand() {
        let mut h = Harness::new(40, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.send("ada", ClientMsg::StartGame {}).await;
        let clue = h.hand("ada").await[0].clone();

        h.send(
            "ada",
            ClientMsg::ActivePlayerChooseCard {
                card: clue.clone(),
                description: "  moon  ".into(),
            },
        )
        .await;

        assert_eq!(h.stage().await, Stage::PlayersChoose);
        assert_eq!(h.hand("ada").await.len(), 5);
        h.state(|st| {
            assert_eq!(st.clue_card.as_ref(), Some(&clue));
            assert_eq!(st.description, "moon");
        })
        .await;

        // guessers receive their hands with the clue text
        let msgs = h.drain("bob");
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMsg::PlayersChoose { hand, description } if hand.len() == 6 && description == "moon"
        )));
        h.check().await;
    }

    #[tokio::test]
    async fn empty_clue_description_is_rejected() {
        let mut h = Harness::new(40, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.send("ada", ClientMsg::StartGame {}).await;
        let clue = h.hand("ada").await[0].clone();

        h.send(
            "ada",
            ClientMsg::ActivePlayerChooseCard {
                card: clue,
                description: "   ".into(),
            },
        )
        .await;
        assert_eq!(h.stage().await, Stage::ActiveChooses);
        assert_eq!(h.hand("ada").await.len(), 6);
    }

    #[tokio::test]
    async fn voting_table_holds_clue_plus_nominations_minus_own() {
        let mut h = Harness::new(40, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.send("ada", ClientMsg::StartGame {}).await;
        let clue = h.hand("ada").await[0].clone();
        h.send(
            "ada",
            ClientMsg::ActivePlayerChooseCard {
                card: clue.clone(),
                description: "moon".into(),
            },
        )
        .await;

        let bob_card = h.hand("bob").await[0].clone();
        h.send(
            "bob",
            ClientMsg::PlayerChooseCards {
                cards: vec![bob_card.clone()],
            },
        )
        .await;
        assert_eq!(h.stage().await, Stage::PlayersChoose);

        let cam_card = h.hand("cam").await[0].clone();
        h.send(
            "cam",
            ClientMsg::PlayerChooseCards {
                cards: vec![cam_card.clone()],
            },
        )
        .await;
        assert_eq!(h.stage().await, Stage::Voting);

        h.state(|st| {
            assert_eq!(st.table_order.len(), 3);
            assert!(st.table_order.contains(&clue));
            assert!(st.table_order.contains(&bob_card));
            assert!(st.table_order.contains(&cam_card));
        })
        .await;

        let msgs = h.drain("bob");
        let begin = msgs
            .iter()
            .find_map(|m| match m {
                ServerMsg::BeginVoting {
                    center_cards,
                    disabled_cards,
                    votes_per_guesser,
                    ..
                } => Some((center_cards.clone(), disabled_cards.clone(), *votes_per_guesser)),
                _ => None,
            })
            .expect("bob sees the voting table");
        assert_eq!(begin.0.len(), 3);
        assert_eq!(begin.1, vec![bob_card]);
        assert_eq!(begin.2, 1);
        h.check().await;
    }

    #[tokio::test]
    async fn nomination_validation_rejects_bad_submissions() {
        let mut h = Harness::new(60, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.send("ada", ClientMsg::SetNominationsPerGuesser { cards: 2 })
            .await;
        h.send("ada", ClientMsg::StartGame {}).await;
        let clue = h.hand("ada").await[0].clone();
        h.send(
            "ada",
            ClientMsg::ActivePlayerChooseCard {
                card: clue,
                description: "moon".into(),
            },
        )
        .await;

        let bob_hand = h.hand("bob").await;

        // wrong count
        h.send(
            "bob",
            ClientMsg::PlayerChooseCards {
                cards: vec![bob_hand[0].clone()],
            },
        )
        .await;
        // duplicates
        h.send(
            "bob",
            ClientMsg::PlayerChooseCards {
                cards: vec![bob_hand[0].clone(), bob_hand[0].clone()],
            },
        )
        .await;
        // card from someone else's hand
        let cam_card = h.hand("cam").await[0].clone();
        h.send(
            "bob",
            ClientMsg::PlayerChooseCards {
                cards: vec![bob_hand[0].clone(), cam_card],
            },
        )
        .await;

        h.state(|st| assert!(st.nominations.is_empty())).await;
        assert_eq!(h.hand("bob").await.len(), 6);

        // a valid resubmission swaps the earlier nomination back
        h.send(
            "bob",
            ClientMsg::PlayerChooseCards {
                cards: vec![bob_hand[0].clone(), bob_hand[1].clone()],
            },
        )
        .await;
        h.send(
            "bob",
            ClientMsg::PlayerChooseCards {
                cards: vec![bob_hand[2].clone(), bob_hand[0].clone()],
            },
        )
        .await;
        h.state(|st| {
            assert_eq!(
                st.nominations["bob"],
                vec![bob_hand[2].clone(), bob_hand[0].clone()]
            );
        })
        .await;
        assert_eq!(h.hand("bob").await.len(), 4);
        h.check().await;
    }

    #[tokio::test]
    async fn vote_validation_rejects_bad_submissions() {
        let mut h = Harness::new(40, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.send("ada", ClientMsg::StartGame {}).await;
        let clue = h.hand("ada").await[0].clone();
        h.send(
            "ada",
            ClientMsg::ActivePlayerChooseCard {
                card: clue.clone(),
                description: "moon".into(),
            },
        )
        .await;
        let bob_card = h.hand("bob").await[0].clone();
        h.send(
            "bob",
            ClientMsg::PlayerChooseCards {
                cards: vec![bob_card.clone()],
            },
        )
        .await;
        let cam_card = h.hand("cam").await[0].clone();
        h.send(
            "cam",
            ClientMsg::PlayerChooseCards {
                cards: vec![cam_card],
            },
        )
        .await;
        assert_eq!(h.stage().await, Stage::Voting);

        // the storyteller cannot vote
        h.send(
            "ada",
            ClientMsg::SubmitVotes {
                cards: vec![bob_card.clone()],
            },
        )
        .await;
        // own card
        h.send(
            "bob",
            ClientMsg::SubmitVotes {
                cards: vec![bob_card.clone()],
            },
        )
        .await;
        // off-table card
        h.send(
            "bob",
            ClientMsg::SubmitVotes {
                cards: vec![h.hand("bob").await[1].clone()],
            },
        )
        .await;
        // wrong arity
        h.send(
            "bob",
            ClientMsg::SubmitVotes {
                cards: vec![clue.clone(), clue.clone()],
            },
        )
        .await;

        h.state(|st| assert!(st.votes.is_empty())).await;
        assert_eq!(h.stage().await, Stage::Voting);
        h.check().await;
    }

    #[tokio::test]
    async fn deck_refill_draws_only_unheld_cards() {
        let mut h = Harness::new(
            20,
            WinCondition::Points { target_points: 100 },
            &["ada", "bob", "cam"],
        )
        .await;
        h.send("ada", ClientMsg::StartGame {}).await;
        h.state(|st| assert_eq!(st.deck.len(), 2)).await;

        h.play_round(|_, clue, _| vec![clue.clone()]).await;
        assert_eq!(h.stage().await, Stage::Results);

        ready_all(&mut h, &["ada", "bob", "cam"]).await;
        assert_eq!(h.stage().await, Stage::ActiveChooses);

        h.state(|st| {
            assert_eq!(st.deck_refill_count, 1);
            assert!(st.discard.is_empty());
            // 20 total, 18 back in hands, the rest drawable
            assert_eq!(st.deck.len(), 2);
        })
        .await;
        for name in ["ada", "bob", "cam"] {
            assert_eq!(h.hand(name).await.len(), 6);
        }
        h.check().await;
    }

    #[tokio::test]
    async fn cards_finish_ends_at_the_round_start_that_cannot_deal() {
        let mut h = Harness::new(20, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.send("ada", ClientMsg::StartGame {}).await;

        h.play_round(|_, clue, _| vec![clue.clone()]).await;
        assert_eq!(h.stage().await, Stage::Results);

        // next deal needs 3 cards but only 2 remain and refills are off
        ready_all(&mut h, &["ada", "bob", "cam"]).await;
        assert_eq!(h.stage().await, Stage::End);
        h.state(|st| {
            assert_eq!(st.round, 1);
            assert_eq!(st.deck_refill_count, 0);
        })
        .await;

        let msgs = h.drain("bob");
        assert!(msgs.iter().any(|m| matches!(m, ServerMsg::EndGame {})));
    }

    #[tokio::test]
    async fn points_win_condition_ends_the_game() {
        let mut h = Harness::new(
            60,
            WinCondition::Points { target_points: 3 },
            &["ada", "bob", "cam"],
        )
        .await;
        h.send("ada", ClientMsg::StartGame {}).await;

        // one guesser right, one wrong: storyteller banks 3 and the game ends
        h.play_round(|guesser, clue, decoys| {
            if guesser == "bob" {
                vec![clue.clone()]
            } else {
                vec![decoys[0].clone()]
            }
        })
        .await;

        assert_eq!(h.stage().await, Stage::End);
    }

    #[tokio::test]
    async fn cycles_win_condition_counts_live_roster_rounds() {
        let mut h = Harness::new(
            60,
            WinCondition::Cycles { target_cycles: 1 },
            &["ada", "bob", "cam"],
        )
        .await;
        h.send("ada", ClientMsg::StartGame {}).await;

        for expected_round in 1..=3u16 {
            h.play_round(|_, clue, _| vec![clue.clone()]).await;
            h.state(|st| assert_eq!(st.round, expected_round)).await;
            if expected_round < 3 {
                ready_all(&mut h, &["ada", "bob", "cam"]).await;
            }
        }

        // three rounds with three players completes the cycle
        assert_eq!(h.stage().await, Stage::End);
    }

    #[tokio::test]
    async fn storytellers_rotate_through_connected_players() {
        let mut h = Harness::new(80, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.send("ada", ClientMsg::StartGame {}).await;

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(h.storyteller().await);
            h.play_round(|_, clue, _| vec![clue.clone()]).await;
            if h.stage().await == Stage::Results {
                ready_all(&mut h, &["ada", "bob", "cam"]).await;
            }
        }

        assert_eq!(seen, vec!["ada", "bob", "cam"]);
        h.check().await;
    }

    #[tokio::test]
    async fn vote_stacking_is_allowed_when_votes_per_guesser_is_two() {
        let mut h = Harness::new(60, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.send("ada", ClientMsg::SetVotesPerGuesser { votes: 2 }).await;
        h.send("ada", ClientMsg::StartGame {}).await;

        h.play_round(|_, clue, _| vec![clue.clone(), clue.clone()])
            .await;
        assert_eq!(h.stage().await, Stage::Results);
        h.state(|st| {
            for votes in st.votes.values() {
                assert_eq!(votes.len(), 2);
            }
        })
        .await;
        h.check().await;
    }
}
