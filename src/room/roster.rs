//! Roster management: joining (with reattach and supersession), leaving,
//! kicks, observers, moderators, and the auto-pause that keeps a room from
//! running below the player floor.

use super::*;
use crate::error::RoomError;
use rand::seq::SliceRandom;
use std::time::Duration;

const MODERATOR_ABSENCE_PROMOTION_DELAY: Duration = Duration::from_secs(5 * 60);

impl Room {
    /// Bind a session to a member, creating the member when the identity is
    /// new. Reattach matches on (name, token) and ignores the password.
    pub async fn handle_join(
        &self,
        session: &SessionId,
        name: &str,
        token: &str,
        password: Option<&str>,
    ) -> Result<(), RoomError> {
        self.touch();
        let name = name.trim();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(RoomError::InvalidName);
        }

        let mut st = self.state.lock().await;

        if let Some(member) = st.members.get_mut(name) {
            if member.token != token {
                return Err(RoomError::NameAlreadyTaken);
            }
            member.connected = true;
            let superseded = member.session.replace(session.clone());
            if let Some(old) = superseded {
                if old != *session {
                    self.hub.send(&old, ServerMsg::SupersededBySameToken {});
                    self.hub.close(&old);
                }
            }
            st.no_connected_moderator_since = None;

            self.broadcast_room_state(&st);
            if let Some(msg) = self.catch_up_msg(&st, name) {
                self.hub.send(session, msg);
            }
            return Ok(());
        }

        if let Some(expected) = st.password.as_deref() {
            if password != Some(expected) {
                return Err(RoomError::BadPassword);
            }
        }
        if !st.config.allow_midgame_join && st.stage != Stage::Joining {
            return Err(RoomError::JoinsDisabled);
        }

        // safe stages admit players; mid-round arrivals watch until the next
        // deal and are then promoted
        let kind = if st.stage.is_safe() {
            MembershipKind::Player
        } else {
            MembershipKind::Observer
        };

        if st.creator.is_none() && !st.creator_departed && st.stage == Stage::Joining {
            st.creator = Some(name.to_string());
        }

        st.members.insert(
            name.to_string(),
            Member {
                token: token.to_string(),
                kind,
                connected: true,
                session: Some(session.clone()),
                points: 0,
                ready: false,
                auto_join_on_next_round: kind == MembershipKind::Observer,
            },
        );
        st.join_order.push(name.to_string());
        self.clean_moderators(&mut st);

        self.broadcast_room_state(&st);
        if let Some(msg) = self.catch_up_msg(&st, name) {
            self.hub.send(session, msg);
        }
        self.enforce_invariants(&st);
        Ok(())
    }

    /// Socket went away: keep membership, mark the member disconnected.
    pub async fn handle_disconnect(&self, session: &SessionId) {
        self.touch();
        let mut st = self.state.lock().await;
        let Some(name) = st.member_name_by_session(session) else {
            return;
        };

        if let Some(member) = st.members.get_mut(&name) {
            member.session = None;
            member.connected = false;
        }
        self.maybe_promote_moderator(&mut st);
        self.broadcast_room_state(&st);
    }

    pub(super) fn cmd_leave(&self, st: &mut RoomState, name: &str) -> Result<(), RoomError> {
        let removed = self.remove_member(
            st,
            name,
            Some(ServerMsg::LeftRoom {
                reason: "You left the game".to_string(),
            }),
        );
        if removed {
            self.after_roster_change(st);
        }
        Ok(())
    }

    pub(super) fn cmd_kick(
        &self,
        st: &mut RoomState,
        name: &str,
        target: &str,
    ) -> Result<(), RoomError> {
        if !st.is_moderator(name) {
            return Err(RoomError::PermissionDenied);
        }
        if target.is_empty() || !st.members.contains_key(target) {
            return Ok(());
        }
        if st.is_creator(target) {
            return Err(RoomError::PermissionDenied);
        }

        let removed = self.remove_member(
            st,
            target,
            Some(ServerMsg::Kicked {
                reason: "You were kicked from the game".to_string(),
            }),
        );
        if removed {
            self.after_roster_change(st);
        }
        Ok(())
    }

    pub(super) fn cmd_set_moderator(
        &self,
        st: &mut RoomState,
        name: &str,
        target: &str,
        enabled: bool,
    ) -> Result<(), RoomError> {
        if !st.is_creator(name) && !st.is_moderator(name) {
            return Err(RoomError::PermissionDenied);
        }
        if target.is_empty() || !st.members.contains_key(target) {
            return Ok(());
        }
        // demotion is the creator's call alone, and never of the creator
        if !enabled && (!st.is_creator(name) || st.is_creator(target)) {
            return Err(RoomError::PermissionDenied);
        }

        if enabled {
            st.moderators.insert(target.to_string());
        } else {
            st.moderators.remove(target);
        }
        self.clean_moderators(st);
        self.broadcast_room_state(st);
        Ok(())
    }

    pub(super) fn cmd_set_observer(
        &self,
        st: &mut RoomState,
        name: &str,
        target: &str,
        enabled: bool,
    ) -> Result<(), RoomError> {
        if !st.is_moderator(name) {
            return Err(RoomError::PermissionDenied);
        }
        if target.is_empty() || !st.members.contains_key(target) {
            return Ok(());
        }

        if enabled {
            if !st.is_active_player(target) {
                return Ok(());
            }
            // a storyteller with a clue in flight stays until payout
            if st.storyteller.as_deref() == Some(target)
                && matches!(st.stage, Stage::PlayersChoose | Stage::Voting)
            {
                return Err(RoomError::StageForbidsAction);
            }

            if let Some(hand) = st.hands.remove(target) {
                st.discard.extend(hand);
            }
            st.votes.remove(target);
            if let Some(member) = st.members.get_mut(target) {
                member.kind = MembershipKind::Observer;
                member.auto_join_on_next_round = false;
                member.ready = false;
            }
            self.after_roster_change(st);
        } else {
            let Some(member) = st.members.get_mut(target) else {
                return Ok(());
            };
            if member.kind == MembershipKind::Player {
                return Ok(());
            }
            if st.stage.is_safe() {
                member.kind = MembershipKind::Player;
                member.auto_join_on_next_round = false;
            } else {
                member.auto_join_on_next_round = true;
            }
            self.broadcast_room_state(st);
        }
        Ok(())
    }

    pub(super) fn cmd_request_join_from_observer(
        &self,
        st: &mut RoomState,
        name: &str,
    ) -> Result<(), RoomError> {
        let Some(member) = st.members.get_mut(name) else {
            return Ok(());
        };
        if member.kind != MembershipKind::Observer {
            return Err(RoomError::StageForbidsAction);
        }

        if st.stage.is_safe() {
            member.kind = MembershipKind::Player;
            member.auto_join_on_next_round = false;
        } else {
            member.auto_join_on_next_round = true;
        }
        self.broadcast_room_state(st);
        Ok(())
    }

    pub(super) fn cmd_resume_game(&self, st: &mut RoomState, name: &str) -> Result<(), RoomError> {
        if st.stage != Stage::Paused {
            return Err(RoomError::StageForbidsAction);
        }
        if !st.is_moderator(name) {
            return Err(RoomError::PermissionDenied);
        }
        if st.active_count() < MIN_ACTIVE_PLAYERS {
            return Err(RoomError::NotEnoughPlayers);
        }

        st.paused_reason = None;
        self.start_round(st);
        Ok(())
    }

    pub(super) fn cmd_set_allow_midgame_join(
        &self,
        st: &mut RoomState,
        name: &str,
        enabled: bool,
    ) -> Result<(), RoomError> {
        if !st.is_moderator(name) {
            return Err(RoomError::PermissionDenied);
        }
        st.config.allow_midgame_join = enabled;
        self.broadcast_room_state(st);
        Ok(())
    }

    pub(super) fn cmd_set_loss_complement(
        &self,
        st: &mut RoomState,
        name: &str,
        complement: u8,
    ) -> Result<(), RoomError> {
        self.check_settings_change(st, name)?;
        if complement > MAX_LOSS_COMPLEMENT {
            return Err(RoomError::InvalidSetting);
        }
        st.config.storyteller_loss_complement = complement;
        self.broadcast_room_state(st);
        Ok(())
    }

    pub(super) fn cmd_set_votes_per_guesser(
        &self,
        st: &mut RoomState,
        name: &str,
        votes: u8,
    ) -> Result<(), RoomError> {
        self.check_settings_change(st, name)?;
        if votes == 0 || votes > MAX_VOTES_PER_GUESSER {
            return Err(RoomError::InvalidSetting);
        }
        st.config.votes_per_guesser = votes;
        self.broadcast_room_state(st);
        Ok(())
    }

    pub(super) fn cmd_set_cards_per_hand(
        &self,
        st: &mut RoomState,
        name: &str,
        cards: u8,
    ) -> Result<(), RoomError> {
        self.check_settings_change(st, name)?;
        if cards == 0 || cards > MAX_CARDS_PER_HAND || cards < st.config.nominations_per_guesser {
            return Err(RoomError::InvalidSetting);
        }
        st.config.cards_per_hand = cards;
        self.broadcast_room_state(st);
        Ok(())
    }

    pub(super) fn cmd_set_nominations_per_guesser(
        &self,
        st: &mut RoomState,
        name: &str,
        cards: u8,
    ) -> Result<(), RoomError> {
        self.check_settings_change(st, name)?;
        if cards == 0 || cards > MAX_NOMINATIONS_PER_GUESSER || cards > st.config.cards_per_hand {
            return Err(RoomError::InvalidSetting);
        }
        st.config.nominations_per_guesser = cards;
        self.broadcast_room_state(st);
        Ok(())
    }

    /// Rule changes land only at round boundaries, so an in-flight round
    /// never sees a torn config.
    fn check_settings_change(&self, st: &RoomState, name: &str) -> Result<(), RoomError> {
        if !st.is_moderator(name) {
            return Err(RoomError::PermissionDenied);
        }
        if !matches!(
            st.stage,
            Stage::Joining | Stage::Paused | Stage::Results | Stage::End
        ) {
            return Err(RoomError::StageForbidsAction);
        }
        Ok(())
    }

    /// Erase a member. Their hand goes to the discard set; their nominations
    /// stay on the table so the round stays coherent for everyone else.
    pub(super) fn remove_member(
        &self,
        st: &mut RoomState,
        name: &str,
        personal: Option<ServerMsg>,
    ) -> bool {
        let Some(member) = st.members.remove(name) else {
            return false;
        };

        if let Some(hand) = st.hands.remove(name) {
            st.discard.extend(hand);
        }
        st.votes.remove(name);
        st.join_order.retain(|n| n != name);
        st.moderators.remove(name);
        if st.creator.as_deref() == Some(name) {
            st.creator = None;
            st.creator_departed = true;
        }

        if let Some(session) = member.session {
            if let Some(msg) = personal {
                self.hub.send(&session, msg);
            }
            self.hub.close(&session);
        }

        self.clean_moderators(st);
        true
    }

    /// Re-establish a consistent stage after a member left, was kicked, or
    /// was demoted to observer.
    pub(super) fn after_roster_change(&self, st: &mut RoomState) {
        if !st.stage.is_round_stage() {
            self.broadcast_room_state(st);
            return;
        }

        if st.active_count() < MIN_ACTIVE_PLAYERS {
            self.pause_room(st, NEED_PLAYERS_REASON);
            return;
        }

        let storyteller_in_flight = matches!(
            st.stage,
            Stage::ActiveChooses | Stage::PlayersChoose | Stage::Voting
        );
        let storyteller_gone = st
            .storyteller
            .as_deref()
            .map(|s| !st.is_active_player(s))
            .unwrap_or(false);

        if storyteller_in_flight && storyteller_gone {
            // the round is void; rotation picks the next storyteller
            self.cancel_round(st);
            self.start_round(st);
            return;
        }

        match st.stage {
            Stage::PlayersChoose if st.all_guessers_nominated() => self.enter_voting(st),
            Stage::Voting if st.all_guessers_voted() => self.enter_results(st),
            Stage::Results if st.active_players_all_ready() => self.advance_after_results(st),
            _ => self.broadcast_room_state(st),
        }
    }

    pub(super) fn pause_room(&self, st: &mut RoomState, reason: &str) {
        self.cancel_round(st);
        st.stage = Stage::Paused;
        st.paused_reason = Some(reason.to_string());
        self.broadcast_room_state(st);
    }

    fn clean_moderators(&self, st: &mut RoomState) {
        let member_names: HashSet<String> = st.members.keys().cloned().collect();
        st.moderators.retain(|name| member_names.contains(name));

        if let Some(creator) = st.creator.clone() {
            if member_names.contains(&creator) {
                st.moderators.insert(creator);
            }
        }
    }

    fn has_connected_moderator(&self, st: &RoomState) -> bool {
        st.moderators.iter().any(|name| {
            st.members
                .get(name)
                .map(|member| member.connected)
                .unwrap_or(false)
        })
    }

    /// After five minutes without a connected moderator, promote a uniformly
    /// random connected member (player or observer).
    pub(super) fn maybe_promote_moderator(&self, st: &mut RoomState) -> bool {
        self.clean_moderators(st);

        if self.has_connected_moderator(st) {
            st.no_connected_moderator_since = None;
            return false;
        }

        let now = Instant::now();
        let since = *st.no_connected_moderator_since.get_or_insert(now);
        if now.duration_since(since) < MODERATOR_ABSENCE_PROMOTION_DELAY {
            return false;
        }

        let candidates: Vec<String> = st
            .members
            .iter()
            .filter(|(name, member)| member.connected && !st.moderators.contains(*name))
            .map(|(name, _)| name.clone())
            .collect();
        let Some(promoted) = candidates.choose(&mut rand::thread_rng()).cloned() else {
            return false;
        };

        tracing::info!("room {}: promoting {} to moderator", st.room_id, promoted);
        st.moderators.insert(promoted);
        st.no_connected_moderator_since = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::Harness;
    use super::*;
    use crate::protocol::ClientMsg;

    #[tokio::test]
    async fn join_rejects_taken_name_with_different_token() {
        let h = Harness::new(40, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        let (session, _rx) = h.hub.register();
        let err = h
            .room
            .handle_join(&session, "ada", "other-token", None)
            .await
            .unwrap_err();
        assert_eq!(err, RoomError::NameAlreadyTaken);
    }

    #[tokio::test]
    async fn join_requires_the_room_password() {
        let hub = Arc::new(crate::ws::hub::SessionHub::new());
        let room = Room::new(
            "testr",
            super::super::testutil::registry(40),
            Arc::clone(&hub),
            WinCondition::CardsFinish,
            None,
            Some("swordfish".into()),
        );

        let (session, _rx) = hub.register();
        let err = room
            .handle_join(&session, "ada", "t", Some("wrong"))
            .await
            .unwrap_err();
        assert_eq!(err, RoomError::BadPassword);

        let (session, _rx) = hub.register();
        room.handle_join(&session, "ada", "t", Some("swordfish"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reconnect_restores_membership_and_hand() {
        let mut h = Harness::new(40, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.send("ada", ClientMsg::StartGame {}).await;
        let storyteller = h.storyteller().await;
        let guesser = h
            .state(|st| st.guessers().first().cloned().unwrap())
            .await;
        let hand_before = h.hand(&guesser).await;

        // drop the guesser's socket
        let old_session = h.sessions.get(&guesser).cloned().unwrap();
        h.room.handle_disconnect(&old_session).await;
        h.state(|st| assert!(!st.members[&guesser].connected)).await;

        // same name + token reattaches with the same hand
        let (session, rx) = h.hub.register();
        h.room
            .handle_join(&session, &guesser, &format!("token-{guesser}"), None)
            .await
            .unwrap();
        h.sessions.insert(guesser.clone(), session);
        h.inboxes.insert(guesser.clone(), rx);

        h.state(|st| assert!(st.members[&guesser].connected)).await;
        assert_eq!(h.hand(&guesser).await, hand_before);
        assert_eq!(h.storyteller().await, storyteller);
        h.check().await;
    }

    #[tokio::test]
    async fn second_session_with_same_token_supersedes_the_first() {
        let mut h = Harness::new(40, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;

        let (session, _rx) = h.hub.register();
        h.room
            .handle_join(&session, "ada", "token-ada", None)
            .await
            .unwrap();

        let msgs = h.drain("ada");
        assert!(msgs
            .iter()
            .any(|m| matches!(m, ServerMsg::SupersededBySameToken {})));
        let old = h.sessions.get("ada").unwrap();
        assert!(!h.hub.is_registered(old));
    }

    #[tokio::test]
    async fn midgame_join_lands_as_observer_and_promotes_next_round() {
        let mut h = Harness::new(60, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.send("ada", ClientMsg::StartGame {}).await;
        assert_eq!(h.stage().await, Stage::ActiveChooses);

        h.join("dee").await.unwrap();
        h.state(|st| {
            assert_eq!(st.members["dee"].kind, MembershipKind::Observer);
            assert!(st.members["dee"].auto_join_on_next_round);
        })
        .await;

        // play the round out; the next deal promotes the observer
        h.play_round(|_, clue, _| vec![clue.clone()]).await;
        for name in ["ada", "bob", "cam"] {
            h.send(name, ClientMsg::Ready {}).await;
        }
        assert_eq!(h.stage().await, Stage::ActiveChooses);
        h.state(|st| {
            assert_eq!(st.members["dee"].kind, MembershipKind::Player);
            assert!(!st.members["dee"].auto_join_on_next_round);
        })
        .await;
        assert_eq!(h.hand("dee").await.len(), 6);
        h.check().await;
    }

    #[tokio::test]
    async fn joins_disabled_blocks_new_names_midgame() {
        let mut h = Harness::new(60, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.send("ada", ClientMsg::SetAllowMidgameJoin { enabled: false })
            .await;
        h.send("ada", ClientMsg::StartGame {}).await;

        let err = h.join("dee").await.unwrap_err();
        assert_eq!(err, RoomError::JoinsDisabled);
    }

    #[tokio::test]
    async fn leaving_below_the_floor_pauses_the_room() {
        let mut h = Harness::new(60, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.send("ada", ClientMsg::StartGame {}).await;
        h.send("cam", ClientMsg::LeaveRoom {}).await;

        assert_eq!(h.stage().await, Stage::Paused);
        h.state(|st| {
            assert_eq!(st.paused_reason.as_deref(), Some(NEED_PLAYERS_REASON));
            assert!(!st.members.contains_key("cam"));
        })
        .await;
        h.check().await;
    }

    #[tokio::test]
    async fn resume_needs_a_moderator_and_three_players() {
        let mut h = Harness::new(60, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.send("ada", ClientMsg::StartGame {}).await;
        h.send("cam", ClientMsg::LeaveRoom {}).await;
        assert_eq!(h.stage().await, Stage::Paused);

        // two players cannot resume
        h.send("ada", ClientMsg::ResumeGame {}).await;
        assert_eq!(h.stage().await, Stage::Paused);

        // a pause is a safe stage: a fresh joiner is admitted as a player
        h.join("dee").await.unwrap();
        h.state(|st| assert_eq!(st.members["dee"].kind, MembershipKind::Player))
            .await;

        // non-moderators cannot resume
        h.send("bob", ClientMsg::ResumeGame {}).await;
        assert_eq!(h.stage().await, Stage::Paused);

        h.send("ada", ClientMsg::ResumeGame {}).await;
        assert_eq!(h.stage().await, Stage::ActiveChooses);
        h.check().await;
    }

    #[tokio::test]
    async fn storyteller_kick_cancels_the_round_and_rotates() {
        let mut h =
            Harness::new(80, WinCondition::CardsFinish, &["ada", "bob", "cam", "dee"]).await;
        h.send("ada", ClientMsg::StartGame {}).await;

        // finish the first round so the rotation moves off the creator
        h.play_round(|_, clue, _| vec![clue.clone()]).await;
        for name in ["ada", "bob", "cam", "dee"] {
            h.send(name, ClientMsg::Ready {}).await;
        }
        let storyteller = h.storyteller().await;
        assert_ne!(storyteller, "ada");

        let clue = h.hand(&storyteller).await[0].clone();
        h.send(
            &storyteller,
            ClientMsg::ActivePlayerChooseCard {
                card: clue.clone(),
                description: "moon".into(),
            },
        )
        .await;
        assert_eq!(h.stage().await, Stage::PlayersChoose);

        h.send(
            "ada",
            ClientMsg::KickPlayer {
                player: storyteller.clone(),
            },
        )
        .await;

        assert_eq!(h.stage().await, Stage::ActiveChooses);
        let next = h.storyteller().await;
        assert_ne!(next, storyteller);
        // the in-flight clue card is out of the game
        h.state(|st| assert!(st.discard.contains(&clue))).await;
        h.check().await;
    }

    #[tokio::test]
    async fn observer_demotion_respects_storyteller_in_flight() {
        let mut h =
            Harness::new(80, WinCondition::CardsFinish, &["ada", "bob", "cam", "dee"]).await;
        h.send("ada", ClientMsg::StartGame {}).await;
        let storyteller = h.storyteller().await;
        let clue = h.hand(&storyteller).await[0].clone();
        h.send(
            &storyteller,
            ClientMsg::ActivePlayerChooseCard {
                card: clue,
                description: "moon".into(),
            },
        )
        .await;

        h.send("ada", ClientMsg::SetObserver {
            player: storyteller.clone(),
            enabled: true,
        })
        .await;
        // demotion refused mid-clue
        h.state(|st| assert!(st.is_active_player(&storyteller))).await;

        // a guesser can be demoted; their hand is discarded
        let guesser = h
            .state(|st| st.guessers().first().cloned().unwrap())
            .await;
        h.send("ada", ClientMsg::SetObserver {
            player: guesser.clone(),
            enabled: true,
        })
        .await;
        h.state(|st| {
            assert_eq!(st.members[&guesser].kind, MembershipKind::Observer);
            assert!(!st.hands.contains_key(&guesser));
        })
        .await;
        h.check().await;
    }

    #[tokio::test]
    async fn observer_request_join_is_immediate_in_safe_stages() {
        let mut h = Harness::new(60, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        h.join("dee").await.unwrap();
        h.send("ada", ClientMsg::SetObserver {
            player: "dee".into(),
            enabled: true,
        })
        .await;
        h.state(|st| assert_eq!(st.members["dee"].kind, MembershipKind::Observer))
            .await;

        h.send("dee", ClientMsg::RequestJoinFromObserver {}).await;
        h.state(|st| assert_eq!(st.members["dee"].kind, MembershipKind::Player))
            .await;
    }

    #[tokio::test]
    async fn settings_are_rejected_mid_round_and_from_non_moderators() {
        let mut h = Harness::new(60, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;

        // non-moderator
        h.send("bob", ClientMsg::SetVotesPerGuesser { votes: 2 }).await;
        h.state(|st| assert_eq!(st.config.votes_per_guesser, 1)).await;

        // moderator in a safe stage
        h.send("ada", ClientMsg::SetVotesPerGuesser { votes: 2 }).await;
        h.state(|st| assert_eq!(st.config.votes_per_guesser, 2)).await;

        // out-of-range values bounce
        h.send("ada", ClientMsg::SetCardsPerHand { cards: 13 }).await;
        h.state(|st| assert_eq!(st.config.cards_per_hand, 6)).await;

        h.send("ada", ClientMsg::StartGame {}).await;
        h.send("ada", ClientMsg::SetVotesPerGuesser { votes: 1 }).await;
        h.state(|st| assert_eq!(st.config.votes_per_guesser, 2)).await;
    }

    #[tokio::test]
    async fn moderator_promotion_after_absence_window() {
        let mut h = Harness::new(60, WinCondition::CardsFinish, &["ada", "bob", "cam"]).await;
        let ada_session = h.sessions.get("ada").cloned().unwrap();
        h.room.handle_disconnect(&ada_session).await;

        // backdate the absence marker past the five-minute window
        let Some(backdated) = Instant::now().checked_sub(MODERATOR_ABSENCE_PROMOTION_DELAY) else {
            return;
        };
        h.mutate(|st| {
            st.no_connected_moderator_since = Some(backdated);
        })
        .await;

        h.room.run_maintenance().await;
        h.state(|st| {
            let promoted = st
                .moderators
                .iter()
                .any(|name| name != "ada" && st.members[name].connected);
            assert!(promoted);
        })
        .await;
    }
}
