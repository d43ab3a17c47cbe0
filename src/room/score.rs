//! Round scoring.
//!
//! With `G` voting guessers and complement `C`, the loss threshold is
//! `T = G - C`. The storyteller loses the round when at least `T` guessers
//! found the clue card, or at least `T` guessers wasted a token elsewhere.
//! Payouts follow the base table plus the double-correct, threshold-correct
//! upgrade, and decoy bonuses, all computed against a snapshot of the votes.

use super::RoomState;
use crate::types::{CardId, WinCondition};
use std::collections::HashMap;

const DECOY_BONUS_CAP: u32 = 3;

pub(super) fn compute_round_scores(st: &RoomState) -> HashMap<String, u32> {
    let mut point_change = HashMap::new();
    let (Some(storyteller), Some(clue)) = (st.storyteller.clone(), st.clue_card.clone()) else {
        return point_change;
    };
    let cfg = &st.config;

    let voters: Vec<(&String, &Vec<CardId>)> = st.votes.iter().collect();
    let guesser_count = voters.len();
    let threshold = guesser_count.saturating_sub(cfg.storyteller_loss_complement as usize);

    let right_tokens: HashMap<&String, usize> = voters
        .iter()
        .map(|(name, votes)| (*name, votes.iter().filter(|card| **card == clue).count()))
        .collect();
    let right_guessers = right_tokens.values().filter(|&&right| right >= 1).count();
    let wrong_guessers = voters
        .iter()
        .filter(|(name, votes)| votes.len() > right_tokens[*name])
        .count();

    let loss = right_guessers >= threshold || wrong_guessers >= threshold;
    let threshold_correct_loss = loss && right_guessers >= threshold;

    // tokens other players landed on each guesser's nominations
    let mut owner_of: HashMap<&CardId, &String> = HashMap::new();
    for (owner, cards) in &st.nominations {
        for card in cards {
            owner_of.insert(card, owner);
        }
    }
    let mut decoy_tokens: HashMap<&String, u32> = HashMap::new();
    for (voter, votes) in &voters {
        for card in votes.iter() {
            if *card == clue {
                continue;
            }
            if let Some(&owner) = owner_of.get(card) {
                if owner != *voter {
                    *decoy_tokens.entry(owner).or_insert(0) += 1;
                }
            }
        }
    }

    point_change.insert(storyteller.clone(), if loss { 0 } else { 3 });

    for (name, _) in &voters {
        let right = right_tokens[*name];

        let base: u32 = if loss {
            if threshold_correct_loss
                && cfg.bonus_correct_guess_on_threshold_correct_loss
                && right >= 1
            {
                3
            } else {
                2
            }
        } else if right >= 1 {
            3
        } else {
            0
        };

        let double_correct = right >= 2
            && !(threshold_correct_loss && !cfg.bonus_double_vote_on_threshold_correct_loss);

        point_change.insert((*name).clone(), base + u32::from(double_correct));
    }

    for (owner, tokens) in decoy_tokens {
        // departed nominators keep the table coherent but earn nothing
        if let Some(delta) = point_change.get_mut(owner.as_str()) {
            *delta += tokens.min(DECOY_BONUS_CAP);
        }
    }

    point_change
}

pub(super) fn should_end_game(st: &RoomState) -> bool {
    match st.win_condition {
        WinCondition::Points { target_points } => {
            let best = st.members.values().map(|m| m.points).max().unwrap_or(0);
            best >= u32::from(target_points)
        }
        WinCondition::Cycles { target_cycles } => {
            if st.round == 0 {
                return false;
            }
            // cycle length follows the live roster at check time
            let per_cycle = st.active_count() as u32;
            per_cycle > 0 && u32::from(st.round) >= u32::from(target_cycles) * per_cycle
        }
        WinCondition::CardsFinish => false,
    }
}
