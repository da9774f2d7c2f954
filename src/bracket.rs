use thiserror::Error;

use crate::database::models::{Bracket, Match, MatchStatus, Round, UserId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BracketError {
    #[error("Brackets can only hold 4 or 8 players, got {0}.")]
    InvalidBracketSize(i32),
    #[error("Expected {expected} participants but got {actual}.")]
    ParticipantCountMismatch { expected: i32, actual: usize },
    #[error("Invalid winner assignment: {0}")]
    InvalidWinnerAssignment(String),
}

/// Number of rounds a bracket of `max_players` needs, or `None` for unsupported sizes.
pub fn total_rounds(max_players: i32) -> Option<i32> {
    match max_players {
        4 => Some(2),
        8 => Some(3),
        _ => None,
    }
}

/// Display label of a round, counted back from the final.
fn round_name(round_number: i32, total_rounds: i32) -> String {
    match total_rounds - round_number {
        0 => "Final".to_string(),
        1 => "Semi-Finals".to_string(),
        2 => "Quarter-Finals".to_string(),
        _ => format!("Round {}", round_number),
    }
}

/// Builds the initial bracket for a full tournament.
///
/// Participants are paired in the order given: `participants[0]` plays `participants[1]`,
/// `participants[2]` plays `participants[3]`, and so on. There is no shuffling or ranking, so
/// the same input always produces the same bracket.
///
/// Round 1 is fully populated. Every later round exists with unresolved slots. All matches
/// start out pending.
pub fn build(max_players: i32, participants: &[UserId]) -> Result<Bracket, BracketError> {
    let total_rounds =
        total_rounds(max_players).ok_or(BracketError::InvalidBracketSize(max_players))?;

    if participants.len() != max_players as usize {
        return Err(BracketError::ParticipantCountMismatch {
            expected: max_players,
            actual: participants.len(),
        });
    }

    let mut rounds = Vec::with_capacity(total_rounds as usize);

    let first_round = participants
        .chunks_exact(2)
        .map(|pair| Match::new(pair[0].clone(), pair[1].clone()))
        .collect();
    rounds.push(Round {
        round_number: 1,
        name: round_name(1, total_rounds),
        matches: first_round,
    });

    let mut match_count = max_players as usize / 2;
    for round_number in 2..=total_rounds {
        match_count /= 2;
        rounds.push(Round {
            round_number,
            name: round_name(round_number, total_rounds),
            matches: vec![Match::unresolved(); match_count],
        });
    }

    Ok(Bracket {
        max_players,
        total_rounds,
        rounds,
    })
}

/// Completes `completed_round` with `winners` and seeds the following round.
///
/// `winners[i]` is the winner of match `i`. The winners of matches `2i` and `2i + 1` become the
/// two players of match `i` in the next round, which is marked active.
///
/// When `completed_round` is the final round there is nothing to seed. The caller recognises a
/// finished tournament by the absence of a successor round.
///
/// The input bracket is left untouched; the updated bracket is returned as a new value.
pub fn advance(
    bracket: &Bracket,
    completed_round: i32,
    winners: &[UserId],
) -> Result<Bracket, BracketError> {
    let mut next = bracket.clone();

    let round = next.round_mut(completed_round).ok_or_else(|| {
        BracketError::InvalidWinnerAssignment(format!(
            "round {} does not exist",
            completed_round
        ))
    })?;

    if winners.len() != round.matches.len() {
        return Err(BracketError::InvalidWinnerAssignment(format!(
            "round {} has {} matches but {} winners were given",
            completed_round,
            round.matches.len(),
            winners.len()
        )));
    }

    for (index, (game, winner)) in round.matches.iter_mut().zip(winners).enumerate() {
        if !game.is_contested_by(winner) {
            return Err(BracketError::InvalidWinnerAssignment(format!(
                "{} is not a player in match {} of round {}",
                winner, index, completed_round
            )));
        }
        game.winner = Some(winner.clone());
        game.status = MatchStatus::Completed;
    }

    if let Some(following) = next.round_mut(completed_round + 1) {
        for (game, pair) in following.matches.iter_mut().zip(winners.chunks_exact(2)) {
            game.player1 = Some(pair[0].clone());
            game.player2 = Some(pair[1].clone());
            game.status = MatchStatus::Active;
        }
    }

    Ok(next)
}
