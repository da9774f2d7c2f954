use strum::AsRefStr;
use thiserror::Error;

use crate::bracket::BracketError;
use crate::database::models::{TournamentStatus, UserId};
use crate::database::DatabaseError;

/// Every failure a tournament or ledger operation can report to its caller.
///
/// None of these are fatal to the process. Each one is scoped to a single operation, and the
/// operation that returned it has left every record exactly as it found it.
#[derive(Debug, Error, AsRefStr)]
pub enum CommonError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("A tournament named {0} already exists.")]
    DuplicateName(String),
    #[error("Tournament {0} does not exist.")]
    TournamentNotFound(i32),
    #[error("Tournament {0} is not open for registration.")]
    TournamentNotJoinable(i32),
    #[error("User {0} is already registered in this tournament.")]
    AlreadyRegistered(UserId),
    #[error("Tournament {0} is full.")]
    TournamentFull(i32),
    #[error("User {user} has {balance} coins but {required} are required.")]
    InsufficientFunds {
        user: UserId,
        balance: i64,
        required: i64,
    },
    #[error("Tournament {0} is not active.")]
    TournamentNotActive(i32),
    #[error("Results for round {current} must be recorded before round {requested}.")]
    RoundMismatch { current: i32, requested: i32 },
    #[error("Match {match_index} does not exist in round {round}.")]
    MatchNotFound { round: i32, match_index: usize },
    #[error("Match {match_index} of round {round} has already been completed.")]
    MatchAlreadyCompleted { round: i32, match_index: usize },
    #[error("User {0} is not a player in this match.")]
    InvalidWinner(UserId),
    #[error("Tournament {0} is already {1} and cannot be changed.")]
    TournamentAlreadyTerminal(i32, TournamentStatus),
    #[error("Tournament {0} has already started.")]
    TournamentAlreadyStarted(i32),
    #[error("The record was modified by another operation. Please try again.")]
    ConcurrentModification,
    #[error("User {0} is not allowed to perform this action.")]
    Unauthorized(UserId),
    #[error("User {0} does not exist.")]
    UserNotFound(UserId),
    #[error("Amount must be a positive number of coins, got {0}.")]
    InvalidAmount(i64),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Tournament {0} is active but has no bracket.")]
    BracketMissing(i32),
    #[error(transparent)]
    Bracket(#[from] BracketError),
    #[error("Database error: {0}")]
    Database(DatabaseError),
}

impl From<DatabaseError> for CommonError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::Conflict => CommonError::ConcurrentModification,
            DatabaseError::MissingUser(user_id) => CommonError::UserNotFound(user_id),
            other => CommonError::Database(other),
        }
    }
}

impl CommonError {
    /// A stable name for the kind of error, independent of its message.
    pub fn kind(&self) -> &str {
        self.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_becomes_concurrent_modification() {
        let error = CommonError::from(DatabaseError::Conflict);
        assert!(matches!(error, CommonError::ConcurrentModification));
        assert_eq!(error.kind(), "ConcurrentModification");
    }

    #[test]
    fn kind_ignores_variant_data() {
        let error = CommonError::RoundMismatch {
            current: 1,
            requested: 2,
        };
        assert_eq!(error.kind(), "RoundMismatch");
        assert_eq!(
            error.to_string(),
            "Results for round 1 must be recorded before round 2."
        );
    }
}
