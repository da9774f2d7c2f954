use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

/// An opaque reference to a player.
///
/// The tournament core only ever compares these; it never looks inside.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The caller of an operation, as supplied by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub is_admin: bool,
}

#[cfg(test)]
impl Actor {
    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            is_admin: true,
        }
    }

    pub fn player(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            is_admin: false,
        }
    }
}

/// The status of a tournament.
///
/// `Completed` and `Cancelled` are terminal: a tournament in either state accepts no further
/// mutation.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    sqlx::Type,
    Serialize,
    Deserialize,
    Display,
)]
#[sqlx(type_name = "tournament_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TournamentStatus {
    #[default]
    Registration,
    Active,
    Completed,
    Cancelled,
}

impl TournamentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, sqlx::Type, Serialize, Deserialize, Display,
)]
#[sqlx(type_name = "tournament_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TournamentType {
    #[default]
    Public,
    Private,
}

/// The status of a single match within a bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    #[default]
    Pending,
    Active,
    Completed,
}

/// One bout between two players.
///
/// Either slot may be empty until the round feeding it has completed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Match {
    pub player1: Option<UserId>,
    pub player2: Option<UserId>,
    pub winner: Option<UserId>,
    pub status: MatchStatus,
}

impl Match {
    pub fn new(player1: UserId, player2: UserId) -> Self {
        Self {
            player1: Some(player1),
            player2: Some(player2),
            winner: None,
            status: MatchStatus::Pending,
        }
    }

    /// A match whose players are not known yet.
    pub fn unresolved() -> Self {
        Self::default()
    }

    /// Both players, if both slots are filled.
    pub fn players(&self) -> Option<(&UserId, &UserId)> {
        match (&self.player1, &self.player2) {
            (Some(p1), Some(p2)) => Some((p1, p2)),
            _ => None,
        }
    }

    /// Whether `user` occupies one of the two slots.
    ///
    /// Always false while either slot is unresolved, since such a match cannot be decided.
    pub fn is_contested_by(&self, user: &UserId) -> bool {
        self.players()
            .map(|(p1, p2)| p1 == user || p2 == user)
            .unwrap_or(false)
    }

    pub fn is_completed(&self) -> bool {
        self.status == MatchStatus::Completed
    }
}

/// A tier of matches played concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub round_number: i32,
    pub name: String,
    pub matches: Vec<Match>,
}

impl Round {
    /// The winners of every match in match order, or `None` if any match is undecided.
    pub fn winners(&self) -> Option<Vec<UserId>> {
        self.matches.iter().map(|m| m.winner.clone()).collect()
    }
}

/// The full tournament tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bracket {
    pub max_players: i32,
    pub total_rounds: i32,
    pub rounds: Vec<Round>,
}

impl Bracket {
    pub fn round(&self, round_number: i32) -> Option<&Round> {
        self.rounds.iter().find(|r| r.round_number == round_number)
    }

    pub fn round_mut(&mut self, round_number: i32) -> Option<&mut Round> {
        self.rounds.iter_mut().find(|r| r.round_number == round_number)
    }
}

/// A tournament within the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tournament {
    pub tournament_id: i32,
    pub name: String,
    pub tournament_type: TournamentType,
    pub max_players: i32,
    pub entry_cost: i64,
    pub prize_pool: i64,
    pub award_percentage: i32,
    pub status: TournamentStatus,
    pub participants: Vec<UserId>,
    pub bracket: Option<Bracket>,
    pub current_round: i32,
    pub winner: Option<UserId>,
    pub start_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    /// Bumped on every committed write. Used for optimistic concurrency checks.
    pub version: i32,
}

impl Tournament {
    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.max_players as usize
    }

    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    /// The amount paid to the winner: `floor(prize_pool * award_percentage / 100)`.
    ///
    /// Splits the pool into hundreds and a remainder so no intermediate product can overflow.
    /// Expects a positive pool and a percentage in `0..=100`.
    pub fn prize(&self) -> i64 {
        let percentage = i64::from(self.award_percentage);
        self.prize_pool / 100 * percentage + self.prize_pool % 100 * percentage / 100
    }
}

pub const DEFAULT_AWARD_PERCENTAGE: i32 = 80;

fn default_award_percentage() -> i32 {
    DEFAULT_AWARD_PERCENTAGE
}

/// The configuration an admin supplies when creating a tournament.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTournament {
    pub name: String,
    #[serde(default)]
    pub tournament_type: TournamentType,
    pub max_players: i32,
    pub entry_cost: i64,
    pub prize_pool: i64,
    #[serde(default = "default_award_percentage")]
    pub award_percentage: i32,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
}

/// A player account and its coin balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub user_id: UserId,
    pub name: String,
    pub balance: i64,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(user_id: UserId, name: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
            balance: 0,
            is_admin: false,
            created_at: Utc::now(),
        }
    }

    pub fn actor(&self) -> Actor {
        Actor {
            user_id: self.user_id.clone(),
            is_admin: self.is_admin,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display,
)]
#[sqlx(type_name = "transaction_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionType {
    MatchEntry,
    MatchWin,
    TournamentEntry,
    TournamentWin,
    CoinPurchase,
    AdminAdd,
    AdminRemove,
}

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub transaction_id: i64,
    pub user_id: UserId,
    pub transaction_type: TransactionType,
    /// Negative for debits, positive for credits.
    pub amount: i64,
    pub reason: String,
    pub balance_before: i64,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

/// A ledger entry that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub reason: String,
    pub balance_before: i64,
    pub balance_after: i64,
}
