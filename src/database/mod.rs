use chrono::{DateTime, Utc};
use models::*;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use thiserror::Error;
use tracing::info;

use crate::AppError;

/// In-memory database with optimistic concurrency control.
///
/// Used by the tests and for running the console without Postgres.
pub mod memory;
/// Models for the database.
///
/// These mirror the logical data model of the tournament core. Most are mapped directly to a
/// table, while brackets and participant lists are stored as JSON on the tournament row.
pub mod models;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another transaction changed a record this one read.
    #[error("conflicting concurrent update")]
    Conflict,
    #[error("unique constraint violated")]
    UniqueViolation,
    #[error("no user {0}")]
    MissingUser(UserId),
    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(value: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_error) = value {
            match db_error.code().as_deref() {
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => return DatabaseError::Conflict,
                Some("23505") => return DatabaseError::UniqueViolation,
                _ => {}
            }
        }
        DatabaseError::Sqlx(value)
    }
}

/// Any database that can store tournaments, balances and the transaction log.
///
/// Reads here are plain snapshots. Anything that changes state goes through
/// [`Database::begin`] so that it commits or fails as a whole.
#[allow(async_fn_in_trait)]
pub trait Database {
    type Transaction: DatabaseTransaction;

    /// Starts a new atomicity unit.
    async fn begin(&self) -> Result<Self::Transaction, DatabaseError>;

    async fn get_tournament(&self, tournament_id: i32)
        -> Result<Option<Tournament>, DatabaseError>;

    /// Retrieves all tournaments, newest first, optionally only those with the given status.
    async fn get_tournaments(
        &self,
        status: Option<TournamentStatus>,
    ) -> Result<Vec<Tournament>, DatabaseError>;

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, DatabaseError>;

    /// Adds a user with a zero balance. Returns false if the user already existed, in which
    /// case nothing is changed.
    async fn create_user(
        &self,
        user_id: &UserId,
        name: &str,
        is_admin: bool,
    ) -> Result<bool, DatabaseError>;

    /// Retrieves a user's ledger entries in the order they were committed.
    async fn get_transactions(&self, user_id: &UserId)
        -> Result<Vec<Transaction>, DatabaseError>;
}

/// A unit of reads and writes that commits or fails together.
///
/// Records read through a transaction are protected against concurrent changes until the
/// transaction ends: either by row locks or by a version check at commit. Dropping a
/// transaction without committing discards every write made through it.
#[allow(async_fn_in_trait)]
pub trait DatabaseTransaction {
    async fn tournament(&mut self, tournament_id: i32)
        -> Result<Option<Tournament>, DatabaseError>;

    async fn tournament_name_exists(&mut self, name: &str) -> Result<bool, DatabaseError>;

    /// Stores a new tournament in registration and returns it with its assigned id.
    async fn insert_tournament(
        &mut self,
        tournament: &NewTournament,
    ) -> Result<Tournament, DatabaseError>;

    /// Writes `tournament` back if nobody else has changed it since it was read, bumping its
    /// version. Fails with [`DatabaseError::Conflict`] otherwise.
    async fn update_tournament(&mut self, tournament: &mut Tournament)
        -> Result<(), DatabaseError>;

    async fn user(&mut self, user_id: &UserId) -> Result<Option<User>, DatabaseError>;

    async fn set_balance(&mut self, user_id: &UserId, balance: i64) -> Result<(), DatabaseError>;

    async fn append_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, DatabaseError>;

    async fn commit(self) -> Result<(), DatabaseError>;
}

/// The Postgres database used in production.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pub pool: PgPool,
}

impl PgDatabase {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPool::connect(database_url).await?;
        info!("Successfully connected to the database.");

        Ok(PgDatabase { pool })
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

const TOURNAMENT_COLUMNS: &str = r#"
    tournament_id, name, tournament_type, max_players, entry_cost, prize_pool,
    award_percentage, status, participants, bracket, current_round, winner, start_date,
    created_at, started_at, completed_at, cancelled_at, cancellation_reason, version
"#;

const USER_COLUMNS: &str = "user_id, name, balance, is_admin, created_at";

const TRANSACTION_COLUMNS: &str = r#"
    transaction_id, user_id, transaction_type, amount, reason, balance_before, balance_after,
    created_at
"#;

#[derive(sqlx::FromRow)]
struct TournamentRow {
    tournament_id: i32,
    name: String,
    tournament_type: TournamentType,
    max_players: i32,
    entry_cost: i64,
    prize_pool: i64,
    award_percentage: i32,
    status: TournamentStatus,
    participants: Json<Vec<UserId>>,
    bracket: Option<Json<Bracket>>,
    current_round: i32,
    winner: Option<UserId>,
    start_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    version: i32,
}

impl From<TournamentRow> for Tournament {
    fn from(row: TournamentRow) -> Self {
        Tournament {
            tournament_id: row.tournament_id,
            name: row.name,
            tournament_type: row.tournament_type,
            max_players: row.max_players,
            entry_cost: row.entry_cost,
            prize_pool: row.prize_pool,
            award_percentage: row.award_percentage,
            status: row.status,
            participants: row.participants.0,
            bracket: row.bracket.map(|b| b.0),
            current_round: row.current_round,
            winner: row.winner,
            start_date: row.start_date,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            cancelled_at: row.cancelled_at,
            cancellation_reason: row.cancellation_reason,
            version: row.version,
        }
    }
}

impl Database for PgDatabase {
    type Transaction = PgTransaction;

    async fn begin(&self) -> Result<Self::Transaction, DatabaseError> {
        Ok(PgTransaction {
            inner: self.pool.begin().await?,
        })
    }

    async fn get_tournament(
        &self,
        tournament_id: i32,
    ) -> Result<Option<Tournament>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM tournaments WHERE tournament_id = $1",
            TOURNAMENT_COLUMNS
        );
        let tournament = sqlx::query_as::<_, TournamentRow>(&sql)
            .bind(tournament_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Tournament::from);

        Ok(tournament)
    }

    async fn get_tournaments(
        &self,
        status: Option<TournamentStatus>,
    ) -> Result<Vec<Tournament>, DatabaseError> {
        let sql = format!(
            r#"
            SELECT {} FROM tournaments
            WHERE $1::tournament_status IS NULL OR status = $1
            ORDER BY created_at DESC, tournament_id DESC
            "#,
            TOURNAMENT_COLUMNS
        );
        let tournaments = sqlx::query_as::<_, TournamentRow>(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Tournament::from)
            .collect();

        Ok(tournaments)
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, DatabaseError> {
        let sql = format!("SELECT {} FROM users WHERE user_id = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn create_user(
        &self,
        user_id: &UserId,
        name: &str,
        is_admin: bool,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (user_id, name, balance, is_admin)
            VALUES ($1, $2, 0, $3)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(is_admin)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_transactions(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE user_id = $1 ORDER BY transaction_id",
            TRANSACTION_COLUMNS
        );
        let transactions = sqlx::query_as::<_, Transaction>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(transactions)
    }
}

/// A Postgres transaction.
///
/// Tournament and user rows are read with `FOR UPDATE`, so concurrent operations on the same
/// tournament or balance queue behind each other until this transaction ends.
pub struct PgTransaction {
    inner: sqlx::Transaction<'static, Postgres>,
}

impl DatabaseTransaction for PgTransaction {
    async fn tournament(
        &mut self,
        tournament_id: i32,
    ) -> Result<Option<Tournament>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM tournaments WHERE tournament_id = $1 FOR UPDATE",
            TOURNAMENT_COLUMNS
        );
        let tournament = sqlx::query_as::<_, TournamentRow>(&sql)
            .bind(tournament_id)
            .fetch_optional(&mut *self.inner)
            .await?
            .map(Tournament::from);

        Ok(tournament)
    }

    async fn tournament_name_exists(&mut self, name: &str) -> Result<bool, DatabaseError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM tournaments WHERE name = $1)")
                .bind(name)
                .fetch_one(&mut *self.inner)
                .await?;

        Ok(exists)
    }

    async fn insert_tournament(
        &mut self,
        tournament: &NewTournament,
    ) -> Result<Tournament, DatabaseError> {
        let sql = format!(
            r#"
            INSERT INTO tournaments
                (name, tournament_type, max_players, entry_cost, prize_pool, award_percentage, start_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            TOURNAMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, TournamentRow>(&sql)
            .bind(&tournament.name)
            .bind(tournament.tournament_type)
            .bind(tournament.max_players)
            .bind(tournament.entry_cost)
            .bind(tournament.prize_pool)
            .bind(tournament.award_percentage)
            .bind(tournament.start_date)
            .fetch_one(&mut *self.inner)
            .await?;

        Ok(row.into())
    }

    async fn update_tournament(
        &mut self,
        tournament: &mut Tournament,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE tournaments
            SET status = $2,
                participants = $3,
                bracket = $4,
                current_round = $5,
                winner = $6,
                award_percentage = $7,
                started_at = $8,
                completed_at = $9,
                cancelled_at = $10,
                cancellation_reason = $11,
                version = version + 1
            WHERE tournament_id = $1 AND version = $12
            "#,
        )
        .bind(tournament.tournament_id)
        .bind(tournament.status)
        .bind(Json(&tournament.participants))
        .bind(tournament.bracket.as_ref().map(Json))
        .bind(tournament.current_round)
        .bind(&tournament.winner)
        .bind(tournament.award_percentage)
        .bind(tournament.started_at)
        .bind(tournament.completed_at)
        .bind(tournament.cancelled_at)
        .bind(&tournament.cancellation_reason)
        .bind(tournament.version)
        .execute(&mut *self.inner)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::Conflict);
        }
        tournament.version += 1;

        Ok(())
    }

    async fn user(&mut self, user_id: &UserId) -> Result<Option<User>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM users WHERE user_id = $1 FOR UPDATE",
            USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .fetch_optional(&mut *self.inner)
            .await?;

        Ok(user)
    }

    async fn set_balance(&mut self, user_id: &UserId, balance: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET balance = $2
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(balance)
        .execute(&mut *self.inner)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::MissingUser(user_id.clone()));
        }

        Ok(())
    }

    async fn append_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, DatabaseError> {
        let sql = format!(
            r#"
            INSERT INTO transactions
                (user_id, transaction_type, amount, reason, balance_before, balance_after)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );
        let stored = sqlx::query_as::<_, Transaction>(&sql)
            .bind(&transaction.user_id)
            .bind(transaction.transaction_type)
            .bind(transaction.amount)
            .bind(&transaction.reason)
            .bind(transaction.balance_before)
            .bind(transaction.balance_after)
            .fetch_one(&mut *self.inner)
            .await?;

        Ok(stored)
    }

    async fn commit(self) -> Result<(), DatabaseError> {
        self.inner.commit().await?;
        Ok(())
    }
}
