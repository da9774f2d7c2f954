use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task;

use super::models::*;
use super::{Database, DatabaseError, DatabaseTransaction};

#[derive(Debug, Clone)]
struct StoredUser {
    user: User,
    version: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    tournaments: BTreeMap<i32, Tournament>,
    users: HashMap<UserId, StoredUser>,
    /// Kept in commit order.
    transactions: Vec<Transaction>,
    last_tournament_id: i32,
    last_transaction_id: i64,
}

/// A database that lives entirely in memory.
///
/// Transactions never hold the lock across an await. Instead they remember the version of
/// every tournament and user they read and check those versions again when committing, so a
/// transaction that raced with another one fails with [`DatabaseError::Conflict`] and leaves
/// nothing behind.
///
/// Reads of stored records yield to the scheduler first, the way a round trip to a real server
/// would, so concurrently running operations actually interleave.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Database for MemoryDatabase {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Transaction, DatabaseError> {
        Ok(MemoryTransaction {
            state: Arc::clone(&self.state),
            tournament_versions: HashMap::new(),
            user_versions: HashMap::new(),
            tournaments: HashMap::new(),
            inserted: Vec::new(),
            users: HashMap::new(),
            transactions: Vec::new(),
        })
    }

    async fn get_tournament(
        &self,
        tournament_id: i32,
    ) -> Result<Option<Tournament>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state.tournaments.get(&tournament_id).cloned())
    }

    async fn get_tournaments(
        &self,
        status: Option<TournamentStatus>,
    ) -> Result<Vec<Tournament>, DatabaseError> {
        let state = self.state.lock().await;
        let tournaments = state
            .tournaments
            .values()
            .rev()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        Ok(tournaments)
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state.users.get(user_id).map(|stored| stored.user.clone()))
    }

    async fn create_user(
        &self,
        user_id: &UserId,
        name: &str,
        is_admin: bool,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state.lock().await;
        if state.users.contains_key(user_id) {
            return Ok(false);
        }
        let mut user = User::new(user_id.clone(), name);
        user.is_admin = is_admin;
        state
            .users
            .insert(user_id.clone(), StoredUser { user, version: 0 });
        Ok(true)
    }

    async fn get_transactions(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let state = self.state.lock().await;
        let transactions = state
            .transactions
            .iter()
            .filter(|t| t.user_id == *user_id)
            .cloned()
            .collect();
        Ok(transactions)
    }
}

/// Staged reads and writes against a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    /// Version of each stored tournament when this transaction first read it.
    tournament_versions: HashMap<i32, i32>,
    user_versions: HashMap<UserId, u64>,
    tournaments: HashMap<i32, Tournament>,
    inserted: Vec<Tournament>,
    users: HashMap<UserId, User>,
    transactions: Vec<Transaction>,
}

impl DatabaseTransaction for MemoryTransaction {
    async fn tournament(
        &mut self,
        tournament_id: i32,
    ) -> Result<Option<Tournament>, DatabaseError> {
        if let Some(staged) = self.tournaments.get(&tournament_id) {
            return Ok(Some(staged.clone()));
        }
        if let Some(inserted) = self
            .inserted
            .iter()
            .find(|t| t.tournament_id == tournament_id)
        {
            return Ok(Some(inserted.clone()));
        }

        task::yield_now().await;
        let state = self.state.lock().await;
        let tournament = state.tournaments.get(&tournament_id).cloned();
        if let Some(ref t) = tournament {
            self.tournament_versions
                .entry(tournament_id)
                .or_insert(t.version);
        }
        Ok(tournament)
    }

    async fn tournament_name_exists(&mut self, name: &str) -> Result<bool, DatabaseError> {
        if self.inserted.iter().any(|t| t.name == name) {
            return Ok(true);
        }
        let state = self.state.lock().await;
        Ok(state.tournaments.values().any(|t| t.name == name))
    }

    async fn insert_tournament(
        &mut self,
        tournament: &NewTournament,
    ) -> Result<Tournament, DatabaseError> {
        let tournament_id = {
            let mut state = self.state.lock().await;
            state.last_tournament_id += 1;
            state.last_tournament_id
        };

        let created = Tournament {
            tournament_id,
            name: tournament.name.clone(),
            tournament_type: tournament.tournament_type,
            max_players: tournament.max_players,
            entry_cost: tournament.entry_cost,
            prize_pool: tournament.prize_pool,
            award_percentage: tournament.award_percentage,
            status: TournamentStatus::Registration,
            participants: Vec::new(),
            bracket: None,
            current_round: 0,
            winner: None,
            start_date: tournament.start_date,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            version: 0,
        };
        self.inserted.push(created.clone());
        Ok(created)
    }

    async fn update_tournament(
        &mut self,
        tournament: &mut Tournament,
    ) -> Result<(), DatabaseError> {
        let id = tournament.tournament_id;
        if let Some(inserted) = self.inserted.iter_mut().find(|t| t.tournament_id == id) {
            *inserted = tournament.clone();
            return Ok(());
        }

        let read_version = *self
            .tournament_versions
            .entry(id)
            .or_insert(tournament.version);
        let staged_version = self
            .tournaments
            .get(&id)
            .map(|t| t.version)
            .unwrap_or(read_version);
        if tournament.version != staged_version {
            return Err(DatabaseError::Conflict);
        }

        tournament.version += 1;
        self.tournaments.insert(id, tournament.clone());
        Ok(())
    }

    async fn user(&mut self, user_id: &UserId) -> Result<Option<User>, DatabaseError> {
        if let Some(staged) = self.users.get(user_id) {
            return Ok(Some(staged.clone()));
        }

        task::yield_now().await;
        let state = self.state.lock().await;
        let stored = state.users.get(user_id).cloned();
        Ok(stored.map(|stored| {
            self.user_versions
                .entry(user_id.clone())
                .or_insert(stored.version);
            stored.user
        }))
    }

    async fn set_balance(&mut self, user_id: &UserId, balance: i64) -> Result<(), DatabaseError> {
        let mut user = match self.user(user_id).await? {
            Some(user) => user,
            None => return Err(DatabaseError::MissingUser(user_id.clone())),
        };
        user.balance = balance;
        self.users.insert(user_id.clone(), user);
        Ok(())
    }

    async fn append_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Transaction, DatabaseError> {
        let transaction_id = {
            let mut state = self.state.lock().await;
            state.last_transaction_id += 1;
            state.last_transaction_id
        };

        let stored = Transaction {
            transaction_id,
            user_id: transaction.user_id,
            transaction_type: transaction.transaction_type,
            amount: transaction.amount,
            reason: transaction.reason,
            balance_before: transaction.balance_before,
            balance_after: transaction.balance_after,
            created_at: Utc::now(),
        };
        self.transactions.push(stored.clone());
        Ok(stored)
    }

    async fn commit(self) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().await;

        for (id, version) in &self.tournament_versions {
            if state.tournaments.get(id).map(|t| t.version) != Some(*version) {
                return Err(DatabaseError::Conflict);
            }
        }
        for (user_id, version) in &self.user_versions {
            if state.users.get(user_id).map(|u| u.version) != Some(*version) {
                return Err(DatabaseError::Conflict);
            }
        }
        for (index, created) in self.inserted.iter().enumerate() {
            let taken = state.tournaments.values().any(|t| t.name == created.name)
                || self.inserted[..index].iter().any(|t| t.name == created.name);
            if taken {
                return Err(DatabaseError::UniqueViolation);
            }
        }

        for tournament in self.inserted.into_iter().chain(self.tournaments.into_values()) {
            state.tournaments.insert(tournament.tournament_id, tournament);
        }
        for (user_id, user) in self.users {
            let version = state.users.get(&user_id).map_or(0, |u| u.version + 1);
            state.users.insert(user_id, StoredUser { user, version });
        }
        state.transactions.extend(self.transactions);

        Ok(())
    }
}
