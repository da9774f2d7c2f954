use tracing::{info, instrument};

use crate::database::models::{NewTransaction, Transaction, TransactionType, User, UserId};
use crate::database::{Database, DatabaseTransaction};
use crate::utils::error::CommonError;
use crate::utils::retry::with_retries;

/// Takes `amount` coins from a user inside an open transaction.
///
/// Fails with [`CommonError::InsufficientFunds`] without touching anything if the balance is
/// too low. The balance change and its ledger entry are only visible once the transaction
/// commits.
pub async fn debit_in<T: DatabaseTransaction>(
    tx: &mut T,
    user_id: &UserId,
    amount: i64,
    transaction_type: TransactionType,
    reason: &str,
) -> Result<Transaction, CommonError> {
    if amount <= 0 {
        return Err(CommonError::InvalidAmount(amount));
    }
    let user = load_user(tx, user_id).await?;
    if user.balance < amount {
        return Err(CommonError::InsufficientFunds {
            user: user_id.clone(),
            balance: user.balance,
            required: amount,
        });
    }
    apply(tx, &user, -amount, transaction_type, reason).await
}

/// Gives `amount` coins to a user inside an open transaction.
pub async fn credit_in<T: DatabaseTransaction>(
    tx: &mut T,
    user_id: &UserId,
    amount: i64,
    transaction_type: TransactionType,
    reason: &str,
) -> Result<Transaction, CommonError> {
    if amount <= 0 {
        return Err(CommonError::InvalidAmount(amount));
    }
    let user = load_user(tx, user_id).await?;
    apply(tx, &user, amount, transaction_type, reason).await
}

async fn load_user<T: DatabaseTransaction>(
    tx: &mut T,
    user_id: &UserId,
) -> Result<User, CommonError> {
    tx.user(user_id)
        .await?
        .ok_or_else(|| CommonError::UserNotFound(user_id.clone()))
}

async fn apply<T: DatabaseTransaction>(
    tx: &mut T,
    user: &User,
    signed_amount: i64,
    transaction_type: TransactionType,
    reason: &str,
) -> Result<Transaction, CommonError> {
    let balance_after = user
        .balance
        .checked_add(signed_amount)
        .ok_or(CommonError::InvalidAmount(signed_amount))?;

    tx.set_balance(&user.user_id, balance_after).await?;
    let transaction = tx
        .append_transaction(NewTransaction {
            user_id: user.user_id.clone(),
            transaction_type,
            amount: signed_amount,
            reason: reason.to_string(),
            balance_before: user.balance,
            balance_after,
        })
        .await?;

    Ok(transaction)
}

/// Coin balances and their audit trail.
///
/// Each call here is its own atomicity unit. Operations that have to move coins together with
/// other state use [`debit_in`] and [`credit_in`] inside their own transaction instead.
#[derive(Debug, Clone)]
pub struct Ledger<DB> {
    database: DB,
    max_retries: u32,
}

impl<DB> Ledger<DB>
where
    DB: Database,
{
    pub fn new(database: DB, max_retries: u32) -> Self {
        Self {
            database,
            max_retries,
        }
    }

    #[instrument(skip(self))]
    pub async fn debit(
        &self,
        user_id: &UserId,
        amount: i64,
        transaction_type: TransactionType,
        reason: &str,
    ) -> Result<Transaction, CommonError> {
        let transaction = with_retries("debit", self.max_retries, move || {
            self.try_debit(user_id, amount, transaction_type, reason)
        })
        .await?;

        info!(
            "Debited {} coins from {} ({}), balance is now {}",
            amount, user_id, transaction_type, transaction.balance_after
        );
        Ok(transaction)
    }

    #[instrument(skip(self))]
    pub async fn credit(
        &self,
        user_id: &UserId,
        amount: i64,
        transaction_type: TransactionType,
        reason: &str,
    ) -> Result<Transaction, CommonError> {
        let transaction = with_retries("credit", self.max_retries, move || {
            self.try_credit(user_id, amount, transaction_type, reason)
        })
        .await?;

        info!(
            "Credited {} coins to {} ({}), balance is now {}",
            amount, user_id, transaction_type, transaction.balance_after
        );
        Ok(transaction)
    }

    async fn try_debit(
        &self,
        user_id: &UserId,
        amount: i64,
        transaction_type: TransactionType,
        reason: &str,
    ) -> Result<Transaction, CommonError> {
        let mut tx = self.database.begin().await?;
        let transaction = debit_in(&mut tx, user_id, amount, transaction_type, reason).await?;
        tx.commit().await?;
        Ok(transaction)
    }

    async fn try_credit(
        &self,
        user_id: &UserId,
        amount: i64,
        transaction_type: TransactionType,
        reason: &str,
    ) -> Result<Transaction, CommonError> {
        let mut tx = self.database.begin().await?;
        let transaction = credit_in(&mut tx, user_id, amount, transaction_type, reason).await?;
        tx.commit().await?;
        Ok(transaction)
    }

    pub async fn balance(&self, user_id: &UserId) -> Result<i64, CommonError> {
        self.database
            .get_user(user_id)
            .await?
            .map(|user| user.balance)
            .ok_or_else(|| CommonError::UserNotFound(user_id.clone()))
    }

    /// All ledger entries of a user, oldest first.
    pub async fn history(&self, user_id: &UserId) -> Result<Vec<Transaction>, CommonError> {
        if self.database.get_user(user_id).await?.is_none() {
            return Err(CommonError::UserNotFound(user_id.clone()));
        }
        Ok(self.database.get_transactions(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;

    use super::*;
    use crate::database::memory::MemoryDatabase;

    async fn ledger_with_user(name: &str, balance: i64) -> (Ledger<MemoryDatabase>, UserId) {
        let db = MemoryDatabase::new();
        let user_id = UserId::from(name);
        db.create_user(&user_id, name, false).await.unwrap();
        let ledger = Ledger::new(db, 3);
        if balance > 0 {
            ledger
                .credit(&user_id, balance, TransactionType::CoinPurchase, "seed")
                .await
                .unwrap();
        }
        (ledger, user_id)
    }

    #[tokio::test]
    async fn balance_follows_signed_amounts() {
        let (ledger, alice) = ledger_with_user("alice", 500).await;

        ledger
            .debit(&alice, 120, TransactionType::TournamentEntry, "entry")
            .await
            .unwrap();
        ledger
            .credit(&alice, 400, TransactionType::TournamentWin, "prize")
            .await
            .unwrap();
        ledger
            .debit(&alice, 30, TransactionType::AdminRemove, "correction")
            .await
            .unwrap();

        let history = ledger.history(&alice).await.unwrap();
        let total: i64 = history.iter().map(|t| t.amount).sum();
        assert_eq!(ledger.balance(&alice).await.unwrap(), total);
        assert_eq!(ledger.balance(&alice).await.unwrap(), 750);

        assert_eq!(history[0].balance_before, 0);
        for pair in history.windows(2) {
            assert_eq!(pair[0].balance_after, pair[1].balance_before);
        }
        assert_eq!(history[1].amount, -120);
        assert_eq!(history[1].transaction_type, TransactionType::TournamentEntry);
    }

    #[tokio::test]
    async fn insufficient_funds_changes_nothing() {
        let (ledger, alice) = ledger_with_user("alice", 50).await;

        let result = ledger
            .debit(&alice, 100, TransactionType::TournamentEntry, "entry")
            .await;

        assert!(matches!(
            result,
            Err(CommonError::InsufficientFunds {
                balance: 50,
                required: 100,
                ..
            })
        ));
        assert_eq!(ledger.balance(&alice).await.unwrap(), 50);
        assert_eq!(ledger.history(&alice).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_non_positive_amounts() {
        let (ledger, alice) = ledger_with_user("alice", 50).await;

        for amount in [0, -10] {
            assert!(matches!(
                ledger
                    .credit(&alice, amount, TransactionType::AdminAdd, "bad")
                    .await,
                Err(CommonError::InvalidAmount(_))
            ));
            assert!(matches!(
                ledger
                    .debit(&alice, amount, TransactionType::AdminRemove, "bad")
                    .await,
                Err(CommonError::InvalidAmount(_))
            ));
        }
        assert_eq!(ledger.balance(&alice).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn unknown_user_is_reported() {
        let (ledger, _) = ledger_with_user("alice", 0).await;
        let ghost = UserId::from("ghost");

        assert!(matches!(
            ledger
                .credit(&ghost, 10, TransactionType::AdminAdd, "gift")
                .await,
            Err(CommonError::UserNotFound(_))
        ));
        assert!(matches!(
            ledger.history(&ghost).await,
            Err(CommonError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_debits_never_double_spend() {
        let (ledger, alice) = ledger_with_user("alice", 100).await;

        let results = join_all((0..3).map(|_| {
            ledger.debit(&alice, 60, TransactionType::TournamentEntry, "entry")
        }))
        .await;

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, CommonError::InsufficientFunds { .. })));
        assert_eq!(ledger.balance(&alice).await.unwrap(), 40);
        assert_eq!(ledger.history(&alice).await.unwrap().len(), 2);
    }
}
