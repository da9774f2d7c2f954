use serde::Deserialize;
use strum::VariantNames;
use tracing::{info, instrument};

use super::{CommandsContainer, Reply};
use crate::{
    commands::checks::is_admin,
    database::{
        models::{Actor, NewTournament, TransactionType, UserId},
        Database,
    },
    log,
    tournament_model::TournamentModel,
    utils::error::CommonError,
    Data,
};

/// CommandsContainer for the admin commands.
pub struct ManagerCommands;

/// Commands that only admins may run.
#[derive(Debug, Clone, Deserialize, VariantNames)]
#[serde(tag = "command", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ManagerCommand {
    CreateTournament(NewTournament),
    RecordMatch {
        tournament_id: i32,
        round_number: i32,
        match_index: usize,
        winner: UserId,
    },
    CancelTournament {
        tournament_id: i32,
        reason: String,
    },
    SetAwardPercentage {
        tournament_id: i32,
        award_percentage: i32,
    },
    RegisterUser {
        user_id: UserId,
        name: String,
        #[serde(default)]
        is_admin: bool,
    },
    AddCoins {
        user_id: UserId,
        amount: i64,
        reason: String,
    },
    RemoveCoins {
        user_id: UserId,
        amount: i64,
        reason: String,
    },
    RecordPurchase {
        user_id: UserId,
        amount: i64,
        reason: String,
    },
}

impl CommandsContainer for ManagerCommands {
    type Command = ManagerCommand;

    async fn run<DB: Database>(
        data: &Data<DB>,
        actor: &Actor,
        command: Self::Command,
    ) -> Result<Reply, CommonError> {
        match command {
            ManagerCommand::CreateTournament(config) => data
                .tournament_model
                .create_tournament(config, actor)
                .await
                .map(Reply::Tournament),
            ManagerCommand::RecordMatch {
                tournament_id,
                round_number,
                match_index,
                winner,
            } => data
                .tournament_model
                .record_match(tournament_id, round_number, match_index, &winner, actor)
                .await
                .map(Reply::Tournament),
            ManagerCommand::CancelTournament {
                tournament_id,
                reason,
            } => data
                .tournament_model
                .cancel_tournament(tournament_id, &reason, actor)
                .await
                .map(Reply::Cancellation),
            ManagerCommand::SetAwardPercentage {
                tournament_id,
                award_percentage,
            } => data
                .tournament_model
                .set_award_percentage(tournament_id, award_percentage, actor)
                .await
                .map(Reply::Tournament),
            ManagerCommand::RegisterUser {
                user_id,
                name,
                is_admin,
            } => register_user(data, actor, &user_id, &name, is_admin).await,
            ManagerCommand::AddCoins {
                user_id,
                amount,
                reason,
            } => adjust_balance(data, actor, &user_id, amount, TransactionType::AdminAdd, &reason)
                .await,
            ManagerCommand::RemoveCoins {
                user_id,
                amount,
                reason,
            } => {
                adjust_balance(
                    data,
                    actor,
                    &user_id,
                    amount,
                    TransactionType::AdminRemove,
                    &reason,
                )
                .await
            }
            ManagerCommand::RecordPurchase {
                user_id,
                amount,
                reason,
            } => {
                adjust_balance(
                    data,
                    actor,
                    &user_id,
                    amount,
                    TransactionType::CoinPurchase,
                    &reason,
                )
                .await
            }
        }
    }
}

/// Create a player account with an empty balance.
///
/// Registering an id that already exists changes nothing and returns the existing account.
#[instrument(skip(data))]
async fn register_user<DB: Database>(
    data: &Data<DB>,
    actor: &Actor,
    user_id: &UserId,
    name: &str,
    admin: bool,
) -> Result<Reply, CommonError> {
    is_admin(actor)?;

    let name = name.trim();
    if user_id.as_str().trim().is_empty() || name.is_empty() {
        return Err(CommonError::InvalidRequest(
            "user id and name must not be empty".to_string(),
        ));
    }

    if data.database.create_user(user_id, name, admin).await? {
        info!("Registered user {}", user_id);
        log::log_info(
            "User registered",
            vec![
                ("User", user_id.to_string()),
                ("Name", name.to_string()),
                ("Admin", admin.to_string()),
                ("Registered by", actor.user_id.to_string()),
            ],
        );
    }

    data.database
        .get_user(user_id)
        .await?
        .map(Reply::User)
        .ok_or_else(|| CommonError::UserNotFound(user_id.clone()))
}

/// Add or remove coins outside of any tournament.
#[instrument(skip(data))]
async fn adjust_balance<DB: Database>(
    data: &Data<DB>,
    actor: &Actor,
    user_id: &UserId,
    amount: i64,
    transaction_type: TransactionType,
    reason: &str,
) -> Result<Reply, CommonError> {
    is_admin(actor)?;

    let transaction = match transaction_type {
        TransactionType::AdminRemove => {
            data.ledger
                .debit(user_id, amount, transaction_type, reason)
                .await?
        }
        _ => {
            data.ledger
                .credit(user_id, amount, transaction_type, reason)
                .await?
        }
    };

    log::log_info(
        "Balance adjusted",
        vec![
            ("User", user_id.to_string()),
            ("Type", transaction_type.to_string()),
            ("Amount", transaction.amount.to_string()),
            ("Balance", transaction.balance_after.to_string()),
            ("Reason", reason.to_string()),
            ("Adjusted by", actor.user_id.to_string()),
        ],
    );
    Ok(Reply::Transaction(transaction))
}
