use serde::Deserialize;
use strum::VariantNames;

use super::{CommandsContainer, Reply};
use crate::{
    commands::checks::is_self_or_admin,
    database::{
        models::{Actor, TournamentStatus, UserId},
        Database,
    },
    tournament_model::TournamentModel,
    utils::error::CommonError,
    Data,
};

/// CommandsContainer for the User commands
pub struct UserCommands;

/// Commands that any registered user may run.
#[derive(Debug, Clone, Deserialize, VariantNames)]
#[serde(tag = "command", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UserCommand {
    JoinTournament {
        tournament_id: i32,
    },
    Tournament {
        tournament_id: i32,
    },
    Tournaments {
        #[serde(default)]
        status: Option<TournamentStatus>,
    },
    /// Defaults to the actor's own balance.
    Balance {
        #[serde(default)]
        user_id: Option<UserId>,
    },
    History {
        #[serde(default)]
        user_id: Option<UserId>,
    },
}

impl CommandsContainer for UserCommands {
    type Command = UserCommand;

    async fn run<DB: Database>(
        data: &Data<DB>,
        actor: &Actor,
        command: Self::Command,
    ) -> Result<Reply, CommonError> {
        match command {
            UserCommand::JoinTournament { tournament_id } => data
                .tournament_model
                .join_tournament(tournament_id, actor)
                .await
                .map(Reply::Tournament),
            UserCommand::Tournament { tournament_id } => data
                .tournament_model
                .get_tournament(tournament_id)
                .await
                .map(Reply::Tournament),
            UserCommand::Tournaments { status } => data
                .tournament_model
                .get_tournaments(status)
                .await
                .map(Reply::Tournaments),
            UserCommand::Balance { user_id } => {
                let user_id = user_id.unwrap_or_else(|| actor.user_id.clone());
                is_self_or_admin(actor, &user_id)?;
                let balance = data.ledger.balance(&user_id).await?;
                Ok(Reply::Balance { user_id, balance })
            }
            UserCommand::History { user_id } => {
                let user_id = user_id.unwrap_or_else(|| actor.user_id.clone());
                is_self_or_admin(actor, &user_id)?;
                data.ledger.history(&user_id).await.map(Reply::Transactions)
            }
        }
    }
}
