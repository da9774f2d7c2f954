use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};

use crate::{
    bracket,
    commands::checks::is_admin,
    database::{
        models::{
            Actor, MatchStatus, NewTournament, Tournament, TournamentStatus, TransactionType,
            UserId,
        },
        Database, DatabaseError, DatabaseTransaction,
    },
    ledger::{credit_in, debit_in},
    log,
    utils::{error::CommonError, retry::with_retries},
};

/// Defines a model for managing tournaments.
///
/// Implementors of this trait own the lifecycle of a tournament:
/// `registration -> active -> completed`, with `cancelled` reachable from either of the first
/// two. Every operation either applies all of its effects, coins included, or none of them.
#[allow(async_fn_in_trait)]
pub trait TournamentModel {
    async fn create_tournament(
        &self,
        config: NewTournament,
        actor: &Actor,
    ) -> Result<Tournament, CommonError>;

    /// Registers the actor in a tournament, paying its entry cost. The join that fills the
    /// last slot also builds the bracket and activates the tournament.
    async fn join_tournament(
        &self,
        tournament_id: i32,
        actor: &Actor,
    ) -> Result<Tournament, CommonError>;

    async fn record_match(
        &self,
        tournament_id: i32,
        round_number: i32,
        match_index: usize,
        winner: &UserId,
        actor: &Actor,
    ) -> Result<Tournament, CommonError>;

    async fn cancel_tournament(
        &self,
        tournament_id: i32,
        reason: &str,
        actor: &Actor,
    ) -> Result<Cancellation, CommonError>;

    async fn set_award_percentage(
        &self,
        tournament_id: i32,
        award_percentage: i32,
        actor: &Actor,
    ) -> Result<Tournament, CommonError>;

    async fn get_tournament(&self, tournament_id: i32) -> Result<Tournament, CommonError>;

    async fn get_tournaments(
        &self,
        status: Option<TournamentStatus>,
    ) -> Result<Vec<Tournament>, CommonError>;
}

/// The result of cancelling a tournament.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cancellation {
    /// How many participants got their entry cost back.
    pub refunded_count: usize,
    pub tournament: Tournament,
}

/// Single elimination tournaments of 4 or 8 players.
#[derive(Debug, Clone)]
pub struct SingleElimTournament<DB> {
    database: DB,
    max_retries: u32,
}

impl<DB> SingleElimTournament<DB>
where
    DB: Database,
{
    pub fn new(database: DB, max_retries: u32) -> Self {
        Self {
            database,
            max_retries,
        }
    }

    async fn try_create(&self, config: &NewTournament) -> Result<Tournament, CommonError> {
        let duplicate = |error: DatabaseError| match error {
            DatabaseError::UniqueViolation => CommonError::DuplicateName(config.name.clone()),
            other => other.into(),
        };

        let mut tx = self.database.begin().await?;
        if tx.tournament_name_exists(&config.name).await? {
            return Err(CommonError::DuplicateName(config.name.clone()));
        }
        let tournament = tx.insert_tournament(config).await.map_err(duplicate)?;
        tx.commit().await.map_err(duplicate)?;

        Ok(tournament)
    }

    async fn try_join(&self, tournament_id: i32, user: &UserId) -> Result<Tournament, CommonError> {
        let mut tx = self.database.begin().await?;
        let mut tournament = load(&mut tx, tournament_id).await?;

        if tournament.status != TournamentStatus::Registration {
            return Err(CommonError::TournamentNotJoinable(tournament_id));
        }
        if tournament.has_participant(user) {
            return Err(CommonError::AlreadyRegistered(user.clone()));
        }
        if tournament.is_full() {
            return Err(CommonError::TournamentFull(tournament_id));
        }

        debit_in(
            &mut tx,
            user,
            tournament.entry_cost,
            TransactionType::TournamentEntry,
            &format!("tournament entry: {}", tournament.name),
        )
        .await?;
        tournament.participants.push(user.clone());

        if tournament.is_full() {
            tournament.bracket = Some(bracket::build(
                tournament.max_players,
                &tournament.participants,
            )?);
            tournament.status = TournamentStatus::Active;
            tournament.current_round = 1;
            tournament.started_at = Some(Utc::now());
        }

        tx.update_tournament(&mut tournament).await?;
        tx.commit().await?;

        Ok(tournament)
    }

    async fn try_record_match(
        &self,
        tournament_id: i32,
        round_number: i32,
        match_index: usize,
        winner: &UserId,
    ) -> Result<Tournament, CommonError> {
        let mut tx = self.database.begin().await?;
        let mut tournament = load(&mut tx, tournament_id).await?;

        if tournament.status != TournamentStatus::Active {
            return Err(CommonError::TournamentNotActive(tournament_id));
        }
        if round_number != tournament.current_round {
            return Err(CommonError::RoundMismatch {
                current: tournament.current_round,
                requested: round_number,
            });
        }

        let not_found = CommonError::MatchNotFound {
            round: round_number,
            match_index,
        };
        let current = tournament
            .bracket
            .as_mut()
            .ok_or(CommonError::BracketMissing(tournament_id))?;
        let round = match current.round_mut(round_number) {
            Some(round) => round,
            None => return Err(not_found),
        };
        let game = match round.matches.get_mut(match_index) {
            Some(game) => game,
            None => return Err(not_found),
        };

        if game.is_completed() {
            return Err(CommonError::MatchAlreadyCompleted {
                round: round_number,
                match_index,
            });
        }
        if !game.is_contested_by(winner) {
            return Err(CommonError::InvalidWinner(winner.clone()));
        }
        game.winner = Some(winner.clone());
        game.status = MatchStatus::Completed;

        if let Some(winners) = round.winners() {
            let advanced = bracket::advance(current, round_number, &winners)?;
            let has_next_round = advanced.round(round_number + 1).is_some();
            *current = advanced;

            if has_next_round {
                tournament.current_round += 1;
            } else {
                self.complete(&mut tx, &mut tournament, winner).await?;
            }
        }

        tx.update_tournament(&mut tournament).await?;
        tx.commit().await?;

        Ok(tournament)
    }

    /// Marks the tournament as won by `champion` and pays out the prize.
    async fn complete(
        &self,
        tx: &mut DB::Transaction,
        tournament: &mut Tournament,
        champion: &UserId,
    ) -> Result<(), CommonError> {
        tournament.status = TournamentStatus::Completed;
        tournament.winner = Some(champion.clone());
        tournament.completed_at = Some(Utc::now());

        let prize = tournament.prize();
        // A zero prize has nothing to record.
        if prize > 0 {
            credit_in(
                tx,
                champion,
                prize,
                TransactionType::TournamentWin,
                &format!("tournament prize: {}", tournament.name),
            )
            .await?;
        }

        Ok(())
    }

    async fn try_cancel(&self, tournament_id: i32, reason: &str) -> Result<Cancellation, CommonError> {
        let mut tx = self.database.begin().await?;
        let mut tournament = load(&mut tx, tournament_id).await?;

        if tournament.status.is_terminal() {
            return Err(CommonError::TournamentAlreadyTerminal(
                tournament_id,
                tournament.status,
            ));
        }

        let refund_reason = format!("tournament cancelled refund: {}", tournament.name);
        for participant in &tournament.participants {
            credit_in(
                &mut tx,
                participant,
                tournament.entry_cost,
                TransactionType::TournamentEntry,
                &refund_reason,
            )
            .await?;
        }

        tournament.status = TournamentStatus::Cancelled;
        tournament.cancelled_at = Some(Utc::now());
        tournament.cancellation_reason = Some(reason.to_string());

        tx.update_tournament(&mut tournament).await?;
        tx.commit().await?;

        Ok(Cancellation {
            refunded_count: tournament.participants.len(),
            tournament,
        })
    }

    async fn try_set_award_percentage(
        &self,
        tournament_id: i32,
        award_percentage: i32,
    ) -> Result<Tournament, CommonError> {
        let mut tx = self.database.begin().await?;
        let mut tournament = load(&mut tx, tournament_id).await?;

        match tournament.status {
            TournamentStatus::Registration => {}
            TournamentStatus::Active => {
                return Err(CommonError::TournamentAlreadyStarted(tournament_id))
            }
            status => return Err(CommonError::TournamentAlreadyTerminal(tournament_id, status)),
        }

        tournament.award_percentage = award_percentage;
        tx.update_tournament(&mut tournament).await?;
        tx.commit().await?;

        Ok(tournament)
    }
}

async fn load<T: DatabaseTransaction>(
    tx: &mut T,
    tournament_id: i32,
) -> Result<Tournament, CommonError> {
    tx.tournament(tournament_id)
        .await?
        .ok_or(CommonError::TournamentNotFound(tournament_id))
}

fn validate_award_percentage(award_percentage: i32) -> Result<(), CommonError> {
    if !(0..=100).contains(&award_percentage) {
        return Err(CommonError::InvalidConfiguration(format!(
            "award percentage must be between 0 and 100, got {}",
            award_percentage
        )));
    }
    Ok(())
}

fn validate(config: &NewTournament) -> Result<(), CommonError> {
    if config.name.is_empty() {
        return Err(CommonError::InvalidConfiguration(
            "name must not be empty".to_string(),
        ));
    }
    if bracket::total_rounds(config.max_players).is_none() {
        return Err(CommonError::InvalidConfiguration(format!(
            "max players must be 4 or 8, got {}",
            config.max_players
        )));
    }
    if config.entry_cost <= 0 {
        return Err(CommonError::InvalidConfiguration(format!(
            "entry cost must be positive, got {}",
            config.entry_cost
        )));
    }
    if config.prize_pool <= 0 {
        return Err(CommonError::InvalidConfiguration(format!(
            "prize pool must be positive, got {}",
            config.prize_pool
        )));
    }
    validate_award_percentage(config.award_percentage)
}

impl<DB> TournamentModel for SingleElimTournament<DB>
where
    DB: Database,
{
    #[instrument(skip(self))]
    async fn create_tournament(
        &self,
        mut config: NewTournament,
        actor: &Actor,
    ) -> Result<Tournament, CommonError> {
        is_admin(actor)?;
        config.name = config.name.trim().to_string();
        validate(&config)?;

        let config = &config;
        let tournament = with_retries("create_tournament", self.max_retries, move || {
            self.try_create(config)
        })
        .await?;

        info!(
            "Tournament {} created with id {}",
            tournament.name, tournament.tournament_id
        );
        log::log_info(
            "Tournament created",
            vec![
                ("Tournament ID", tournament.tournament_id.to_string()),
                ("Name", tournament.name.clone()),
                ("Max players", tournament.max_players.to_string()),
                ("Entry cost", tournament.entry_cost.to_string()),
                ("Prize pool", tournament.prize_pool.to_string()),
                ("Created by", actor.user_id.to_string()),
            ],
        );
        Ok(tournament)
    }

    #[instrument(skip(self))]
    async fn join_tournament(
        &self,
        tournament_id: i32,
        actor: &Actor,
    ) -> Result<Tournament, CommonError> {
        let user = &actor.user_id;
        let tournament = with_retries("join_tournament", self.max_retries, move || {
            self.try_join(tournament_id, user)
        })
        .await?;

        info!(
            "User {} joined tournament {} ({}/{})",
            user,
            tournament_id,
            tournament.participants.len(),
            tournament.max_players
        );
        if tournament.status == TournamentStatus::Active {
            log::log_info(
                "Tournament started",
                vec![
                    ("Tournament ID", tournament_id.to_string()),
                    ("Name", tournament.name.clone()),
                    ("Players", tournament.participants.len().to_string()),
                ],
            );
        }
        Ok(tournament)
    }

    #[instrument(skip(self))]
    async fn record_match(
        &self,
        tournament_id: i32,
        round_number: i32,
        match_index: usize,
        winner: &UserId,
        actor: &Actor,
    ) -> Result<Tournament, CommonError> {
        is_admin(actor)?;

        let tournament = with_retries("record_match", self.max_retries, move || {
            self.try_record_match(tournament_id, round_number, match_index, winner)
        })
        .await?;

        info!(
            "Recorded {} as the winner of match {} in round {} of tournament {}",
            winner, match_index, round_number, tournament_id
        );
        if tournament.status == TournamentStatus::Completed {
            log::log_info(
                "Tournament completed",
                vec![
                    ("Tournament ID", tournament_id.to_string()),
                    ("Name", tournament.name.clone()),
                    ("Winner", winner.to_string()),
                    ("Prize", tournament.prize().to_string()),
                ],
            );
        }
        Ok(tournament)
    }

    #[instrument(skip(self))]
    async fn cancel_tournament(
        &self,
        tournament_id: i32,
        reason: &str,
        actor: &Actor,
    ) -> Result<Cancellation, CommonError> {
        is_admin(actor)?;

        let cancellation = with_retries("cancel_tournament", self.max_retries, move || {
            self.try_cancel(tournament_id, reason)
        })
        .await?;

        info!(
            "Tournament {} cancelled, refunded {} participants",
            tournament_id, cancellation.refunded_count
        );
        log::log_info(
            "Tournament cancelled",
            vec![
                ("Tournament ID", tournament_id.to_string()),
                ("Name", cancellation.tournament.name.clone()),
                ("Reason", reason.to_string()),
                ("Refunded", cancellation.refunded_count.to_string()),
                ("Cancelled by", actor.user_id.to_string()),
            ],
        );
        Ok(cancellation)
    }

    #[instrument(skip(self))]
    async fn set_award_percentage(
        &self,
        tournament_id: i32,
        award_percentage: i32,
        actor: &Actor,
    ) -> Result<Tournament, CommonError> {
        is_admin(actor)?;
        validate_award_percentage(award_percentage)?;

        let tournament = with_retries("set_award_percentage", self.max_retries, move || {
            self.try_set_award_percentage(tournament_id, award_percentage)
        })
        .await?;

        info!(
            "Award percentage of tournament {} set to {}",
            tournament_id, award_percentage
        );
        Ok(tournament)
    }

    async fn get_tournament(&self, tournament_id: i32) -> Result<Tournament, CommonError> {
        self.database
            .get_tournament(tournament_id)
            .await?
            .ok_or(CommonError::TournamentNotFound(tournament_id))
    }

    async fn get_tournaments(
        &self,
        status: Option<TournamentStatus>,
    ) -> Result<Vec<Tournament>, CommonError> {
        Ok(self.database.get_tournaments(status).await?)
    }
}
