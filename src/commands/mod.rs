pub mod checks;
pub mod manager_commands;
pub mod user_commands;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use strum::VariantNames;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{error, info, instrument};

use crate::{
    config::AdminSeed,
    database::{
        models::{Actor, Tournament, Transaction, TransactionType, User, UserId},
        Database,
    },
    log,
    tournament_model::Cancellation,
    utils::error::CommonError,
    AppError, Data,
};

use manager_commands::ManagerCommands;
use user_commands::UserCommands;

/// A way to group commands together.
///
/// Implementors of this trait declare the commands they understand as a serde enum tagged by
/// `command`, and run them once a request has been parsed. Typically, you would group commands
/// by their required permissions.
///
/// For example, you can define a type to group a single admin-only command.
/// ```ignore
/// pub struct ManagerCommands;
///
/// #[derive(Deserialize, VariantNames)]
/// #[serde(tag = "command", rename_all = "snake_case")]
/// #[strum(serialize_all = "snake_case")]
/// pub enum ManagerCommand {
///     CancelTournament { tournament_id: i32, reason: String },
/// }
///
/// impl CommandsContainer for ManagerCommands {
///     type Command = ManagerCommand;
///
///     async fn run<DB: Database>(
///         data: &Data<DB>,
///         actor: &Actor,
///         command: Self::Command,
///     ) -> Result<Reply, CommonError> {
///         let ManagerCommand::CancelTournament { tournament_id, reason } = command;
///         data.tournament_model
///             .cancel_tournament(tournament_id, &reason, actor)
///             .await
///             .map(Reply::Cancellation)
///     }
/// }
/// ```
#[allow(async_fn_in_trait)]
pub trait CommandsContainer {
    type Command: DeserializeOwned + VariantNames;

    /// Names of every command in this container, as they appear in requests.
    fn get_all() -> &'static [&'static str] {
        <Self::Command as VariantNames>::VARIANTS
    }

    async fn run<DB: Database>(
        data: &Data<DB>,
        actor: &Actor,
        command: Self::Command,
    ) -> Result<Reply, CommonError>;
}

/// The part of a request every command shares.
#[derive(Debug, Deserialize)]
struct Request {
    actor: UserId,
    command: String,
}

/// The payload of a successful command.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Tournament(Tournament),
    Tournaments(Vec<Tournament>),
    Cancellation(Cancellation),
    Transaction(Transaction),
    Transactions(Vec<Transaction>),
    Balance { user_id: UserId, balance: i64 },
    User(User),
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// One line of console output.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Reply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    fn success(reply: Reply) -> Self {
        Self {
            ok: true,
            data: Some(reply),
            error: None,
        }
    }

    fn failure(error: &CommonError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                kind: error.kind().to_string(),
                message: error.to_string(),
            }),
        }
    }
}

/// Runs one JSON request and produces its response.
///
/// Never fails: every error, including malformed input, becomes an error response.
pub async fn handle_line<DB: Database>(data: &Data<DB>, line: &str) -> Response {
    let (request, value) = match parse_request(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("Rejected malformed request: {}", e);
            return Response::failure(&e);
        }
    };

    match execute(data, &request, value).await {
        Ok(reply) => Response::success(reply),
        Err(e) => {
            error!("Error in command {}: {}", request.command, e);
            log::log_error(
                &e.to_string(),
                vec![
                    ("Cause", e.kind().to_string()),
                    ("Command", request.command.clone()),
                    ("User", request.actor.to_string()),
                ],
            );
            Response::failure(&e)
        }
    }
}

fn parse_request(line: &str) -> Result<(Request, Value), CommonError> {
    let invalid = |e: serde_json::Error| CommonError::InvalidRequest(e.to_string());

    let value: Value = serde_json::from_str(line).map_err(invalid)?;
    let request = Request::deserialize(&value).map_err(invalid)?;
    Ok((request, value))
}

fn parse_command<C: DeserializeOwned>(value: Value) -> Result<C, CommonError> {
    serde_json::from_value(value).map_err(|e| CommonError::InvalidRequest(e.to_string()))
}

#[instrument(skip(data, value))]
async fn execute<DB: Database>(
    data: &Data<DB>,
    request: &Request,
    value: Value,
) -> Result<Reply, CommonError> {
    let actor = data
        .database
        .get_user(&request.actor)
        .await?
        .ok_or_else(|| CommonError::UserNotFound(request.actor.clone()))?
        .actor();

    let name = request.command.as_str();
    if ManagerCommands::get_all().contains(&name) {
        ManagerCommands::run(data, &actor, parse_command(value)?).await
    } else if UserCommands::get_all().contains(&name) {
        UserCommands::run(data, &actor, parse_command(value)?).await
    } else {
        Err(CommonError::InvalidRequest(format!("unknown command {}", name)))
    }
}

/// Serves requests line by line until the input is closed.
pub async fn run_console<DB, R, W>(
    data: &Data<DB>,
    reader: R,
    mut writer: W,
) -> Result<(), AppError>
where
    DB: Database,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(data, &line).await;
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;
    }

    info!("Console input closed");
    Ok(())
}

/// Creates the configured admin account unless it already exists.
///
/// The starting balance is credited through the ledger, and only when the account is new.
pub async fn seed_admin<DB: Database>(data: &Data<DB>, seed: &AdminSeed) -> Result<(), CommonError> {
    if !data
        .database
        .create_user(&seed.user_id, &seed.name, true)
        .await?
    {
        info!("Admin {} already exists", seed.user_id);
        return Ok(());
    }

    if seed.balance > 0 {
        data.ledger
            .credit(
                &seed.user_id,
                seed.balance,
                TransactionType::AdminAdd,
                "initial admin balance",
            )
            .await?;
    }

    log::log_info(
        "Admin account created",
        vec![
            ("User", seed.user_id.to_string()),
            ("Name", seed.name.clone()),
            ("Balance", seed.balance.to_string()),
        ],
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::database::memory::MemoryDatabase;

    async fn seeded() -> Data<MemoryDatabase> {
        let data = Data::new(MemoryDatabase::new(), 3);
        seed_admin(
            &data,
            &AdminSeed {
                user_id: UserId::from("root"),
                name: "Root".to_string(),
                balance: 1_000,
            },
        )
        .await
        .unwrap();
        data
    }

    async fn console(data: &Data<MemoryDatabase>, requests: &[Value]) -> Vec<Value> {
        let input = requests
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        let mut output = Vec::new();
        run_console(data, input.as_bytes(), &mut output)
            .await
            .unwrap();

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    async fn send(data: &Data<MemoryDatabase>, request: Value) -> Value {
        console(data, &[request]).await.remove(0)
    }

    fn error_kind(response: &Value) -> &str {
        assert_eq!(response["ok"], json!(false), "{}", response);
        response["error"]["kind"].as_str().unwrap()
    }

    async fn register_players(data: &Data<MemoryDatabase>, names: &[&str], coins: i64) {
        let mut requests = Vec::new();
        for name in names {
            requests.push(json!({
                "actor": "root",
                "command": "register_user",
                "user_id": name,
                "name": name,
            }));
            requests.push(json!({
                "actor": "root",
                "command": "record_purchase",
                "user_id": name,
                "amount": coins,
                "reason": "starter pack",
            }));
        }
        for response in console(data, &requests).await {
            assert_eq!(response["ok"], json!(true), "{}", response);
        }
    }

    #[tokio::test]
    async fn seeding_the_admin_is_idempotent() {
        let data = seeded().await;
        seed_admin(
            &data,
            &AdminSeed {
                user_id: UserId::from("root"),
                name: "Root".to_string(),
                balance: 1_000,
            },
        )
        .await
        .unwrap();

        let response = send(&data, json!({"actor": "root", "command": "history"})).await;
        let history = response["data"].as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["transaction_type"], json!("admin_add"));
        assert_eq!(history[0]["balance_after"], json!(1_000));
    }

    #[tokio::test]
    async fn runs_a_tournament_end_to_end() {
        let data = seeded().await;
        let players = ["alice", "bob", "carol", "dave"];
        register_players(&data, &players, 250).await;

        let created = send(
            &data,
            json!({
                "actor": "root",
                "command": "create_tournament",
                "name": "Friday Cup",
                "max_players": 4,
                "entry_cost": 100,
                "prize_pool": 500,
            }),
        )
        .await;
        assert_eq!(created["ok"], json!(true), "{}", created);
        assert_eq!(created["data"]["status"], json!("registration"));
        assert_eq!(created["data"]["award_percentage"], json!(80));
        let id = created["data"]["tournament_id"].clone();

        let joins: Vec<Value> = players
            .iter()
            .map(|p| json!({"actor": p, "command": "join_tournament", "tournament_id": id}))
            .collect();
        let responses = console(&data, &joins).await;
        let started = &responses[3]["data"];
        assert_eq!(started["status"], json!("active"));
        assert_eq!(started["current_round"], json!(1));
        assert_eq!(started["bracket"]["rounds"][1]["name"], json!("Final"));

        let results = [
            json!({"round_number": 1, "match_index": 0, "winner": "alice"}),
            json!({"round_number": 1, "match_index": 1, "winner": "dave"}),
            json!({"round_number": 2, "match_index": 0, "winner": "dave"}),
        ];
        let requests: Vec<Value> = results
            .iter()
            .map(|result| {
                let mut request = json!({
                    "actor": "root",
                    "command": "record_match",
                    "tournament_id": id,
                });
                for (key, value) in result.as_object().unwrap() {
                    request[key] = value.clone();
                }
                request
            })
            .collect();
        let responses = console(&data, &requests).await;
        let finished = &responses[2]["data"];
        assert_eq!(finished["status"], json!("completed"));
        assert_eq!(finished["winner"], json!("dave"));

        let balance = send(&data, json!({"actor": "dave", "command": "balance"})).await;
        assert_eq!(balance["data"]["balance"], json!(150 + 400));
        let balance = send(&data, json!({"actor": "alice", "command": "balance"})).await;
        assert_eq!(balance["data"]["balance"], json!(150));

        let listed = send(
            &data,
            json!({"actor": "bob", "command": "tournaments", "status": "completed"}),
        )
        .await;
        assert_eq!(listed["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_reports_refunds() {
        let data = seeded().await;
        register_players(&data, &["alice", "bob"], 100).await;

        let created = send(
            &data,
            json!({
                "actor": "root",
                "command": "create_tournament",
                "name": "Rainy Day",
                "max_players": 8,
                "entry_cost": 100,
                "prize_pool": 1000,
            }),
        )
        .await;
        let id = created["data"]["tournament_id"].clone();
        for player in ["alice", "bob"] {
            send(
                &data,
                json!({"actor": player, "command": "join_tournament", "tournament_id": id}),
            )
            .await;
        }

        let cancelled = send(
            &data,
            json!({
                "actor": "root",
                "command": "cancel_tournament",
                "tournament_id": id,
                "reason": "storm",
            }),
        )
        .await;

        assert_eq!(cancelled["data"]["refunded_count"], json!(2));
        assert_eq!(cancelled["data"]["tournament"]["status"], json!("cancelled"));
        let balance = send(&data, json!({"actor": "bob", "command": "balance"})).await;
        assert_eq!(balance["data"]["balance"], json!(100));
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected() {
        let data = seeded().await;

        let responses = console(
            &data,
            &[
                json!("not an object"),
                json!({"command": "balance"}),
                json!({"actor": "root", "command": "launch_rockets"}),
                json!({"actor": "root", "command": "join_tournament"}),
                json!({
                    "actor": "root",
                    "command": "record_match",
                    "tournament_id": 1,
                    "round_number": 1,
                    "match_index": -1,
                    "winner": "root",
                }),
            ],
        )
        .await;

        assert_eq!(responses.len(), 5);
        for response in &responses {
            assert_eq!(error_kind(response), "InvalidRequest");
        }
    }

    #[tokio::test]
    async fn blank_lines_are_skipped_and_bad_json_answered() {
        let data = seeded().await;
        let mut output = Vec::new();

        run_console(&data, "\n{oops\n\n".as_bytes(), &mut output)
            .await
            .unwrap();

        let output = String::from_utf8(output).unwrap();
        let responses: Vec<Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(responses.len(), 1);
        assert_eq!(error_kind(&responses[0]), "InvalidRequest");
    }

    #[tokio::test]
    async fn unknown_actors_are_rejected() {
        let data = seeded().await;

        let response = send(&data, json!({"actor": "stranger", "command": "balance"})).await;
        assert_eq!(error_kind(&response), "UserNotFound");
    }

    #[tokio::test]
    async fn players_cannot_run_admin_commands() {
        let data = seeded().await;
        register_players(&data, &["alice", "bob"], 100).await;

        let responses = console(
            &data,
            &[
                json!({
                    "actor": "alice",
                    "command": "add_coins",
                    "user_id": "alice",
                    "amount": 1_000_000,
                    "reason": "please",
                }),
                json!({
                    "actor": "alice",
                    "command": "create_tournament",
                    "name": "Mine",
                    "max_players": 4,
                    "entry_cost": 1,
                    "prize_pool": 1,
                }),
                json!({
                    "actor": "alice",
                    "command": "register_user",
                    "user_id": "sock",
                    "name": "Sock Puppet",
                }),
                json!({"actor": "alice", "command": "balance", "user_id": "bob"}),
            ],
        )
        .await;

        for response in &responses {
            assert_eq!(error_kind(response), "Unauthorized");
        }
        let balance = send(&data, json!({"actor": "alice", "command": "balance"})).await;
        assert_eq!(balance["data"]["balance"], json!(100));
    }

    #[tokio::test]
    async fn removing_coins_respects_the_balance() {
        let data = seeded().await;
        register_players(&data, &["alice"], 100).await;

        let response = send(
            &data,
            json!({
                "actor": "root",
                "command": "remove_coins",
                "user_id": "alice",
                "amount": 150,
                "reason": "chargeback",
            }),
        )
        .await;
        assert_eq!(error_kind(&response), "InsufficientFunds");

        let response = send(
            &data,
            json!({
                "actor": "root",
                "command": "remove_coins",
                "user_id": "alice",
                "amount": 40,
                "reason": "chargeback",
            }),
        )
        .await;
        assert_eq!(response["data"]["amount"], json!(-40));
        assert_eq!(response["data"]["balance_after"], json!(60));

        let history = send(
            &data,
            json!({"actor": "root", "command": "history", "user_id": "alice"}),
        )
        .await;
        let types: Vec<&str> = history["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["transaction_type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["coin_purchase", "admin_remove"]);
    }
}
