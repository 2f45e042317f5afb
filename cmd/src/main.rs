mod seed;

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use abi::config::{Config, LogConfig};
use abi::errors::Result;
use abi::types::{ErrorResponse, MessageResponse, UserId};
use connection::ConnectionService;
use db::DbRepo;

#[derive(Debug, Parser)]
#[command(name = "social", version, about = "Operate the friend request service")]
struct Cli {
    #[arg(long, default_value = "./abi/fixtures/social.yml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// apply database migrations
    Migrate,
    #[command(flatten)]
    Data(DataCommand),
}

/// commands that work on the configured storage backend
#[derive(Debug, Subcommand)]
enum DataCommand {
    /// create dummy users
    Seed { total: usize },
    #[command(subcommand)]
    User(UserCommand),
    #[command(subcommand)]
    Friend(FriendCommand),
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    Show { id: UserId },
    /// delete the account and every connection it takes part in
    Delete { id: UserId },
}

#[derive(Debug, Subcommand)]
enum FriendCommand {
    /// send a friend request to <other>
    Send(Pair),
    /// accept the request <other> sent
    Accept(Pair),
    /// reject the request <other> sent
    Reject(Pair),
    Pending(Caller),
    Sent(Caller),
    List(Caller),
}

#[derive(Debug, Args)]
struct Caller {
    /// id of the authenticated user
    #[arg(long = "as")]
    caller: UserId,
}

#[derive(Debug, Args)]
struct Pair {
    #[arg(long = "as")]
    caller: UserId,
    other: UserId,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config {}: {}", cli.config, e);
            return ExitCode::FAILURE;
        }
    };
    let _guard = init_tracing(&config.log);

    match run(cli.command, &config).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("command failed: {e}");
            let resp = ErrorResponse::from(e);
            println!("{}", serde_json::to_string_pretty(&resp).unwrap_or(resp.error));
            ExitCode::FAILURE
        }
    }
}

/// stderr always, a daily rolling file too when `log.dir` is set
fn init_tracing(log: &LogConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    let (file_layer, guard) = match &log.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &log.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_line_number(true)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();
    guard
}

async fn run(command: Command, config: &Config) -> Result<String> {
    match command {
        Command::Migrate => {
            let pool = db::postgres::connect(&config.db.postgres).await?;
            db::postgres::migrate(&pool).await?;
            info!("migrations applied to {}", config.db.postgres.database);
            render(&MessageResponse::new("Migrations applied successfully."))
        }
        Command::Data(command) => {
            let repo = DbRepo::new(config).await?;
            execute(command, &repo).await
        }
    }
}

async fn execute(command: DataCommand, repo: &DbRepo) -> Result<String> {
    let service = ConnectionService::from_repo(repo);
    match command {
        DataCommand::Seed { total } => {
            seed::seed(repo, total).await?;
            render(&MessageResponse::new(format!(
                "{total} dummy users created successfully."
            )))
        }
        DataCommand::User(UserCommand::Show { id }) => render(&service.user(id).await?),
        DataCommand::User(UserCommand::Delete { id }) => {
            service.remove_user(id).await?;
            render(&MessageResponse::new(format!("User {id} deleted successfully.")))
        }
        DataCommand::Friend(friend) => execute_friend(friend, &service).await,
    }
}

async fn execute_friend(command: FriendCommand, service: &ConnectionService) -> Result<String> {
    match command {
        FriendCommand::Send(Pair { caller, other }) => {
            service.authenticate(caller).await?;
            render(&service.send_request(caller, other).await?)
        }
        FriendCommand::Accept(Pair { caller, other }) => {
            service.authenticate(caller).await?;
            render(&service.accept_request(caller, other).await?)
        }
        FriendCommand::Reject(Pair { caller, other }) => {
            service.authenticate(caller).await?;
            render(&service.reject_request(caller, other).await?)
        }
        FriendCommand::Pending(Caller { caller }) => {
            service.authenticate(caller).await?;
            render(&service.list_pending(caller).await?)
        }
        FriendCommand::Sent(Caller { caller }) => {
            service.authenticate(caller).await?;
            render(&service.list_sent(caller).await?)
        }
        FriendCommand::List(Caller { caller }) => {
            service.authenticate(caller).await?;
            render(&service.list_friends(caller).await?)
        }
    }
}

fn render<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::config::StorageBackend;
    use abi::errors::ErrorKind;
    use abi::types::{NewUser, PendingRequests};
    use clap::CommandFactory;
    use db::UserRepo;

    fn parse(args: &[&str]) -> Command {
        Cli::try_parse_from(std::iter::once("social").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    fn data(args: &[&str]) -> DataCommand {
        match parse(args) {
            Command::Data(command) => command,
            other => panic!("expected a data command, got {other:?}"),
        }
    }

    async fn setup() -> (DbRepo, UserId, UserId) {
        let repo = DbRepo::memory();
        let a = repo
            .user
            .create_user(NewUser::new("alice", "alice@example.com"))
            .await
            .unwrap();
        let b = repo
            .user
            .create_user(NewUser::new("bob", "bob@example.com"))
            .await
            .unwrap();
        (repo, a.id, b.id)
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_commands() {
        match data(&["friend", "send", "--as", "1", "2"]) {
            DataCommand::Friend(FriendCommand::Send(pair)) => {
                assert_eq!((pair.caller, pair.other), (1, 2));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(matches!(
            data(&["friend", "pending", "--as", "7"]),
            DataCommand::Friend(FriendCommand::Pending(Caller { caller: 7 }))
        ));
        assert!(matches!(data(&["seed", "3"]), DataCommand::Seed { total: 3 }));
        assert!(matches!(parse(&["migrate"]), Command::Migrate));
        let cli = Cli::try_parse_from(["social", "migrate"]).unwrap();
        assert_eq!(cli.config, "./abi/fixtures/social.yml");
    }

    #[test]
    fn caller_is_required() {
        assert!(Cli::try_parse_from(["social", "friend", "list"]).is_err());
    }

    #[tokio::test]
    async fn memory_backend_never_dials_postgres() {
        let mut config = Config::load("../abi/fixtures/social.yml").unwrap();
        config.storage.backend = StorageBackend::Memory;
        config.db.postgres.host = "unreachable.invalid".to_string();
        config.db.postgres.port = 1;

        let err = run(parse(&["user", "show", "1"]), &config).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserNotFound);
    }

    #[tokio::test]
    async fn friend_flow_prints_json() {
        let (repo, a, b) = setup().await;
        let (a_arg, b_arg) = (a.to_string(), b.to_string());

        let send = data(&["friend", "send", "--as", a_arg.as_str(), b_arg.as_str()]);
        let out = execute(send, &repo).await.unwrap();
        let resp: MessageResponse = serde_json::from_str(&out).unwrap();
        assert_eq!(resp.message, "Friend request sent successfully.");

        let pending = data(&["friend", "pending", "--as", b_arg.as_str()]);
        let out = execute(pending, &repo).await.unwrap();
        let pending: PendingRequests = serde_json::from_str(&out).unwrap();
        assert_eq!(pending.pending_requests.len(), 1);
        assert_eq!(pending.pending_requests[0].id, a);
        assert_eq!(pending.pending_requests[0].display_name, "alice");
    }

    #[tokio::test]
    async fn unknown_caller_is_unauthenticated() {
        let (repo, _, b) = setup().await;
        let b_arg = b.to_string();
        let send = data(&["friend", "send", "--as", "999", b_arg.as_str()]);
        let err = execute(send, &repo).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn deleted_user_is_gone() {
        let (repo, a, _) = setup().await;
        let a_arg = a.to_string();
        execute(data(&["user", "delete", a_arg.as_str()]), &repo)
            .await
            .unwrap();
        let err = execute(data(&["user", "show", a_arg.as_str()]), &repo)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UserNotFound);
    }
}
