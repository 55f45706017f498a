//! Command line parsing
//!
//! Turns one text line into a typed [`Command`]. Only the shape of the
//! arguments is checked here; amounts that parse but are zero or negative are
//! passed through so the ledger reports them.

use dagledger_ledger::{LedgerError, TransactionKind, TransferRequest};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CommandError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown command {0}")]
    UnknownCommand(String),

    #[error("{0}")]
    BadArguments(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::UnknownCommand(_) => "UnknownCommand",
            CommandError::BadArguments(_) => "BadArguments",
            CommandError::Ledger(err) => err.code(),
        }
    }

    /// Wire form: `Error: <Code>: <message>`
    pub fn render(&self) -> String {
        format!("Error: {}: {}", self.code(), self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    AddUser { name: String, initial_balance: i64 },
    CheckBalance { name: String },
    Transaction(Vec<TransferRequest>),
    ViewPending { receiver: String },
    Confirm { receiver: String, id: String },
    Reject { receiver: String, id: String },
    Query { id: String },
    Verify { id: String },
    PrintUserDag { name: String },
    PrintDag,
    FetchUserDags { names: Vec<String> },
    ValidateLocalDag { name: String },
}

impl Command {
    /// Parse a command line; the verb is case-insensitive
    pub fn parse(line: &str) -> Result<Command> {
        let mut tokens = line.split_whitespace();
        let verb = tokens
            .next()
            .ok_or_else(|| CommandError::UnknownCommand("(empty line)".to_string()))?;
        let args: Vec<&str> = tokens.collect();

        let command = match verb.to_ascii_uppercase().as_str() {
            "ADD_USER" => {
                let [name, balance] = exact(&args, "ADD_USER <name> <initial_balance>")?;
                Command::AddUser {
                    name: name.to_string(),
                    initial_balance: parse_amount(balance)?,
                }
            }
            "CHECK_BALANCE" => {
                let [name] = exact(&args, "CHECK_BALANCE <name>")?;
                Command::CheckBalance { name: name.to_string() }
            }
            "TRANSACTION" => Command::Transaction(parse_transfers(&args)?),
            "VIEW_PENDING_TRANSACTIONS" => {
                let [receiver] = exact(&args, "VIEW_PENDING_TRANSACTIONS <receiver>")?;
                Command::ViewPending {
                    receiver: receiver.to_string(),
                }
            }
            "CONFIRM_TRANSACTION" => {
                let [receiver, id] = exact(&args, "CONFIRM_TRANSACTION <receiver> <transaction_id>")?;
                Command::Confirm {
                    receiver: receiver.to_string(),
                    id: id.to_string(),
                }
            }
            "REJECT_TRANSACTION" => {
                let [receiver, id] = exact(&args, "REJECT_TRANSACTION <receiver> <transaction_id>")?;
                Command::Reject {
                    receiver: receiver.to_string(),
                    id: id.to_string(),
                }
            }
            "QUERY_TRANSACTION" => {
                let [id] = exact(&args, "QUERY_TRANSACTION <transaction_id>")?;
                Command::Query { id: id.to_string() }
            }
            "VERIFY_TRANSACTION" => {
                let [id] = exact(&args, "VERIFY_TRANSACTION <transaction_id>")?;
                Command::Verify { id: id.to_string() }
            }
            "PRINT_USER_DAG" => {
                let [name] = exact(&args, "PRINT_USER_DAG <name>")?;
                Command::PrintUserDag { name: name.to_string() }
            }
            "PRINT_DAG" => {
                let [] = exact(&args, "PRINT_DAG")?;
                Command::PrintDag
            }
            "FETCH_USER_DAGS" => {
                if args.is_empty() {
                    return Err(usage("FETCH_USER_DAGS <name> [<name> ...]"));
                }
                Command::FetchUserDags {
                    names: args.iter().map(|name| name.to_string()).collect(),
                }
            }
            "VALIDATE_LOCAL_DAG" => {
                let [name] = exact(&args, "VALIDATE_LOCAL_DAG <name>")?;
                Command::ValidateLocalDag { name: name.to_string() }
            }
            _ => return Err(CommandError::UnknownCommand(verb.to_string())),
        };

        Ok(command)
    }

    /// Canonical verb, used as a metrics label
    pub fn verb(&self) -> &'static str {
        match self {
            Command::AddUser { .. } => "ADD_USER",
            Command::CheckBalance { .. } => "CHECK_BALANCE",
            Command::Transaction(_) => "TRANSACTION",
            Command::ViewPending { .. } => "VIEW_PENDING_TRANSACTIONS",
            Command::Confirm { .. } => "CONFIRM_TRANSACTION",
            Command::Reject { .. } => "REJECT_TRANSACTION",
            Command::Query { .. } => "QUERY_TRANSACTION",
            Command::Verify { .. } => "VERIFY_TRANSACTION",
            Command::PrintUserDag { .. } => "PRINT_USER_DAG",
            Command::PrintDag => "PRINT_DAG",
            Command::FetchUserDags { .. } => "FETCH_USER_DAGS",
            Command::ValidateLocalDag { .. } => "VALIDATE_LOCAL_DAG",
        }
    }

    /// Whether the command needs the write lock
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Command::AddUser { .. } | Command::Transaction(_) | Command::Confirm { .. } | Command::Reject { .. }
        )
    }
}

const TRANSACTION_USAGE: &str = "TRANSACTION [TOKEN|DIRECT] <sender> <receiver> <amount> [...]";

/// Groups of `[KIND] sender receiver amount`.
///
/// A leading token is read as a kind only when a full triple follows it, so an
/// account named `token` can still appear as a sender.
fn parse_transfers(args: &[&str]) -> Result<Vec<TransferRequest>> {
    if args.is_empty() {
        return Err(usage(TRANSACTION_USAGE));
    }

    let mut requests = Vec::new();
    let mut rest = args;
    while !rest.is_empty() {
        let (kind, group) = match TransactionKind::parse(rest[0]) {
            Some(kind) if rest.len() >= 4 && parse_amount(rest[3]).is_ok() => (kind, &rest[1..]),
            _ => (TransactionKind::default(), rest),
        };
        if group.len() < 3 {
            return Err(usage(TRANSACTION_USAGE));
        }

        requests.push(TransferRequest::new(group[0], group[1], parse_amount(group[2])?, kind));
        rest = &group[3..];
    }

    Ok(requests)
}

fn exact<'a, const N: usize>(args: &[&'a str], usage_text: &str) -> Result<[&'a str; N]> {
    <[&'a str; N]>::try_from(args).map_err(|_| usage(usage_text))
}

fn parse_amount(raw: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|_| CommandError::BadArguments(format!("amount {} is not an integer", raw)))
}

fn usage(text: &str) -> CommandError {
    CommandError::BadArguments(format!("Usage: {}", text))
}
