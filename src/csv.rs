use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::Tokens;
use crate::model::{ParseEnumError, ReviewAction, TxStatus};
use crate::replay::Command;
use crate::store::Account;

/// Errors that can occur when reading or writing csv files
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized op '{op}'")]
    UnknownOp { line: usize, op: String },

    #[error("line {line}: {op} missing {field}")]
    MissingField {
        line: usize,
        op: &'static str,
        field: &'static str,
    },

    #[error("line {line}: {source}")]
    InvalidValue {
        line: usize,
        source: ParseEnumError,
    },

    #[error("failed to write csv row: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush csv output: {0}")]
    Flush(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct InputRow {
    op: String,
    actor: Option<String>,
    target: Option<String>,
    amount: Option<i64>,
    reference: Option<String>,
    note: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    email: &'a str,
    tokens: Tokens,
    cooldown_until: Option<String>,
}

/// Read replay commands from a csv file. The iterator owns the open file,
/// so it can outlive `path` and move into a spawned task.
pub fn read_commands(
    path: &Path,
) -> Result<impl Iterator<Item = Result<Command, CsvError>> + Send + use<>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            parse_row(line, row)
        }))
}

fn parse_row(line: usize, row: InputRow) -> Result<Command, CsvError> {
    let op = row.op.to_ascii_lowercase();
    let op: &'static str = match op.as_str() {
        "open" => "open",
        "adjust" => "adjust",
        "request" => "request",
        "accept" => "accept",
        "reject" => "reject",
        "cancel" => "cancel",
        "dispute" => "dispute",
        "approve" => "approve",
        "deny" => "deny",
        "status" => "status",
        "expire" => "expire",
        _ => return Err(CsvError::UnknownOp { line, op: row.op }),
    };
    let missing = |field| CsvError::MissingField { line, op, field };
    let actor = || row.actor.clone().ok_or_else(|| missing("actor"));
    let target = || row.target.clone().ok_or_else(|| missing("target"));
    let amount = || row.amount.map(Tokens::new).ok_or_else(|| missing("amount"));
    let reference = || row.reference.clone().ok_or_else(|| missing("reference"));
    let note = || row.note.clone().ok_or_else(|| missing("note"));

    let command = match op {
        "open" => Command::Open { email: actor()? },
        "adjust" => Command::Adjust {
            admin: actor()?,
            user: target()?,
            amount: amount()?,
            description: row.note.clone(),
        },
        "request" => Command::Request {
            sender: actor()?,
            receiver: target()?,
            amount: amount()?,
            request_id: row.reference.clone(),
        },
        "accept" => Command::Accept {
            receiver: actor()?,
            reference: reference()?,
        },
        "reject" => Command::Reject {
            receiver: actor()?,
            reference: reference()?,
            reason: row.note.clone(),
        },
        "cancel" => Command::Cancel {
            admin: actor()?,
            reference: reference()?,
            reason: note()?,
        },
        "dispute" => Command::Dispute {
            user: actor()?,
            reference: reference()?,
            reason: note()?,
        },
        "approve" | "deny" => Command::Review {
            admin: actor()?,
            reference: reference()?,
            action: if op == "approve" {
                ReviewAction::Approve
            } else {
                ReviewAction::Reject
            },
            reason: row.note.clone(),
        },
        "status" => Command::SetStatus {
            admin: actor()?,
            reference: reference()?,
            status: target()?
                .parse::<TxStatus>()
                .map_err(|source| CsvError::InvalidValue { line, source })?,
            reason: row.note.clone(),
        },
        _ => Command::Expire,
    };
    Ok(command)
}

/// Write account balances in csv format, sorted by email
pub fn write_accounts(
    writer: impl io::Write,
    accounts: impl IntoIterator<Item = Account>,
) -> Result<(), CsvError> {
    let mut accounts: Vec<_> = accounts.into_iter().collect();
    accounts.sort_by(|a, b| a.email().cmp(b.email()));

    let mut writer = csv::Writer::from_writer(writer);
    for account in &accounts {
        let row = OutputRow {
            email: account.email(),
            tokens: account.tokens(),
            cooldown_until: account.cooldown_until().map(|until| until.to_rfc3339()),
        };
        writer.serialize(&row)?;
    }
    writer.flush()?;
    Ok(())
}
