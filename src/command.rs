//! Operator commands for the controller console.
//!
//! This module defines the [`Command`] enum, which captures what the operator asked
//! for at the console prompt, and its parser. Commands that address an agent carry
//! the id of the target session; turning them into protocol messages is left to
//! [`Command::intent`].
//!
//! # Overview
//!
//! - `.exit`, `.help`, `.list`: console housekeeping.
//! - `.ping <id>`, `.close <id>`: session lifecycle.
//! - `info <id>`, `pwd <id>`: system information and working directory of an agent.
//! - `cmd <id> <text>`: pass an opaque command string to an agent.
//! - `upload <id> <path>`, `download <id> <name>`: file transfer.
//!
//! # Example
//! ```rust
//! use tether::Command;
//!
//! let cmd = Command::try_from("cmd 0 uname -a").unwrap();
//! assert_eq!(cmd, Command::Run { session: 0, command: "uname -a".to_string() });
//! ```
use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::{Intent, IntentError};

/// List of possible error that a command can throw.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("no command provided")]
    Empty,

    #[error("failed to read command: {0}")]
    Io(#[from] std::io::Error),
}

/// Operator commands accepted at the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Help,
    List,
    Ping(usize),
    Close(usize),
    Info(usize),
    Pwd(usize),
    Run { session: usize, command: String },
    Upload { session: usize, path: PathBuf },
    Download { session: usize, name: String },
}

impl Command {
    /// Usage summary printed by `.help`.
    pub const USAGE: &'static str = "\
.list                   list sessions
.ping <id>              probe a session
.close <id>             close a session
info <id>               agent system information
pwd <id>                agent working directory
cmd <id> <text>         send a command string
upload <id> <path>      send a local file
download <id> <name>    fetch a remote file
.help                   show this text
.exit                   quit";

    /// Session addressed by this command, if any.
    pub fn session(&self) -> Option<usize> {
        match self {
            Command::Exit | Command::Help | Command::List => None,
            Command::Ping(id) | Command::Close(id) | Command::Info(id) | Command::Pwd(id) => {
                Some(*id)
            }
            Command::Run { session, .. }
            | Command::Upload { session, .. }
            | Command::Download { session, .. } => Some(*session),
        }
    }

    /// Request this command sends to an agent, if it sends one. Uploads read
    /// the local file here.
    pub fn intent(&self) -> Option<Result<Intent, IntentError>> {
        let intent = match self {
            Command::Info(_) => Intent::GetInfo,
            Command::Pwd(_) => Intent::WorkingDirectory,
            Command::Run { command, .. } => Intent::Command(command.clone()),
            Command::Upload { path, .. } => return Some(Intent::upload_file(path)),
            Command::Download { name, .. } => Intent::Download { name: name.clone() },
            _ => return None,
        };
        Some(Ok(intent))
    }
}

fn session_id(command: &str, arg: Option<&str>) -> Result<usize, CommandError> {
    let arg = arg.ok_or_else(|| CommandError::InvalidCommandArguments {
        command: command.to_string(),
        reason: format!("requires a session id. Example: {command} 0"),
    })?;

    arg.parse::<usize>()
        .map_err(|_| CommandError::InvalidCommandArguments {
            command: command.to_string(),
            reason: "session id should be a non-negative number.".to_string(),
        })
}

fn rest(command: &str, arg: &str, what: &str) -> Result<String, CommandError> {
    let arg = arg.trim();
    if arg.is_empty() {
        return Err(CommandError::InvalidCommandArguments {
            command: command.to_string(),
            reason: format!("requires {what}. Example: {command} 0 <{what}>"),
        });
    }
    Ok(arg.to_string())
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let value = value.trim();
        if value.is_empty() {
            return Err(CommandError::Empty);
        }

        let (name, args) = value.split_once(' ').unwrap_or((value, ""));
        let args = args.trim_start();
        let (id, tail) = match args.split_once(' ') {
            Some((id, tail)) => (Some(id), tail),
            None if args.is_empty() => (None, ""),
            None => (Some(args), ""),
        };

        match name {
            ".exit" => Ok(Command::Exit),
            ".help" => Ok(Command::Help),
            ".list" => Ok(Command::List),
            ".ping" => Ok(Command::Ping(session_id(name, id)?)),
            ".close" => Ok(Command::Close(session_id(name, id)?)),
            "info" => Ok(Command::Info(session_id(name, id)?)),
            "pwd" => Ok(Command::Pwd(session_id(name, id)?)),
            "cmd" => Ok(Command::Run {
                session: session_id(name, id)?,
                command: rest(name, tail, "command")?,
            }),
            "upload" => Ok(Command::Upload {
                session: session_id(name, id)?,
                path: PathBuf::from(rest(name, tail, "path")?),
            }),
            "download" => Ok(Command::Download {
                session: session_id(name, id)?,
                name: rest(name, tail, "name")?,
            }),
            _ => Err(CommandError::UnrecognizedCommand(value.to_string())),
        }
    }
}
