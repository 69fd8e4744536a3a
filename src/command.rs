//! High-level command module for the client.
//!
//! This module defines the [`Command`] enum, which encapsulates the commands a
//! user can type at the weft prompt together with their arguments. Commands
//! are converted into protocol [`Request`](crate::protocol::Request)s before
//! they are sent to a server.
//!
//! # Overview
//! The `Command` enum represents supported operations such as:
//!
//! - `Exit`: Close the current session.
//! - `Ping`: Check the server is alive.
//! - `Echo(WireValue)`: Have the server send a value straight back.
//! - `Set`/`Get`: Store and fetch a string value under a key.
//! - `Sleep(u64)`: Have the serving task sleep, leaving other sessions running.
//!
//! # Example
//! ```rust
//! use weft::{Command, protocol::WireValue};
//!
//! let cmd: Command = "echo int -5".try_into().unwrap();
//! assert_eq!(cmd, Command::Echo(WireValue::Int(-5)));
//! ```
use std::io;

use thiserror::Error;

use crate::protocol::{WireKind, WireValue};

/// List of possible errors a command can produce.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("no command provided")]
    Empty,

    #[error("failed to read command: {0}")]
    Io(#[from] io::Error),
}

/// High-level user supplied commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Close the session and terminate the client.
    Exit,
    Ping,
    /// Ask the server to echo a value of any wire kind.
    Echo(WireValue),
    /// Store `value` under `key`.
    Set { key: String, value: String },
    Get { key: String },
    /// Ask the serving task to sleep for the given milliseconds.
    Sleep(u64),
}

fn invalid(command: &str, reason: &str) -> CommandError {
    CommandError::InvalidCommandArguments {
        command: command.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_int(command: &str, s: &str) -> Result<i64, CommandError> {
    s.parse()
        .map_err(|_| invalid(command, &format!("'{s}' is not an integer")))
}

fn parse_echo(args: &str) -> Result<WireValue, CommandError> {
    const USAGE: &str = "expected a kind and a value. Example: echo int 5";

    let (kind, rest) = args.split_once(' ').unwrap_or((args, ""));
    let rest = rest.trim();
    match kind {
        "int" => Ok(WireValue::Int(parse_int("echo", rest)?)),
        "bool" => match rest {
            "true" => Ok(WireValue::Bool(true)),
            "false" => Ok(WireValue::Bool(false)),
            _ => Err(invalid("echo", "bool must be 'true' or 'false'")),
        },
        "str" => Ok(WireValue::Bytes(rest.as_bytes().to_vec())),
        "ints" => {
            let items = rest
                .split_whitespace()
                .map(|s| parse_int("echo", s).map(WireValue::Int))
                .collect::<Result<_, _>>()?;
            Ok(WireValue::List {
                kind: WireKind::Int,
                items,
            })
        }
        _ => Err(invalid("echo", USAGE)),
    }
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(input: &str) -> Result<Self, Self::Error> {
        let input = input.trim();
        let (name, args) = input.split_once(' ').unwrap_or((input, ""));
        let args = args.trim();

        match name {
            "" => Err(CommandError::Empty),
            ".exit" => Ok(Command::Exit),
            "ping" => Ok(Command::Ping),
            "echo" => Ok(Command::Echo(parse_echo(args)?)),
            "set" => {
                let Some((key, value)) = args.split_once(' ') else {
                    return Err(invalid("set", "requires a key and a value. Example: set name ada"));
                };
                Ok(Command::Set {
                    key: key.to_string(),
                    value: value.trim().to_string(),
                })
            }
            "get" if !args.is_empty() && !args.contains(' ') => Ok(Command::Get {
                key: args.to_string(),
            }),
            "get" => Err(invalid("get", "requires exactly one key. Example: get name")),
            "sleep" => {
                let millis = args.parse::<u64>().map_err(|_| {
                    invalid("sleep", "requires a non-negative number of milliseconds")
                })?;
                Ok(Command::Sleep(millis))
            }
            _ => Err(CommandError::UnrecognizedCommand(input.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_from_string() {
        let inputs = vec![
            (".exit", Command::Exit),
            ("ping", Command::Ping),
            ("  sleep 250 ", Command::Sleep(250)),
            ("echo bool true", Command::Echo(WireValue::Bool(true))),
            (
                "echo str hello world",
                Command::Echo(WireValue::Bytes(b"hello world".to_vec())),
            ),
            (
                "set name Ada Lovelace",
                Command::Set {
                    key: "name".into(),
                    value: "Ada Lovelace".into(),
                },
            ),
            ("get name", Command::Get { key: "name".into() }),
        ];

        for (cmd, expected) in inputs {
            let command: Command = cmd.try_into().unwrap();
            assert_eq!(command, expected);
        }
    }

    #[test]
    fn echo_int_list() {
        let command = Command::try_from("echo ints 1 -2 3").unwrap();

        assert_eq!(
            command,
            Command::Echo(WireValue::List {
                kind: WireKind::Int,
                items: vec![WireValue::Int(1), WireValue::Int(-2), WireValue::Int(3)],
            })
        );
    }

    #[test]
    fn bad_arguments() {
        for input in ["sleep -1", "get", "get a b", "set lonely", "echo int x", "echo float 1"] {
            assert!(
                matches!(
                    Command::try_from(input),
                    Err(CommandError::InvalidCommandArguments { .. })
                ),
                "{input} was accepted"
            );
        }
    }

    #[test]
    fn unknown_and_empty() {
        assert!(matches!(
            Command::try_from("drop table"),
            Err(CommandError::UnrecognizedCommand(s)) if s == "drop table"
        ));
        assert!(matches!(Command::try_from("   "), Err(CommandError::Empty)));
    }
}
