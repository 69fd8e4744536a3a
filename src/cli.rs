//! CLI utilities for weft.
//!
//! The utilities present in this module can be used to build an interactive
//! client for a weft server.
use std::io::{BufRead, Write};

use crate::command::{Command, CommandError};

/// Prompt user for a valid weft command.
///
/// End of input is treated as [`Command::Exit`].
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, CommandError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(Command::Exit);
    }
    s.as_str().try_into()
}
