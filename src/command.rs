/*!
 * Command Model
 *
 * Turns a decoded request (an array whose head is the command name) into a
 * typed command. Names are matched exactly and in lowercase.
 */

use crate::error::CommandError;
use crate::protocol::Frame;
use bytes::Bytes;
use smol_str::SmolStr;

pub const CMD_SET: &str = "set";
pub const CMD_GET: &str = "get";
pub const CMD_CLIENT: &str = "client";
pub const CMD_HELLO: &str = "hello";

/// Commands understood by the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum Cmd {
    /// SET key value - store a key-value pair
    Set { key: Bytes, value: Bytes },
    /// GET key - retrieve the value for a key
    Get { key: Bytes },
    /// CLIENT subcommand - acknowledged, never interpreted
    Client { subcommand: SmolStr },
    /// HELLO - handshake; any protocol version argument is ignored
    Hello,
}

impl Cmd {
    /// Decode a command from one request value
    ///
    /// Arguments beyond the ones a command needs are ignored, matching how
    /// clients may append options (e.g. `HELLO 3`).
    pub fn from_frame(frame: Frame) -> Result<Cmd, CommandError> {
        let Frame::Array(items) = frame else {
            return Err(CommandError::NotAnArray);
        };
        let mut args = items.into_iter();
        let name = match args.next().and_then(Frame::into_bytes) {
            Some(name) => name,
            None => return Err(CommandError::EmptyRequest),
        };
        let got = args.len();

        match &name[..] {
            n if n == CMD_SET.as_bytes() => {
                let (key, value) = match (args.next(), args.next()) {
                    (Some(k), Some(v)) => (k, v),
                    _ => return Err(arity(CMD_SET, 2, got)),
                };
                Ok(Cmd::Set {
                    key: bytes_arg(key, CMD_SET)?,
                    value: bytes_arg(value, CMD_SET)?,
                })
            }
            n if n == CMD_GET.as_bytes() => {
                let key = args.next().ok_or_else(|| arity(CMD_GET, 1, got))?;
                Ok(Cmd::Get {
                    key: bytes_arg(key, CMD_GET)?,
                })
            }
            n if n == CMD_CLIENT.as_bytes() => {
                let sub = args.next().ok_or_else(|| arity(CMD_CLIENT, 1, got))?;
                let sub = bytes_arg(sub, CMD_CLIENT)?;
                Ok(Cmd::Client {
                    subcommand: SmolStr::new(String::from_utf8_lossy(&sub)),
                })
            }
            n if n == CMD_HELLO.as_bytes() => Ok(Cmd::Hello),
            other => Err(CommandError::UnknownCommand(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    /// Wire name of this command
    pub fn name(&self) -> &'static str {
        match self {
            Cmd::Set { .. } => CMD_SET,
            Cmd::Get { .. } => CMD_GET,
            Cmd::Client { .. } => CMD_CLIENT,
            Cmd::Hello => CMD_HELLO,
        }
    }
}

fn bytes_arg(frame: Frame, command: &'static str) -> Result<Bytes, CommandError> {
    frame
        .into_bytes()
        .ok_or(CommandError::InvalidArgument(command))
}

fn arity(command: &'static str, expected: usize, got: usize) -> CommandError {
    CommandError::WrongArity {
        command,
        expected,
        got,
    }
}
