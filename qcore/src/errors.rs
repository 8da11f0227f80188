//! Error taxonomy surfaced by the dispatcher. Protocol errors close the
//! connection; command errors produce a `-...\r\n` reply and the session
//! keeps running; resource errors are either a programmer mistake (fixed
//! arity writes) or a recoverable overflow (variable-length writes).

use std::fmt;

/// A command-level failure, written to the wire as `-<code> <message>\r\n`.
/// The connection stays open after one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    NeedAuth,
    UnknownCommand(String),
    WrongArgCount(String),
    ReadonlySlave,
    /// Relayed verbatim from the command-table executor collaborator.
    Command(String),
}

impl CommandError {
    /// The wire error code, matching a reference Redis-compatible server's
    /// taxonomy (`-NOAUTH ...`, `-ERR unknown command ...`, etc).
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::NeedAuth => "NOAUTH",
            CommandError::UnknownCommand(_) => "ERR",
            CommandError::WrongArgCount(_) => "ERR",
            CommandError::ReadonlySlave => "READONLY",
            CommandError::Command(_) => "ERR",
        }
    }

    /// Renders the full reply line, including the leading `-` and trailing
    /// CRLF, ready to push onto a session's reply buffer.
    pub fn to_reply_line(&self) -> String {
        format!("-{} {}\r\n", self.code(), self)
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::NeedAuth => write!(f, "Authentication required"),
            CommandError::UnknownCommand(name) => {
                write!(f, "unknown command '{}'", name)
            }
            CommandError::WrongArgCount(name) => {
                write!(f, "wrong number of arguments for '{}' command", name)
            }
            CommandError::ReadonlySlave => {
                write!(f, "You can't write against a read only replica.")
            }
            CommandError::Command(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CommandError {}

/// A resource-exhaustion condition on the reply buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// A variable-length write (string/vector framing) didn't fit; the
    /// caller already rolled back any partial length prefix and may retry
    /// after growing the buffer or flushing.
    Overflow,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::Overflow => write!(f, "reply buffer overflow"),
        }
    }
}

impl std::error::Error for ResourceError {}
