//! Streaming RESP (REdis Serialization Protocol) request parser.
//!
//! Feeds bytes in from any source (a socket read, a test fixture, an
//! arbitrary split of a larger buffer), and accumulates state until a full
//! command has arrived. Handles both the `*<n>\r\n$<len>\r\n<bytes>\r\n...`
//! multibulk form and the legacy space-separated inline form on the same
//! connection, exactly as a real client stream can mix them between
//! commands (never within one).

use std::mem;

const MAX_MULTIBULK_LEN: i64 = 1024 * 1024;
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
const MAX_INLINE_LEN: usize = 64 * 1024;

/// Result of a single `parse` call.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The bytes fed so far don't yet contain a complete command; call again
    /// once more bytes are available. No argv is available.
    NeedMore,
    /// A full command was assembled; retrieve it with `take_argv`.
    Ready,
    /// The input violated the protocol. The parser is left in a state where
    /// it should be reset (`reset`) before reuse; no bytes were consumed.
    Error(ProtocolError),
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ProtocolError {
    UnbalancedQuotes,
    InlineRequestTooLarge,
    InvalidMultibulkLength,
    ExpectedDollarSign,
    InvalidBulkLength,
    UnknownRequestType,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ProtocolError::UnbalancedQuotes => "unbalanced quotes in request",
            ProtocolError::InlineRequestTooLarge => "inline request too large",
            ProtocolError::InvalidMultibulkLength => "invalid multibulk length",
            ProtocolError::ExpectedDollarSign => "expected '$', got something else",
            ProtocolError::InvalidBulkLength => "invalid bulk length",
            ProtocolError::UnknownRequestType => "unknown request type",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ProtocolError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for the first byte of a new command: either `*` (multibulk)
    /// or anything else (inline).
    Init,
    /// Parsed `*<n>\r\n`, now collecting `$<len>\r\n<bytes>\r\n` pairs.
    Arglen,
    /// Parsed the current argument's `$<len>\r\n`, waiting for its payload.
    Arg,
    /// A full argv is sitting in `argv`, waiting to be taken.
    Ready,
}

pub struct RespParser {
    state: State,
    multibulk_len: i64,
    bulk_len: i64,
    argv: Vec<Vec<u8>>,
}

impl Default for RespParser {
    fn default() -> RespParser {
        RespParser::new()
    }
}

impl RespParser {
    pub fn new() -> RespParser {
        RespParser {
            state: State::Init,
            multibulk_len: 0,
            bulk_len: -1,
            argv: Vec::new(),
        }
    }

    /// Returns the parser to its initial state, ready for the next command.
    /// Must be called after taking a `Ready` argv, and after any `Error`,
    /// before feeding more bytes.
    pub fn reset(&mut self) {
        self.state = State::Init;
        self.multibulk_len = 0;
        self.bulk_len = -1;
        self.argv.clear();
    }

    /// Takes ownership of the completed argv. Only meaningful right after a
    /// `Ready` outcome; the parser is left reset.
    pub fn take_argv(&mut self) -> Vec<Vec<u8>> {
        let argv = mem::take(&mut self.argv);
        self.reset();
        argv
    }

    /// Feeds `bytes` into the parser, running it to completion (`Ready`),
    /// exhaustion (`NeedMore`), or failure (`Error`). A single call may walk
    /// through several internal states if `bytes` contains enough data to
    /// do so. Returns the number of leading bytes of `bytes` actually
    /// consumed; on `Error` this is always zero regardless of how much of
    /// the malformed frame had already been examined.
    pub fn parse(&mut self, bytes: &[u8]) -> (usize, ParseOutcome) {
        let mut consumed = 0usize;
        loop {
            match self.state {
                State::Ready => return (consumed, ParseOutcome::Ready),
                State::Init => match self.parse_init(&bytes[consumed..]) {
                    Ok(Some(n)) => consumed += n,
                    Ok(None) => return (consumed, ParseOutcome::NeedMore),
                    Err(e) => return (0, ParseOutcome::Error(e)),
                },
                State::Arglen => match self.parse_arglen(&bytes[consumed..]) {
                    Ok(Some(n)) => consumed += n,
                    Ok(None) => return (consumed, ParseOutcome::NeedMore),
                    Err(e) => return (0, ParseOutcome::Error(e)),
                },
                State::Arg => match self.parse_arg(&bytes[consumed..]) {
                    Ok(Some(n)) => consumed += n,
                    Ok(None) => return (consumed, ParseOutcome::NeedMore),
                    Err(e) => return (0, ParseOutcome::Error(e)),
                },
            }
        }
    }

    fn parse_init(&mut self, bytes: &[u8]) -> Result<Option<usize>, ProtocolError> {
        if bytes.is_empty() {
            return Ok(None);
        }
        if bytes[0] == b'*' {
            let line_end = match find_crlf(bytes) {
                Some(i) => i,
                None => {
                    if bytes.len() > MAX_INLINE_LEN {
                        return Err(ProtocolError::InvalidMultibulkLength);
                    }
                    return Ok(None);
                }
            };
            let n = parse_i64(&bytes[1..line_end]).ok_or(ProtocolError::InvalidMultibulkLength)?;
            if n > MAX_MULTIBULK_LEN {
                return Err(ProtocolError::InvalidMultibulkLength);
            }
            self.multibulk_len = n;
            self.argv.clear();
            let consumed = line_end + 2;
            if n <= 0 {
                self.state = State::Ready;
            } else {
                self.state = State::Arglen;
            }
            Ok(Some(consumed))
        } else {
            self.parse_inline(bytes)
        }
    }

    fn parse_inline(&mut self, bytes: &[u8]) -> Result<Option<usize>, ProtocolError> {
        let line_end = match find_crlf(bytes) {
            Some(i) => i,
            None => {
                if bytes.len() > MAX_INLINE_LEN {
                    return Err(ProtocolError::InlineRequestTooLarge);
                }
                return Ok(None);
            }
        };
        if line_end > MAX_INLINE_LEN {
            return Err(ProtocolError::InlineRequestTooLarge);
        }
        let line = &bytes[..line_end];
        self.argv = tokenize_inline(line)?;
        self.state = State::Ready;
        Ok(Some(line_end + 2))
    }

    fn parse_arglen(&mut self, bytes: &[u8]) -> Result<Option<usize>, ProtocolError> {
        let line_end = match find_crlf(bytes) {
            Some(i) => i,
            None => return Ok(None),
        };
        if bytes.is_empty() || bytes[0] != b'$' {
            return Err(ProtocolError::ExpectedDollarSign);
        }
        let n = parse_i64(&bytes[1..line_end]).ok_or(ProtocolError::InvalidBulkLength)?;
        if n < 0 || n > MAX_BULK_LEN {
            return Err(ProtocolError::InvalidBulkLength);
        }
        self.bulk_len = n;
        self.state = State::Arg;
        Ok(Some(line_end + 2))
    }

    fn parse_arg(&mut self, bytes: &[u8]) -> Result<Option<usize>, ProtocolError> {
        let line_end = match find_crlf(bytes) {
            Some(i) => i,
            None => return Ok(None),
        };
        if line_end != self.bulk_len as usize {
            return Err(ProtocolError::InvalidBulkLength);
        }
        self.argv.push(bytes[..line_end].to_vec());
        self.multibulk_len -= 1;
        self.bulk_len = -1;
        self.state = if self.multibulk_len <= 0 {
            State::Ready
        } else {
            State::Arglen
        };
        Ok(Some(line_end + 2))
    }
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|w| w == b"\r\n")
}

fn parse_i64(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

/// Splits a legacy inline command line the way the original tokenizer does:
/// runs of whitespace separate tokens, and a quoted section (`"..."` or
/// `'...'`) is taken verbatim including embedded whitespace. The final
/// accumulated token is always pushed, even if empty (this is what makes a
/// bare CRLF line parse as a single empty-string argument), and also means a
/// line ending in trailing whitespace produces one extra empty trailing
/// token.
fn tokenize_inline(line: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let mut argv = Vec::new();
    let mut current = Vec::new();
    let mut i = 0;
    while i < line.len() {
        let c = line[i];
        if c == b'"' || c == b'\'' {
            let quote = c;
            i += 1;
            let mut closed = false;
            while i < line.len() {
                if line[i] == quote {
                    closed = true;
                    i += 1;
                    break;
                }
                if line[i] == b'\\' && quote == b'"' && i + 1 < line.len() {
                    current.push(line[i + 1]);
                    i += 2;
                } else {
                    current.push(line[i]);
                    i += 1;
                }
            }
            if !closed {
                return Err(ProtocolError::UnbalancedQuotes);
            }
        } else if c == b' ' || c == b'\t' {
            argv.push(mem::take(&mut current));
            i += 1;
            while i < line.len() && (line[i] == b' ' || line[i] == b'\t') {
                i += 1;
            }
        } else {
            current.push(c);
            i += 1;
        }
    }
    argv.push(current);
    Ok(argv)
}
