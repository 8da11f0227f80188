//! External interfaces this core consumes but does not implement: the
//! key-value store, the command table, the replication manager, and the
//! slow-log sink. Production wiring supplies real implementations; tests
//! supply fakes.

use crate::errors::CommandError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    None,
    Connecting,
    WaitRdb,
    Connected,
}

bitflags::bitflags! {
    pub struct CommandAttrs: u8 {
        const WRITE = 0b0000_0001;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CommandInfo {
    /// Positive: exact argc (including the command name itself). Negative:
    /// minimum argc, i.e. `-n` means "at least n".
    pub arity: i32,
    pub attrs: CommandAttrs,
}

impl CommandInfo {
    pub fn arity_check(&self, argc: usize) -> bool {
        if self.arity >= 0 {
            argc == self.arity as usize
        } else {
            argc >= (-self.arity) as usize
        }
    }

    pub fn is_write(&self) -> bool {
        self.attrs.contains(CommandAttrs::WRITE)
    }
}

/// Where a command's reply bytes go. `None` is passed when the session is a
/// master-feed sink: its writes apply but produce no client-visible reply.
pub trait ReplySink {
    fn push(&mut self, bytes: &[u8]);
}

impl ReplySink for Vec<u8> {
    fn push(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

pub trait Store {
    fn select_db(&mut self, index: usize) -> bool;
    fn current_db(&self) -> usize;
    fn password(&self) -> Option<&str>;
}

pub trait CommandTable {
    fn lookup(&self, name: &str) -> Option<CommandInfo>;

    /// Runs the named command. `reply` is `None` for master-feed sinks.
    fn execute(
        &self,
        name: &str,
        argv: &[Vec<u8>],
        info: CommandInfo,
        reply: Option<&mut dyn ReplySink>,
    ) -> Result<(), CommandError>;
}

pub trait Replication {
    fn master_state(&self) -> MasterState;
    fn set_rdb_size(&mut self, size: u64);
    fn rdb_size(&self) -> Option<u64>;
    fn save_tmp_rdb(&mut self, bytes: &[u8]);
    fn propagate(&mut self, argv: &[Vec<u8>]);
}

/// Opaque handle returned by `SlowLog::begin`, passed back to `end_and_stat`
/// so the sink can compute elapsed time without the core knowing its clock
/// representation.
pub struct SlowLogToken(pub u64);

pub trait SlowLog {
    fn begin(&mut self) -> SlowLogToken;
    fn end_and_stat(&mut self, token: SlowLogToken, argv: &[Vec<u8>]);
}
