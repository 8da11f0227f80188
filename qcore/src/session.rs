//! The per-connection state machine: wraps a `RespParser` over the readable
//! side of a session's `RingBuffer`, tracks auth/db/transaction state, and
//! drives the twelve-step dispatch described in the module-level docs.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{mpsc, Arc};

use indexmap::IndexSet;
use qcommon::logging::{self, Logger};
use qnet::{ParseOutcome, RespParser};

use crate::collaborators::{
    CommandInfo, CommandTable, MasterState, ReplySink, Replication, SlowLog, Store,
};
use crate::current;
use crate::dirty::DirtyBroker;
use crate::errors::CommandError;
use crate::flags::SessionFlags;
use crate::gate::{GateOutcome, ReplicationGate};
use crate::monitor::{format_echo, MonitorHandle, MonitorRegistry};

const MONITOR_ECHO_MAX_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

/// Identifies a session that has been promoted to a replication sink (it is
/// streaming as a replica of this server).
#[derive(Debug, Clone)]
pub struct SlaveInfo {
    pub listening_port: u16,
}

/// Outcome of feeding one readable window into a session's dispatcher.
#[derive(Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing to do yet; retain state and wait for more bytes.
    NeedMore,
    /// The replication gate consumed and discarded master-stream bytes.
    Discarded,
    /// The replication gate forwarded bytes into the RDB sink.
    RdbCaptured { done: bool },
    /// The wire was malformed; the connection must close.
    ProtocolError(qnet::ProtocolError),
    /// A frame was fully handled (queued, executed, or replied to directly).
    CommandProcessed,
}

/// Bundles the external collaborators a dispatch call needs, so `dispatch`
/// doesn't grow an ever-longer positional argument list as more of the
/// surrounding system gets wired in.
pub struct DispatchContext<'a> {
    pub store: &'a mut dyn Store,
    pub commands: &'a dyn CommandTable,
    pub replication: &'a mut dyn Replication,
    pub slowlog: &'a mut dyn SlowLog,
    pub monitors: &'a MonitorRegistry,
    pub dirty_broker: &'a DirtyBroker,
}

pub struct ClientSession {
    id: SessionId,
    db: usize,
    auth: bool,
    flags: SessionFlags,
    parser: RespParser,
    reply: Vec<u8>,
    queue_cmds: Vec<Vec<Vec<u8>>>,
    watch_keys: HashMap<usize, IndexSet<Vec<u8>>>,
    waiting_keys: IndexSet<Vec<u8>>,
    target: Option<Vec<u8>>,
    peer_addr: SocketAddr,
    slave_info: Option<SlaveInfo>,

    dirty_tx: mpsc::Sender<()>,
    dirty_rx: mpsc::Receiver<()>,

    monitor_tx: mpsc::Sender<Vec<u8>>,
    monitor_rx: mpsc::Receiver<Vec<u8>>,
    monitor_handle: Option<Arc<MonitorHandle>>,

    log: Logger,
}

impl ClientSession {
    pub fn new(id: SessionId, peer_addr: SocketAddr, log: Logger) -> ClientSession {
        let (dirty_tx, dirty_rx) = mpsc::channel();
        let (monitor_tx, monitor_rx) = mpsc::channel();
        ClientSession {
            id,
            db: 0,
            auth: false,
            flags: SessionFlags::default(),
            parser: RespParser::new(),
            reply: Vec::new(),
            queue_cmds: Vec::new(),
            watch_keys: HashMap::new(),
            waiting_keys: IndexSet::new(),
            target: None,
            peer_addr,
            slave_info: None,
            dirty_tx,
            dirty_rx,
            monitor_tx,
            monitor_rx,
            monitor_handle: None,
            log: log.new(logging::o!("peer" => peer_addr.to_string())),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn db(&self) -> usize {
        self.db
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth
    }

    pub fn set_authenticated(&mut self, authed: bool) {
        self.auth = authed;
    }

    pub fn slave_info(&self) -> Option<&SlaveInfo> {
        self.slave_info.as_ref()
    }

    pub fn set_slave_info(&mut self, info: Option<SlaveInfo>) {
        self.slave_info = info;
    }

    /// Drains and returns whatever reply bytes have accumulated since the
    /// last call. The returned buffer is what the caller flushes to the
    /// socket's write-side `RingBuffer`.
    pub fn take_reply(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.reply)
    }

    /// Drains echo lines delivered by other sessions' monitor fan-out. The
    /// caller forwards these to the socket independently of frame dispatch.
    pub fn drain_monitor_mailbox(&mut self) -> Vec<Vec<u8>> {
        self.monitor_rx.try_iter().collect()
    }

    fn drain_dirty_mailbox(&mut self) {
        while self.dirty_rx.try_recv().is_ok() {
            self.flags.insert(SessionFlags::DIRTY);
        }
    }

    /// Feeds one readable window through the replication gate and, if it
    /// applies, the frame parser and dispatcher. Returns the number of
    /// bytes consumed and what happened.
    pub fn dispatch(&mut self, bytes: &[u8], ctx: &mut DispatchContext) -> (usize, DispatchOutcome) {
        let (gate_consumed, gate_outcome) = ReplicationGate::route(ctx.replication, bytes);
        match gate_outcome {
            GateOutcome::Discarded => return (gate_consumed, DispatchOutcome::Discarded),
            GateOutcome::NeedMore => return (gate_consumed, DispatchOutcome::NeedMore),
            GateOutcome::Captured { done } => {
                return (gate_consumed, DispatchOutcome::RdbCaptured { done })
            }
            GateOutcome::Proceed => {}
        }

        let (consumed, parse_outcome) = self.parser.parse(bytes);
        let argv = match parse_outcome {
            ParseOutcome::NeedMore => return (consumed, DispatchOutcome::NeedMore),
            ParseOutcome::Error(e) => return (consumed, DispatchOutcome::ProtocolError(e)),
            ParseOutcome::Ready => self.parser.take_argv(),
        };

        // `current::enter` is the scoped-release guard: it clears the
        // thread-local the moment this block exits, on every path below.
        let outcome = {
            let _current = current::enter(self.id);
            self.handle_frame(argv, ctx)
        };

        (consumed, outcome)
    }

    fn handle_frame(&mut self, mut argv: Vec<Vec<u8>>, ctx: &mut DispatchContext) -> DispatchOutcome {
        if argv.is_empty() {
            return DispatchOutcome::CommandProcessed;
        }
        argv[0].make_ascii_lowercase();
        let name = String::from_utf8_lossy(&argv[0]).into_owned();

        // No password configured on the store means every session starts
        // already authenticated; this is re-checked every frame rather than
        // cached at construction time since the store outlives the session.
        let no_password_set = ctx.store.password().is_none();
        if !self.auth && !no_password_set && name != "auth" {
            self.reply
                .extend_from_slice(CommandError::NeedAuth.to_reply_line().as_bytes());
            return DispatchOutcome::CommandProcessed;
        }

        if !ctx.monitors.is_empty() {
            let peer = self.peer_addr.to_string();
            let line = format_echo(self.db, &peer, &argv, MONITOR_ECHO_MAX_LEN);
            ctx.monitors.broadcast(&line);
        }

        match name.as_str() {
            "auth" => {
                self.handle_auth(&argv, &*ctx.store, no_password_set);
                return DispatchOutcome::CommandProcessed;
            }
            "multi" => {
                self.flags.insert(SessionFlags::MULTI);
                self.reply.extend_from_slice(b"+OK\r\n");
                return DispatchOutcome::CommandProcessed;
            }
            "discard" => {
                self.discard(ctx.dirty_broker);
                self.reply.extend_from_slice(b"+OK\r\n");
                return DispatchOutcome::CommandProcessed;
            }
            "watch" => {
                if self.flags.contains(SessionFlags::MULTI) {
                    self.reply.extend_from_slice(
                        b"-ERR WATCH inside MULTI is not allowed\r\n",
                    );
                } else {
                    for key in argv.into_iter().skip(1) {
                        self.watch(self.db, key, ctx.dirty_broker);
                    }
                    self.reply.extend_from_slice(b"+OK\r\n");
                }
                return DispatchOutcome::CommandProcessed;
            }
            "unwatch" => {
                self.unwatch_all(ctx.dirty_broker);
                self.reply.extend_from_slice(b"+OK\r\n");
                return DispatchOutcome::CommandProcessed;
            }
            "exec" => {
                self.exec(ctx);
                return DispatchOutcome::CommandProcessed;
            }
            _ => {}
        }

        if self.flags.contains(SessionFlags::MULTI) {
            let info = ctx.commands.lookup(&name);
            match info {
                Some(info) if !info.arity_check(argv.len()) => {
                    self.flags.insert(SessionFlags::WRONG_EXEC);
                    self.reply.extend_from_slice(
                        CommandError::WrongArgCount(name).to_reply_line().as_bytes(),
                    );
                }
                Some(_) => {
                    if !self.flags.contains(SessionFlags::WRONG_EXEC) {
                        self.queue_cmds.push(argv);
                        self.reply.extend_from_slice(b"+QUEUED\r\n");
                    }
                }
                None => {
                    self.flags.insert(SessionFlags::WRONG_EXEC);
                    self.reply.extend_from_slice(
                        CommandError::UnknownCommand(name).to_reply_line().as_bytes(),
                    );
                }
            }
            return DispatchOutcome::CommandProcessed;
        }

        let info = match ctx.commands.lookup(&name) {
            Some(info) => info,
            None => {
                self.reply.extend_from_slice(
                    CommandError::UnknownCommand(name).to_reply_line().as_bytes(),
                );
                return DispatchOutcome::CommandProcessed;
            }
        };

        if name == "monitor" {
            if self.monitor_handle.is_none() {
                let handle = MonitorHandle::new(self.monitor_tx.clone());
                ctx.monitors.add(&handle);
                self.monitor_handle = Some(handle);
            }
            self.flags.insert(SessionFlags::MONITOR);
            self.reply.extend_from_slice(b"+OK\r\n");
            return DispatchOutcome::CommandProcessed;
        }

        if !info.arity_check(argv.len()) {
            self.reply.extend_from_slice(
                CommandError::WrongArgCount(name).to_reply_line().as_bytes(),
            );
            return DispatchOutcome::CommandProcessed;
        }

        let is_master_feed = self.flags.contains(SessionFlags::MASTER);
        if ctx.replication.master_state() != MasterState::None
            && !is_master_feed
            && info.is_write()
        {
            self.reply.extend_from_slice(
                CommandError::ReadonlySlave.to_reply_line().as_bytes(),
            );
            return DispatchOutcome::CommandProcessed;
        }

        let token = ctx.slowlog.begin();
        let result = {
            let reply_sink: Option<&mut dyn ReplySink> =
                if is_master_feed { None } else { Some(&mut self.reply) };
            ctx.commands.execute(&name, &argv, info, reply_sink)
        };
        ctx.slowlog.end_and_stat(token, &argv);

        match result {
            Ok(()) => {
                if info.is_write() {
                    ctx.replication.propagate(&argv);
                }
            }
            Err(e) => {
                self.reply.extend_from_slice(e.to_reply_line().as_bytes());
            }
        }

        DispatchOutcome::CommandProcessed
    }

    /// Handles `AUTH <password>` directly rather than through the generic
    /// command table: it is the one command allowed to flip `self.auth`,
    /// which the table's `execute` signature has no way to reach back into.
    fn handle_auth(&mut self, argv: &[Vec<u8>], store: &dyn Store, no_password_set: bool) {
        if no_password_set {
            self.reply.extend_from_slice(
                b"-ERR Client sent AUTH, but no password is set\r\n",
            );
            return;
        }
        if argv.len() != 2 {
            self.reply.extend_from_slice(
                CommandError::WrongArgCount("auth".to_string())
                    .to_reply_line()
                    .as_bytes(),
            );
            return;
        }
        let expected = store.password().unwrap_or_default();
        if argv[1] == expected.as_bytes() {
            self.auth = true;
            self.reply.extend_from_slice(b"+OK\r\n");
        } else {
            self.reply
                .extend_from_slice(b"-ERR invalid password\r\n");
        }
    }

    // --- TxnCoordinator ---

    pub fn watch(&mut self, db: usize, key: Vec<u8>, broker: &DirtyBroker) -> bool {
        let inserted = self
            .watch_keys
            .entry(db)
            .or_insert_with(IndexSet::new)
            .insert(key.clone());
        if inserted {
            broker.subscribe(db, &key, self.id, self.dirty_tx.clone());
        }
        inserted
    }

    pub fn unwatch_all(&mut self, broker: &DirtyBroker) {
        for (db, keys) in self.watch_keys.drain() {
            for key in keys {
                broker.unsubscribe(db, &key, self.id);
            }
        }
        self.flags.remove(SessionFlags::DIRTY);
    }

    pub fn discard(&mut self, broker: &DirtyBroker) {
        self.queue_cmds.clear();
        self.flags.remove(SessionFlags::MULTI | SessionFlags::WRONG_EXEC);
        self.unwatch_all(broker);
    }

    pub fn exec(&mut self, ctx: &mut DispatchContext) {
        self.drain_dirty_mailbox();
        let wrong_exec = self.flags.contains(SessionFlags::WRONG_EXEC);
        let dirty = self.flags.contains(SessionFlags::DIRTY);
        let queue = std::mem::take(&mut self.queue_cmds);
        let is_master_feed = self.flags.contains(SessionFlags::MASTER);

        // Scoped release: whatever branch below runs, transaction state is
        // reset the moment this guard drops at the end of the function.
        let mut guard = ExecReleaseGuard {
            session: self,
            broker: ctx.dirty_broker,
        };

        if wrong_exec {
            guard.session.reply.extend_from_slice(
                b"-EXECABORT Transaction discarded because of previous errors.\r\n",
            );
            return;
        }
        if dirty {
            guard.session.reply.extend_from_slice(b"*-1\r\n");
            return;
        }

        guard
            .session
            .reply
            .extend_from_slice(format!("*{}\r\n", queue.len()).as_bytes());

        for argv in queue {
            if argv.is_empty() {
                continue;
            }
            let name = String::from_utf8_lossy(&argv[0]).to_lowercase();
            match ctx.commands.lookup(&name) {
                Some(info) => {
                    let token = ctx.slowlog.begin();
                    let result = {
                        let reply_sink: Option<&mut dyn ReplySink> = if is_master_feed {
                            None
                        } else {
                            Some(&mut guard.session.reply)
                        };
                        ctx.commands.execute(&name, &argv, info, reply_sink)
                    };
                    ctx.slowlog.end_and_stat(token, &argv);
                    match result {
                        Ok(()) => {
                            if info.is_write() {
                                ctx.replication.propagate(&argv);
                            }
                        }
                        Err(e) => {
                            guard
                                .session
                                .reply
                                .extend_from_slice(e.to_reply_line().as_bytes());
                        }
                    }
                }
                None => {
                    guard.session.reply.extend_from_slice(
                        CommandError::UnknownCommand(name).to_reply_line().as_bytes(),
                    );
                }
            }
        }
    }

    /// Registers a blocking wait on `key`, optionally pinning a move/copy
    /// target. Fails (without side effects) if a different target is
    /// already pinned.
    pub fn wait_for(&mut self, key: Vec<u8>, target: Option<Vec<u8>>) -> bool {
        if let Some(ref t) = target {
            if matches!(&self.target, Some(existing) if existing != t) {
                return false;
            }
        }
        if let Some(t) = target {
            self.target = Some(t);
        }
        self.waiting_keys.insert(key);
        true
    }

    pub fn cancel_all_waits(&mut self) {
        self.waiting_keys.clear();
        self.target = None;
    }
}

struct ExecReleaseGuard<'a> {
    session: &'a mut ClientSession,
    broker: &'a DirtyBroker,
}

impl<'a> Drop for ExecReleaseGuard<'a> {
    fn drop(&mut self) {
        self.session.queue_cmds.clear();
        for (db, keys) in self.session.watch_keys.drain() {
            for key in keys {
                self.broker.unsubscribe(db, &key, self.session.id);
            }
        }
        self.session
            .flags
            .remove(SessionFlags::MULTI | SessionFlags::WRONG_EXEC | SessionFlags::DIRTY);
    }
}
