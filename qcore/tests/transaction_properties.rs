use std::net::SocketAddr;

use proptest::prelude::*;
use qcommon::logging;
use qcore::{
    ClientSession, CommandAttrs, CommandInfo, CommandTable, DispatchContext, DirtyBroker,
    MasterState, MonitorRegistry, ReplySink, Replication, SessionId, SlowLog, Store,
};

struct FakeStore;
impl Store for FakeStore {
    fn select_db(&mut self, _index: usize) -> bool {
        true
    }
    fn current_db(&self) -> usize {
        0
    }
    fn password(&self) -> Option<&str> {
        None
    }
}

struct FakeCommands;
impl CommandTable for FakeCommands {
    fn lookup(&self, name: &str) -> Option<CommandInfo> {
        match name {
            "set" => Some(CommandInfo {
                arity: 3,
                attrs: CommandAttrs::WRITE,
            }),
            "get" => Some(CommandInfo {
                arity: 2,
                attrs: CommandAttrs::empty(),
            }),
            _ => None,
        }
    }

    fn execute(
        &self,
        _name: &str,
        _argv: &[Vec<u8>],
        _info: CommandInfo,
        reply: Option<&mut dyn ReplySink>,
    ) -> Result<(), qcore::CommandError> {
        if let Some(sink) = reply {
            sink.push(b"+OK\r\n");
        }
        Ok(())
    }
}

struct FakeRepl;
impl Replication for FakeRepl {
    fn master_state(&self) -> MasterState {
        MasterState::None
    }
    fn set_rdb_size(&mut self, _n: u64) {}
    fn rdb_size(&self) -> Option<u64> {
        None
    }
    fn save_tmp_rdb(&mut self, _bytes: &[u8]) {}
    fn propagate(&mut self, _argv: &[Vec<u8>]) {}
}

struct FakeSlowLog;
impl SlowLog for FakeSlowLog {
    fn begin(&mut self) -> qcore::collaborators::SlowLogToken {
        qcore::collaborators::SlowLogToken(0)
    }
    fn end_and_stat(&mut self, _token: qcore::collaborators::SlowLogToken, _argv: &[Vec<u8>]) {}
}

fn peer() -> SocketAddr {
    "127.0.0.1:6379".parse().unwrap()
}

fn encode(args: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for a in args {
        out.extend_from_slice(format!("${}\r\n", a.len()).as_bytes());
        out.extend_from_slice(a.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

proptest! {
    /// Whatever key name is watched, a write landing between WATCH and EXEC
    /// always dirties the transaction and aborts it with a null array,
    /// regardless of how many other (irrelevant) keys are also written in
    /// between.
    #[test]
    fn dirty_write_between_watch_and_exec_aborts(
        key in "[a-zA-Z0-9]{1,8}",
        noise_keys in prop::collection::vec("[a-zA-Z0-9]{1,8}", 0..5),
    ) {
        let mut session = ClientSession::new(SessionId(1), peer(), logging::discard());
        session.set_authenticated(true);
        let broker = DirtyBroker::new();
        session.watch(0, key.clone().into_bytes(), &broker);

        for noise in &noise_keys {
            if noise != &key {
                broker.publish(0, noise.as_bytes());
            }
        }
        broker.publish(0, key.as_bytes());

        let mut store = FakeStore;
        let commands = FakeCommands;
        let mut repl = FakeRepl;
        let mut slowlog = FakeSlowLog;
        let monitors = MonitorRegistry::new();
        let mut ctx = DispatchContext {
            store: &mut store,
            commands: &commands,
            replication: &mut repl,
            slowlog: &mut slowlog,
            monitors: &monitors,
            dirty_broker: &broker,
        };

        session.dispatch(&encode(&["multi"]), &mut ctx);
        session.take_reply();
        session.dispatch(&encode(&["set", &key, "1"]), &mut ctx);
        session.take_reply();
        session.dispatch(&encode(&["exec"]), &mut ctx);
        prop_assert_eq!(session.take_reply(), b"*-1\r\n".to_vec());
    }

    /// UNWATCH between WATCH and EXEC always cancels dirty tracking, even if
    /// a write to the watched key happens afterward.
    #[test]
    fn unwatch_cancels_dirty_tracking(key in "[a-zA-Z0-9]{1,8}") {
        let mut session = ClientSession::new(SessionId(2), peer(), logging::discard());
        session.set_authenticated(true);
        let broker = DirtyBroker::new();
        session.watch(0, key.clone().into_bytes(), &broker);
        session.unwatch_all(&broker);
        broker.publish(0, key.as_bytes());

        let mut store = FakeStore;
        let commands = FakeCommands;
        let mut repl = FakeRepl;
        let mut slowlog = FakeSlowLog;
        let monitors = MonitorRegistry::new();
        let mut ctx = DispatchContext {
            store: &mut store,
            commands: &commands,
            replication: &mut repl,
            slowlog: &mut slowlog,
            monitors: &monitors,
            dirty_broker: &broker,
        };

        session.dispatch(&encode(&["multi"]), &mut ctx);
        session.take_reply();
        session.dispatch(&encode(&["exec"]), &mut ctx);
        let reply = session.take_reply();
        prop_assert!(reply.starts_with(b"*0\r\n"));
    }
}
