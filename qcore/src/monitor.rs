//! Process-wide registry of sessions that issued MONITOR and receive a copy
//! of every executed command as a formatted echo line.
//!
//! Sessions are referenced weakly: a session that drops without ever
//! unregistering simply stops being deliverable, and its entry is reaped
//! the next time someone iterates the registry, so no explicit unregister
//! call is required on the close path.

use std::sync::{mpsc, Arc, Mutex, Weak};

use indexmap::IndexMap;

/// The mailbox side of a monitoring session. Kept alive by the session for
/// as long as it wants to keep receiving echoes; the registry only ever
/// holds a `Weak` to it.
pub struct MonitorHandle {
    sender: mpsc::Sender<Vec<u8>>,
}

impl MonitorHandle {
    pub fn new(sender: mpsc::Sender<Vec<u8>>) -> Arc<MonitorHandle> {
        Arc::new(MonitorHandle { sender })
    }
}

/// Keys entries by the strong reference's pointer identity so iteration
/// order is stable across upgrades and independent of any external
/// resorting, rather than tracking a separate insertion-order field.
fn identity(handle: &Arc<MonitorHandle>) -> usize {
    Arc::as_ptr(handle) as usize
}

#[derive(Default)]
pub struct MonitorRegistry {
    weaks: Mutex<IndexMap<usize, Weak<MonitorHandle>>>,
}

impl MonitorRegistry {
    pub fn new() -> MonitorRegistry {
        MonitorRegistry::default()
    }

    /// Registers `handle` for echo delivery. The caller retains the strong
    /// `Arc` for as long as it wants to keep monitoring; dropping it is
    /// sufficient to unregister.
    pub fn add(&self, handle: &Arc<MonitorHandle>) {
        let mut weaks = self.weaks.lock().expect("monitor registry poisoned");
        weaks.insert(identity(handle), Arc::downgrade(handle));
    }

    pub fn is_empty(&self) -> bool {
        self.weaks.lock().expect("monitor registry poisoned").is_empty()
    }

    /// Delivers `line` to every live monitor, evicting any whose session has
    /// since dropped. Eviction happens during the same traversal, not as a
    /// separate sweep.
    pub fn broadcast(&self, line: &[u8]) {
        let mut weaks = self.weaks.lock().expect("monitor registry poisoned");
        weaks.retain(|_, weak| match weak.upgrade() {
            Some(handle) => {
                // A monitor that's stopped reading its mailbox doesn't get
                // to back-pressure the rest of the fan-out.
                let _ = handle.sender.send(line.to_vec());
                true
            }
            None => false,
        });
    }
}

/// Formats a monitor echo line: `+[db<N> <ip>:<port>]: "<cmd> <arg> ..."\r\n`.
/// Truncates trailing tokens (never an escape, never omits the closing
/// quote) if the line would exceed `max_len`.
pub fn format_echo(db: usize, peer: &str, argv: &[Vec<u8>], max_len: usize) -> Vec<u8> {
    let mut line = format!("+[db{} {}]: \"", db, peer).into_bytes();
    let suffix = b"\"\r\n";
    let budget = max_len.saturating_sub(line.len() + suffix.len());
    let mut used = 0usize;

    for (i, arg) in argv.iter().enumerate() {
        let mut token = if i > 0 {
            let mut t = Vec::with_capacity(arg.len() + 1);
            t.push(b' ');
            t.extend_from_slice(arg);
            t
        } else {
            arg.clone()
        };
        if used + token.len() > budget {
            break;
        }
        used += token.len();
        line.append(&mut token);
    }

    line.extend_from_slice(suffix);
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_delivers_to_live_monitor_and_reaps_dead_ones() {
        let registry = MonitorRegistry::new();

        let (tx_dead, _rx_dead) = mpsc::channel();
        {
            let dead = MonitorHandle::new(tx_dead);
            registry.add(&dead);
        } // dead drops here, Weak should fail to upgrade

        let (tx_alive, rx_alive) = mpsc::channel();
        let alive = MonitorHandle::new(tx_alive);
        registry.add(&alive);

        registry.broadcast(b"+[db0 127.0.0.1:1]: \"get x\"\r\n");

        assert_eq!(registry.weaks.lock().unwrap().len(), 1);
        let received = rx_alive.try_recv().unwrap();
        assert_eq!(received, b"+[db0 127.0.0.1:1]: \"get x\"\r\n".to_vec());
    }

    #[test]
    fn format_echo_has_expected_shape() {
        let argv = vec![b"get".to_vec(), b"x".to_vec()];
        let line = format_echo(3, "127.0.0.1:5555", &argv, 4096);
        assert_eq!(line, b"+[db3 127.0.0.1:5555]: \"get x\"\r\n".to_vec());
    }

    #[test]
    fn format_echo_truncates_and_still_terminates() {
        let argv = vec![
            b"set".to_vec(),
            b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_vec(),
            b"bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_vec(),
        ];
        let line = format_echo(0, "127.0.0.1:1", &argv, 40);
        assert!(line.ends_with(b"\"\r\n"));
        assert!(line.len() <= 40);
    }
}
