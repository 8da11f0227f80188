//! Cross-session dirty-key notification, rearchitected from the original
//! implementation's shared mutable watch-set as message passing: a
//! committing session publishes `(db, key)` events to this broker, which
//! fans them out to each watcher's own mailbox. A session only ever reads
//! its own mailbox, on its own loop, and sets its own `Dirty` flag from it;
//! it never reaches into another session's state.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Mutex;

use indexmap::IndexMap;

use crate::session::SessionId;

type Key = (usize, Vec<u8>);

#[derive(Default)]
pub struct DirtyBroker {
    subscribers: Mutex<HashMap<Key, IndexMap<SessionId, mpsc::Sender<()>>>>,
}

impl DirtyBroker {
    pub fn new() -> DirtyBroker {
        DirtyBroker::default()
    }

    pub fn subscribe(&self, db: usize, key: &[u8], session: SessionId, sender: mpsc::Sender<()>) {
        let mut subs = self.subscribers.lock().expect("dirty broker poisoned");
        subs.entry((db, key.to_vec()))
            .or_insert_with(IndexMap::new)
            .insert(session, sender);
    }

    pub fn unsubscribe(&self, db: usize, key: &[u8], session: SessionId) {
        let mut subs = self.subscribers.lock().expect("dirty broker poisoned");
        let map_key = (db, key.to_vec());
        if let Some(map) = subs.get_mut(&map_key) {
            map.remove(&session);
            if map.is_empty() {
                subs.remove(&map_key);
            }
        }
    }

    /// Called by the committing session once a write to `(db, key)` has
    /// taken effect. Notifies every other subscriber; a send failure just
    /// means that session has already dropped its receiver, and is left for
    /// the next `unsubscribe`/`subscribe` pass to tidy up.
    pub fn publish(&self, db: usize, key: &[u8]) {
        let subs = self.subscribers.lock().expect("dirty broker poisoned");
        if let Some(map) = subs.get(&(db, key.to_vec())) {
            for sender in map.values() {
                let _ = sender.send(());
            }
        }
    }
}
