//! Per-thread "current session" context, read by monitor fan-out and dirty
//! notification while a command is executing. Replaces the original
//! implementation's process-wide static client pointer with a scoped,
//! per-thread slot: set at dispatch entry, cleared when the guard drops, and
//! never observable outside that window.

use crate::session::SessionId;
use std::cell::Cell;

thread_local! {
    static CURRENT: Cell<Option<SessionId>> = Cell::new(None);
}

/// Returns the session id currently dispatching a command on this thread, if
/// any.
pub fn current() -> Option<SessionId> {
    CURRENT.with(|c| c.get())
}

/// Sets the current session for the lifetime of the returned guard. Nesting
/// is not supported: the guard restores whatever was set before it (usually
/// `None`), so callers must not call `enter` again before the previous
/// guard drops.
#[must_use]
pub struct CurrentSessionGuard {
    previous: Option<SessionId>,
}

pub fn enter(id: SessionId) -> CurrentSessionGuard {
    let previous = CURRENT.with(|c| c.replace(Some(id)));
    CurrentSessionGuard { previous }
}

impl Drop for CurrentSessionGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.previous));
    }
}
