use bitflags::bitflags;

bitflags! {
    /// Per-session state bits, checked and set throughout dispatch.
    pub struct SessionFlags: u8 {
        /// Inside a MULTI/EXEC block; subsequent commands are queued.
        const MULTI       = 0b0000_0001;
        /// A command queued during MULTI failed arity validation; EXEC will
        /// fail the whole transaction without executing anything.
        const WRONG_EXEC  = 0b0000_0010;
        /// A watched key was written by another session; EXEC will reply
        /// with a null array instead of running the queue.
        const DIRTY       = 0b0000_0100;
        /// This session is the replication link to our master; its writes
        /// produce no client reply and bypass the replica write-guard.
        const MASTER      = 0b0000_1000;
        /// This session has issued MONITOR and is registered for echo
        /// fan-out.
        const MONITOR     = 0b0001_0000;
    }
}

impl Default for SessionFlags {
    fn default() -> SessionFlags {
        SessionFlags::empty()
    }
}
