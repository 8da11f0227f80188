pub mod collaborators;
pub mod current;
pub mod dirty;
pub mod errors;
pub mod flags;
pub mod gate;
pub mod monitor;
pub mod session;

pub use collaborators::{CommandAttrs, CommandInfo, CommandTable, MasterState, ReplySink, Replication, SlowLog, Store};
pub use dirty::DirtyBroker;
pub use errors::{CommandError, ResourceError};
pub use flags::SessionFlags;
pub use gate::{GateOutcome, ReplicationGate};
pub use monitor::{MonitorHandle, MonitorRegistry};
pub use session::{ClientSession, DispatchContext, DispatchOutcome, SessionId, SlaveInfo};
