// Connection attempt state machine, diagnostics and coordination

pub mod context;
pub mod coordinator;
pub mod diagnostics;
pub mod step;

pub use context::ConnectionLogContext;
pub use coordinator::{ConnectionCoordinator, ConnectionResult};
pub use diagnostics::{DeeplinkDispatch, DeeplinkReturn, DispatchOutcome};
pub use step::{ConnectionStep, RelayState, SessionState};
