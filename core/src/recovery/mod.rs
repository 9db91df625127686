//! Recovery of a relay handshake whose approval wait timed out

pub mod engine;

pub use engine::{RecoveredSession, RecoveryConfig, RecoveryEngine, RecoveryError, RecoveryPhase};
