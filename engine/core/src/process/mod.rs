//! Local Process Management
//!
//! Spawning, health checking and shutting down the local inference server.
//! [`ProcessSupervisor`] is the entry point; the other modules are the
//! pieces it is built from and are public for adapters that run their own
//! processes.

pub mod binary;
pub mod diagnostics;
pub mod health;
pub mod port;
pub mod shutdown;
mod supervisor;

pub use binary::resolve_binary;
pub use diagnostics::DiagnosticLog;
pub use health::{HealthPolicy, WaitOutcome};
pub use shutdown::{terminate_child, ShutdownStep};
pub use supervisor::{ProcessSupervisor, ReadyState, SessionInfo, SupervisorConfig};
