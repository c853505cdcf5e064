//! Ratchet CI - external analyzer and type-checker stages
//!
//! Provides the command-backed capabilities a campaign runs against:
//! - An analyzer stage (eslint) whose output feeds the signal collector
//! - A gate of checker stages (tsc, tests) validating every trial

pub mod analyzer;
pub mod gate;
pub mod runner;
pub mod stage;

// Re-export key types
pub use analyzer::CommandAnalyzer;
pub use gate::{CommandGate, GateVerdict};
pub use runner::{StageError, StageResult, StageRunner};
pub use stage::{BuiltinStage, StageConfig};
