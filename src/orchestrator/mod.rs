pub mod quality_loop;
pub mod report;
pub mod runner;
pub mod state;

pub use report::{FinalArtifact, LoopExit, StageStatus};
pub use runner::{Orchestrator, OrchestratorConfig, validate_request};
pub use state::{ContextKey, ContextValue, PipelineState, SharedContext, StateEntry};
