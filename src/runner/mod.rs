//! Stage orchestration: the pipeline and its lifecycle types

mod pipeline;
mod stage;

pub use pipeline::Pipeline;
pub use stage::{StageOutcome, StagePhase, StageStats};
