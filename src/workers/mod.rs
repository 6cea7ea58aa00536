pub mod queue;
pub mod sweep;
pub mod transcoder;

pub use queue::{QueueError, TranscodeQueue, TranscodeTask, TranscodeWorkers};
pub use transcoder::{ProcessOutcome, RunClaim, TranscodeOrchestrator};
