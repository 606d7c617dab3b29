pub mod window;
pub mod retry;
pub mod batcher;
pub mod synchronizer;

pub use window::WindowPlanner;
pub use retry::RetryingCaller;
pub use batcher::{BatchRun, CancelFlag, QuotaBatcher, TaskOutcome, TaskState};
pub use synchronizer::{SyncSummary, Synchronizer};
