// Public modules
pub mod archive;
pub mod cancel;
pub mod defaults;
pub mod duration;
pub mod environment;
pub mod error;
pub mod executor;
pub mod format;
pub mod hooks;
pub mod paths;
pub mod pipeline;
pub mod process;
pub mod report;
pub mod step;

// Re-export common types for convenience
pub use cancel::CancelToken;
pub use error::{Error, ErrorCode, Result};
pub use executor::{Executor, RunOptions};
pub use pipeline::{Command, HookEvent, Pipeline, Stage};
pub use report::{RunReport, RunResult, RunStatus, StageStatus};
