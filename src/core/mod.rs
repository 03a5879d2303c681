pub mod catalog;
pub mod dispatch;
pub mod entities;
pub mod error;
pub mod executor;
pub mod sandbox;
pub mod types;
pub mod wrapper;

pub use catalog::{ToolCatalog, ToolDefinition, ToolParameterSpec};
pub use dispatch::{FnToolDispatcher, ToolDispatcher};
pub use entities::{
    ExecutionResult, ExecutorConfig, ResourceLimits, ToolCallRecord, ToolOutcome,
    DEFAULT_MAX_TOOL_CALLS,
};
pub use error::{AppError, DefaultErrorReporter, ErrorReporter};
pub use executor::ProgrammaticToolExecutor;
pub use sandbox::validator::SecurityValidator;
pub use sandbox::SandboxEnvironment;
pub use types::*;
pub use wrapper::{CallTracker, WrappedTool, WrapperSet};
