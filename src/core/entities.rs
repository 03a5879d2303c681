use crate::core::types::{CallerKind, ErrorKind, ToolKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Ceilings one execution must respect. Memory and CPU are advisory;
/// duration is a hard wall-clock limit enforced by the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_duration_seconds: u64,
    pub max_memory_mb: u64,
    pub max_cpu_percent: u8,
    pub allow_network: bool,
    pub allow_file_io: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_duration_seconds: 30,
            max_memory_mb: 512,
            max_cpu_percent: 50,
            allow_network: false,
            allow_file_io: false,
        }
    }
}

/// Constructor-injected executor configuration. Replaces any process-wide
/// mutable state: built once, cached on the executor instance.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub limits: ResourceLimits,
    pub max_tool_calls: usize,
    pub extra_allowed_modules: Vec<String>,
}

impl ExecutorConfig {
    pub fn new(limits: ResourceLimits, max_tool_calls: usize) -> Self {
        Self {
            limits,
            max_tool_calls,
            extra_allowed_modules: Vec::new(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::new(ResourceLimits::default(), DEFAULT_MAX_TOOL_CALLS)
    }
}

pub const DEFAULT_MAX_TOOL_CALLS: usize = 50;

/// One entry in the per-execution call log. Append-only, scoped to a single
/// `execute` call, stamped with the owning executor's execution id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub tool_kind: ToolKind,
    pub parameters: Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub result_size_bytes: u64,
    pub execution_id: Uuid,
    pub caller: CallerKind,
}

/// Structured per-call value handed back to the sandboxed program instead of
/// letting dispatch errors escape unstructured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl ToolOutcome {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
            kind: None,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(message.into()),
            kind: Some(kind),
        }
    }
}

/// Outcome of one sandboxed execution. Invariant: `error_kind` is set if and
/// only if `success` is false; `stdout`/`stderr` always hold everything the
/// program emitted before the failure point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub execution_time_ms: u64,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
}

impl ExecutionResult {
    pub fn success(output: Value, stdout: String, stderr: String, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            output: Some(output),
            stdout,
            stderr,
            error: None,
            error_kind: None,
            execution_time_ms,
            tool_calls: Vec::new(),
        }
    }

    pub fn failure(
        kind: ErrorKind,
        message: impl Into<String>,
        stdout: String,
        stderr: String,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            success: false,
            output: None,
            stdout,
            stderr,
            error: Some(message.into()),
            error_kind: Some(kind),
            execution_time_ms,
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRecord>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.error_kind == Some(ErrorKind::Timeout)
    }

    pub fn is_security_violation(&self) -> bool {
        self.error_kind == Some(ErrorKind::SecurityViolation)
    }
}
