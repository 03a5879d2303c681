use chrono::Utc;
use crucible::core::{
    CallerKind, ErrorKind, ExecutionResult, ExecutorConfig, ResourceLimits, ToolCallRecord,
    ToolKind, ToolOutcome, DEFAULT_MAX_TOOL_CALLS,
};
use serde_json::{json, Value};
use uuid::Uuid;

#[test]
fn test_resource_limits_defaults() {
    let limits = ResourceLimits::default();
    assert_eq!(limits.max_duration_seconds, 30);
    assert_eq!(limits.max_memory_mb, 512);
    assert_eq!(limits.max_cpu_percent, 50);
    assert!(!limits.allow_network);
    assert!(!limits.allow_file_io);
}

#[test]
fn test_executor_config_construction() {
    let config = ExecutorConfig::new(ResourceLimits::default(), 10);
    assert_eq!(config.max_tool_calls, 10);
    assert!(config.extra_allowed_modules.is_empty());
    assert_eq!(
        ExecutorConfig::default().max_tool_calls,
        DEFAULT_MAX_TOOL_CALLS
    );
}

#[test]
fn test_execution_result_invariant() {
    let ok = ExecutionResult::success(json!(3), "3\n".into(), String::new(), 5);
    assert!(ok.success);
    assert!(ok.error_kind.is_none() && ok.error.is_none());

    let failed = ExecutionResult::failure(
        ErrorKind::SecurityViolation,
        "import of denylisted capability module: os",
        String::new(),
        String::new(),
        1,
    );
    assert!(!failed.success);
    assert_eq!(failed.error_kind, Some(ErrorKind::SecurityViolation));
    assert!(failed.is_security_violation());
}

#[test]
fn test_error_kind_labels() {
    assert_eq!(ErrorKind::SecurityViolation.as_str(), "security violation");
    assert_eq!(ErrorKind::Timeout.as_str(), "timeout");
    assert_eq!(ErrorKind::SyntaxError.as_str(), "syntax error");
    assert_eq!(ErrorKind::RuntimeError.as_str(), "runtime error");
    assert_eq!(
        ErrorKind::MissingRequiredParameters.as_str(),
        "missing required parameters"
    );
    assert_eq!(
        ErrorKind::ToolDispatchFailure.as_str(),
        "tool dispatch failure"
    );
    assert_eq!(
        ErrorKind::ExceededMaxToolCalls.as_str(),
        "exceeded max tool calls"
    );
}

#[test]
fn test_tool_call_record_serialization() {
    let now = Utc::now();
    let record = ToolCallRecord {
        tool_name: "add".into(),
        tool_kind: ToolKind::Function,
        parameters: json!({"a": 5, "b": 3}),
        started_at: now,
        completed_at: now,
        duration_ms: 12,
        result_size_bytes: 7,
        execution_id: Uuid::new_v4(),
        caller: CallerKind::Programmatic,
    };
    let encoded = serde_json::to_value(&record).unwrap();
    assert_eq!(encoded["tool_name"], json!("add"));
    assert_eq!(encoded["tool_kind"], json!("function"));
    assert_eq!(encoded["caller"], json!("programmatic"));
    assert_eq!(encoded["parameters"]["a"], json!(5));
}

#[test]
fn test_tool_outcome_constructors() {
    let ok = ToolOutcome::success(json!({"result": 8}));
    assert!(ok.ok);
    assert_eq!(ok.result.unwrap()["result"], json!(8));
    assert!(ok.error.is_none());

    let failed = ToolOutcome::failure(ErrorKind::ExceededMaxToolCalls, "exceeded max tool calls (3)");
    assert!(!failed.ok);
    assert!(failed.result.is_none());
    assert_eq!(failed.kind, Some(ErrorKind::ExceededMaxToolCalls));
}

#[test]
fn test_execution_result_round_trip() {
    let result = ExecutionResult::success(Value::Null, String::new(), String::new(), 3);
    let encoded = serde_json::to_string(&result).unwrap();
    let decoded: ExecutionResult = serde_json::from_str(&encoded).unwrap();
    assert!(decoded.success);
    assert_eq!(decoded.execution_time_ms, 3);
    assert!(decoded.tool_calls.is_empty());
}
