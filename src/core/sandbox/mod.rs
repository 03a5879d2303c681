pub mod convert;
pub mod validator;

use crate::core::entities::{ExecutionResult, ResourceLimits, ToolOutcome};
use crate::core::error::AppError;
use crate::core::sandbox::convert::{from_dynamic, map_to_json, to_dynamic};
use crate::core::sandbox::validator::{SecurityValidator, RESERVED_CAPABILITY_TABLE};
use crate::core::types::ErrorKind;
use crate::core::wrapper::{CallTracker, WrappedTool, WrapperSet};
use futures::future::join_all;
use rhai::packages::{
    BasicArrayPackage, BasicIteratorPackage, BasicMapPackage, BasicMathPackage, CorePackage,
    LogicPackage, MoreStringPackage, Package,
};
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, Scope};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Extra wall-clock slack granted to the blocking evaluation task beyond the
/// configured ceiling, so the engine's own progress guard gets the first
/// chance to terminate cleanly.
const TIMEOUT_GRACE: Duration = Duration::from_millis(250);

/// Outcome of the blocking evaluation task, before classification.
enum EvalOutcome {
    Value(Dynamic),
    Parse(String),
    Eval(Box<EvalAltResult>),
}

/// Isolated execution environment. Owns static validation and the rhai
/// engine configuration; every call runs in a fresh namespace with capture
/// buffers and a hard wall-clock ceiling. Never lets an evaluation error
/// escape as a panic or an `Err`; each path folds into an ExecutionResult.
pub struct SandboxEnvironment {
    limits: ResourceLimits,
    validator: Arc<SecurityValidator>,
}

impl SandboxEnvironment {
    pub fn new(limits: ResourceLimits, validator: Arc<SecurityValidator>) -> Self {
        Self { limits, validator }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Static security and syntax validation. Always runs before `execute`;
    /// no execution occurs on a rejected program.
    pub fn validate(&self, program_text: &str) -> Result<(), AppError> {
        self.validator.validate(program_text)
    }

    /// Run a validated program to completion or until a limit trips.
    pub async fn execute(
        &self,
        code: &str,
        context: &HashMap<String, Value>,
        wrappers: &WrapperSet,
        limits_override: Option<&ResourceLimits>,
    ) -> ExecutionResult {
        let limits = limits_override.unwrap_or(&self.limits);
        let max_duration = Duration::from_secs(limits.max_duration_seconds.clamp(1, 86_400));
        let started = Instant::now();
        let deadline = started + max_duration;

        let tracker = wrappers.tracker();
        tracker.set_deadline(deadline);

        let stdout = Arc::new(Mutex::new(String::new()));
        let stderr = Arc::new(Mutex::new(String::new()));

        let handle = Handle::current();
        let program = code.to_string();
        let context = context.clone();
        let tools = wrappers.tools();
        let tool_index = wrappers.index();
        let max_memory_mb = limits.max_memory_mb;
        let task_tracker = tracker.clone();
        let task_stdout = stdout.clone();
        let task_stderr = stderr.clone();

        let eval_task = tokio::task::spawn_blocking(move || {
            let mut engine = build_engine(max_memory_mb, deadline, &task_stdout, &task_stderr);

            for tool in &tools {
                let fn_name = tool.name().to_string();
                let tool = tool.clone();
                let handle = handle.clone();
                engine.register_fn(fn_name, move |params: Map| -> Map {
                    let outcome = handle.block_on(tool.call(map_to_json(params)));
                    outcome_to_map(outcome)
                });
            }

            register_fanout_primitives(&mut engine, &handle, &tool_index, &task_tracker);
            register_sleep(&mut engine, &handle, deadline);

            let mut scope = Scope::new();
            for (name, value) in &context {
                scope.push_constant_dynamic(name.clone(), to_dynamic(value));
            }
            scope.push_constant_dynamic(
                RESERVED_CAPABILITY_TABLE,
                capability_table(&tool_index),
            );

            let ast = match engine.compile(&program) {
                Ok(ast) => ast,
                Err(err) => return EvalOutcome::Parse(err.to_string()),
            };
            match engine.eval_ast_with_scope::<Dynamic>(&mut scope, &ast) {
                Ok(value) => EvalOutcome::Value(value),
                Err(err) => EvalOutcome::Eval(err),
            }
        });

        let outcome = tokio::time::timeout(max_duration + TIMEOUT_GRACE, eval_task).await;
        let execution_time_ms = started.elapsed().as_millis() as u64;
        let captured_stdout = read_buffer(&stdout);
        let captured_stderr = read_buffer(&stderr);

        let result = match outcome {
            Err(_) => {
                tracing::warn!(elapsed_ms = execution_time_ms, "sandbox execution timed out");
                ExecutionResult::failure(
                    ErrorKind::Timeout,
                    format!("execution exceeded {} seconds", max_duration.as_secs()),
                    captured_stdout,
                    captured_stderr,
                    execution_time_ms,
                )
            }
            Ok(Err(join_err)) => ExecutionResult::failure(
                ErrorKind::RuntimeError,
                format!("sandbox evaluation task failed: {}", join_err),
                captured_stdout,
                captured_stderr,
                execution_time_ms,
            ),
            Ok(Ok(EvalOutcome::Parse(message))) => {
                // The validator already cleared the text of denylisted
                // names, so an engine-level import rejection is a
                // capability denial, not a malformed program.
                let (kind, message) = if mentions_import(code) {
                    (
                        ErrorKind::SecurityViolation,
                        format!("module import denied: {}", message),
                    )
                } else {
                    (ErrorKind::SyntaxError, format!("syntax error: {}", message))
                };
                ExecutionResult::failure(
                    kind,
                    message,
                    captured_stdout,
                    captured_stderr,
                    execution_time_ms,
                )
            }
            Ok(Ok(EvalOutcome::Eval(err))) => {
                let (kind, message) =
                    classify_eval_error(&err, &self.validator, max_duration.as_secs());
                tracing::debug!(kind = %kind, "sandbox evaluation failed: {}", message);
                ExecutionResult::failure(
                    kind,
                    message,
                    captured_stdout,
                    captured_stderr,
                    execution_time_ms,
                )
            }
            Ok(Ok(EvalOutcome::Value(value))) => ExecutionResult::success(
                from_dynamic(value),
                captured_stdout,
                captured_stderr,
                execution_time_ms,
            ),
        };

        // Settle stray fan-out work before the caller drains the log:
        // timed-out runs abort dispatches in flight, every other run waits
        // for them so each dispatched call lands on the record.
        if result.is_timeout() {
            tracker.abort_pending();
        } else {
            let stray = tracker.take_pending();
            if !stray.is_empty() {
                tracing::debug!(tasks = stray.len(), "settling unjoined tool tasks");
                let _ = join_all(stray).await;
            }
        }
        result
    }
}

/// Build a locked-down engine: allow-listed packages only, dynamic
/// evaluation disabled, print/debug captured, hard ceilings installed.
fn build_engine(
    max_memory_mb: u64,
    deadline: Instant,
    stdout: &Arc<Mutex<String>>,
    stderr: &Arc<Mutex<String>>,
) -> Engine {
    let mut engine = Engine::new_raw();
    engine.register_global_module(CorePackage::new().as_shared_module());
    engine.register_global_module(LogicPackage::new().as_shared_module());
    engine.register_global_module(BasicIteratorPackage::new().as_shared_module());
    engine.register_global_module(BasicArrayPackage::new().as_shared_module());
    engine.register_global_module(BasicMapPackage::new().as_shared_module());
    engine.register_global_module(BasicMathPackage::new().as_shared_module());
    engine.register_global_module(MoreStringPackage::new().as_shared_module());

    engine.disable_symbol("eval");

    engine.set_max_call_levels(64);
    engine.set_max_expr_depths(64, 64);
    // Generous operation ceiling as a backstop; the wall-clock progress
    // guard below is the real limit.
    engine.set_max_operations(5_000_000_000);
    // Advisory memory ceiling mapped onto the engine's value-size caps.
    let cap = (max_memory_mb as usize).saturating_mul(1024);
    engine.set_max_string_size(cap);
    engine.set_max_array_size(cap);
    engine.set_max_map_size(cap);

    let out = stdout.clone();
    engine.on_print(move |text| {
        let mut buffer = out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        buffer.push_str(text);
        buffer.push('\n');
    });
    let err_out = stderr.clone();
    engine.on_debug(move |text, _source, _pos| {
        let mut buffer = err_out
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        buffer.push_str(text);
        buffer.push('\n');
    });

    engine.on_progress(move |_operations| {
        if Instant::now() >= deadline {
            Some("timeout".into())
        } else {
            None
        }
    });

    engine
}

fn register_fanout_primitives(
    engine: &mut Engine,
    handle: &Handle,
    tool_index: &Arc<HashMap<String, Arc<WrappedTool>>>,
    tracker: &Arc<CallTracker>,
) {
    let spawn_index = tool_index.clone();
    let spawn_handle = handle.clone();
    let spawn_tracker = tracker.clone();
    engine.register_fn(
        "spawn_tool",
        move |name: ImmutableString, params: Map| -> i64 {
            let parameters = map_to_json(params);
            let task: JoinHandle<ToolOutcome> = match spawn_index.get(name.as_str()) {
                Some(tool) => {
                    let tool = tool.clone();
                    spawn_handle.spawn(async move { tool.call(parameters).await })
                }
                None => {
                    let outcome = ToolOutcome::failure(
                        ErrorKind::ToolDispatchFailure,
                        format!("unknown tool: {}", name),
                    );
                    spawn_handle.spawn(async move { outcome })
                }
            };
            spawn_tracker.register_task(task)
        },
    );

    let join_handle = handle.clone();
    let join_tracker = tracker.clone();
    engine.register_fn("join_tools", move |ids: Array| -> Array {
        let mut results: Vec<ToolOutcome> = Vec::with_capacity(ids.len());
        let mut slots: Vec<usize> = Vec::new();
        let mut tasks: Vec<JoinHandle<ToolOutcome>> = Vec::new();
        for id in &ids {
            let task_id = id.as_int().unwrap_or(-1);
            match join_tracker.take_task(task_id) {
                Some(task) => {
                    slots.push(results.len());
                    results.push(ToolOutcome::failure(ErrorKind::RuntimeError, "pending"));
                    tasks.push(task);
                }
                None => results.push(ToolOutcome::failure(
                    ErrorKind::RuntimeError,
                    format!("unknown task handle: {}", task_id),
                )),
            }
        }
        // The group's combined result is released only once every member
        // has completed or failed.
        let joined = join_handle.block_on(join_all(tasks));
        for (slot, joined_outcome) in slots.into_iter().zip(joined) {
            results[slot] = joined_outcome.unwrap_or_else(|err| {
                ToolOutcome::failure(
                    ErrorKind::RuntimeError,
                    format!("tool task failed: {}", err),
                )
            });
        }
        results
            .into_iter()
            .map(|outcome| Dynamic::from_map(outcome_to_map(outcome)))
            .collect()
    });
}

/// Host-level waiting primitive. Sleeps are capped at the execution deadline
/// so the progress guard regains control immediately after expiry.
fn register_sleep(engine: &mut Engine, handle: &Handle, deadline: Instant) {
    let float_handle = handle.clone();
    engine.register_fn("sleep", move |seconds: f64| {
        let requested = Duration::from_secs_f64(seconds.max(0.0));
        let capped = requested.min(deadline.saturating_duration_since(Instant::now()));
        float_handle.block_on(tokio::time::sleep(capped));
    });
    let int_handle = handle.clone();
    engine.register_fn("sleep", move |seconds: i64| {
        let requested = Duration::from_secs(seconds.max(0) as u64);
        let capped = requested.min(deadline.saturating_duration_since(Instant::now()));
        int_handle.block_on(tokio::time::sleep(capped));
    });
}

/// Read-only capability table exposed under the reserved identifier: tool
/// name -> capability kind.
fn capability_table(tool_index: &Arc<HashMap<String, Arc<WrappedTool>>>) -> Dynamic {
    let mut table = Map::new();
    for (name, tool) in tool_index.iter() {
        table.insert(name.into(), Dynamic::from(tool.kind().as_str().to_string()));
    }
    Dynamic::from_map(table)
}

fn outcome_to_map(outcome: ToolOutcome) -> Map {
    let mut map = Map::new();
    map.insert("ok".into(), Dynamic::from(outcome.ok));
    map.insert(
        "result".into(),
        outcome
            .result
            .as_ref()
            .map(to_dynamic)
            .unwrap_or(Dynamic::UNIT),
    );
    map.insert(
        "error".into(),
        outcome
            .error
            .map(Dynamic::from)
            .unwrap_or(Dynamic::UNIT),
    );
    map.insert(
        "kind".into(),
        outcome
            .kind
            .map(|kind| Dynamic::from(kind.as_str().to_string()))
            .unwrap_or(Dynamic::UNIT),
    );
    map
}

/// Whether the program text contains an `import` statement token. Used to
/// classify engine-level parse rejections of imports as capability denials.
fn mentions_import(code: &str) -> bool {
    code.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .any(|token| token == "import")
}

fn read_buffer(buffer: &Arc<Mutex<String>>) -> String {
    buffer
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// Map an evaluation error onto the public failure taxonomy. Calls the
/// static validator could not see ahead of time (dynamically constructed
/// capability access) classify as security violations here.
fn classify_eval_error(
    err: &EvalAltResult,
    validator: &SecurityValidator,
    max_duration_secs: u64,
) -> (ErrorKind, String) {
    match err {
        EvalAltResult::ErrorTerminated(token, _) => {
            if token.to_string() == "timeout" {
                (
                    ErrorKind::Timeout,
                    format!("execution exceeded {} seconds", max_duration_secs),
                )
            } else {
                (
                    ErrorKind::SecurityViolation,
                    format!("execution terminated: {}", token),
                )
            }
        }
        EvalAltResult::ErrorFunctionNotFound(signature, _) => {
            if validator.is_denied_symbol(signature) {
                (
                    ErrorKind::SecurityViolation,
                    format!("call to denylisted primitive: {}", signature),
                )
            } else {
                (ErrorKind::RuntimeError, err.to_string())
            }
        }
        _ => (ErrorKind::RuntimeError, err.to_string()),
    }
}
