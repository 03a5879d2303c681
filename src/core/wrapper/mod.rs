#![allow(clippy::result_large_err)] // Wrapper synthesis returns AppError directly for structured diagnostics.

use crate::core::catalog::{ToolCatalog, ToolDefinition};
use crate::core::dispatch::ToolDispatcher;
use crate::core::entities::{ToolCallRecord, ToolOutcome};
use crate::core::error::AppError;
use crate::core::sandbox::validator::RESERVED_CAPABILITY_TABLE;
use crate::core::types::{CallerKind, ErrorCategory, ErrorKind, ToolKind};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map as JsonMap, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Function names the sandbox reserves for itself; tools may not shadow them.
const RESERVED_CALLABLE_NAMES: &[&str] = &[
    "print",
    "debug",
    "eval",
    "sleep",
    "spawn_tool",
    "join_tools",
    RESERVED_CAPABILITY_TABLE,
];

/// Per-execution call accounting: the append-only call log, the issuance
/// counter enforcing the call budget, the pending fan-out task map, and the
/// wall-clock deadline shared with every wrapper. Created fresh for each
/// `execute` call; nothing here outlives it.
pub struct CallTracker {
    max_tool_calls: usize,
    issued: AtomicUsize,
    log: Mutex<Vec<ToolCallRecord>>,
    pending: DashMap<i64, JoinHandle<ToolOutcome>>,
    next_task_id: AtomicI64,
    deadline: OnceLock<Instant>,
}

impl CallTracker {
    pub fn new(max_tool_calls: usize) -> Self {
        Self {
            max_tool_calls,
            issued: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
            pending: DashMap::new(),
            next_task_id: AtomicI64::new(1),
            deadline: OnceLock::new(),
        }
    }

    /// Set once by the sandbox at run start. Later calls are ignored.
    pub fn set_deadline(&self, deadline: Instant) {
        let _ = self.deadline.set(deadline);
    }

    /// Wall-clock time left before the sandbox's timer expires.
    pub fn remaining_time(&self) -> Duration {
        match self.deadline.get() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }

    /// Reserve one slot of the call budget. Fails with a local outcome once
    /// the ceiling is reached; the offending call never dispatches.
    pub fn try_reserve(&self) -> Result<usize, ToolOutcome> {
        let mut current = self.issued.load(Ordering::SeqCst);
        loop {
            if current >= self.max_tool_calls {
                return Err(ToolOutcome::failure(
                    ErrorKind::ExceededMaxToolCalls,
                    format!("exceeded max tool calls ({})", self.max_tool_calls),
                ));
            }
            match self.issued.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(current + 1),
                Err(observed) => current = observed,
            }
        }
    }

    pub fn record(&self, record: ToolCallRecord) {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }

    pub fn log_len(&self) -> usize {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn drain_log(&self) -> Vec<ToolCallRecord> {
        std::mem::take(
            &mut *self
                .log
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    pub fn register_task(&self, handle: JoinHandle<ToolOutcome>) -> i64 {
        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        self.pending.insert(id, handle);
        id
    }

    pub fn take_task(&self, id: i64) -> Option<JoinHandle<ToolOutcome>> {
        self.pending.remove(&id).map(|(_, handle)| handle)
    }

    /// Remove and return every fan-out task still in flight. The sandbox
    /// waits on these after evaluation so no dispatch outlives its run.
    pub fn take_pending(&self) -> Vec<JoinHandle<ToolOutcome>> {
        let ids: Vec<i64> = self.pending.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|(_, handle)| handle))
            .collect()
    }

    /// Cancel every fan-out task still in flight. Called when the sandbox's
    /// timer expires so the run never hangs on an external collaborator.
    pub fn abort_pending(&self) {
        self.pending.retain(|_, handle| {
            handle.abort();
            false
        });
    }
}

/// Callable proxy for exactly one tool definition.
pub struct WrappedTool {
    definition: ToolDefinition,
    kind_noun: &'static str,
    dispatcher: Arc<dyn ToolDispatcher>,
    tracker: Arc<CallTracker>,
    execution_id: Uuid,
}

impl WrappedTool {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn kind(&self) -> ToolKind {
        self.definition.kind
    }

    fn missing_required(&self, parameters: &JsonMap<String, Value>) -> Vec<String> {
        self.definition
            .required_parameter_names()
            .into_iter()
            .filter(|name| !parameters.contains_key(*name))
            .map(|name| name.to_string())
            .collect()
    }

    /// Invoke the tool with named parameters. Validation and budget failures
    /// are local outcomes: the program decides how to react. Every dispatched
    /// call, successful or not, appends one record to the call log.
    pub async fn call(&self, parameters: JsonMap<String, Value>) -> ToolOutcome {
        let missing = self.missing_required(&parameters);
        if !missing.is_empty() {
            tracing::warn!(
                tool = %self.definition.name,
                missing = %missing.join(", "),
                "tool call rejected: missing required parameters"
            );
            return ToolOutcome::failure(
                ErrorKind::MissingRequiredParameters,
                format!(
                    "missing required parameters for {}: {}",
                    self.definition.name,
                    missing.join(", ")
                ),
            );
        }

        if let Err(outcome) = self.tracker.try_reserve() {
            tracing::warn!(tool = %self.definition.name, "tool call rejected: budget exhausted");
            return outcome;
        }

        let started_at = Utc::now();
        let start = Instant::now();
        let remaining = self.tracker.remaining_time();
        let outcome = if remaining.is_zero() {
            ToolOutcome::failure(
                ErrorKind::Timeout,
                "execution deadline reached before dispatch",
            )
        } else {
            match tokio::time::timeout(
                remaining,
                self.dispatcher
                    .invoke(&self.definition.name, parameters.clone()),
            )
            .await
            {
                Ok(Ok(value)) => ToolOutcome::success(value),
                Ok(Err(err)) => {
                    tracing::warn!(tool = %self.definition.name, "{} dispatch failed: {}", self.kind_noun, err.message);
                    ToolOutcome::failure(
                        ErrorKind::ToolDispatchFailure,
                        format!("{} dispatch failed: {}", self.kind_noun, err.message),
                    )
                }
                Err(_) => ToolOutcome::failure(
                    ErrorKind::Timeout,
                    "tool dispatch cancelled by execution deadline",
                ),
            }
        };

        let completed_at = Utc::now();
        let result_size_bytes = outcome
            .result
            .as_ref()
            .and_then(|value| serde_json::to_vec(value).ok())
            .map(|bytes| bytes.len() as u64)
            .unwrap_or(0);
        self.tracker.record(ToolCallRecord {
            tool_name: self.definition.name.clone(),
            tool_kind: self.definition.kind,
            parameters: Value::Object(parameters),
            started_at,
            completed_at,
            duration_ms: start.elapsed().as_millis() as u64,
            result_size_bytes,
            execution_id: self.execution_id,
            caller: CallerKind::Programmatic,
        });
        tracing::debug!(
            tool = %self.definition.name,
            ok = outcome.ok,
            result_size_bytes,
            "tool call completed"
        );
        outcome
    }
}

/// The set of callable proxies synthesized from one catalog, ready for
/// injection into a sandbox namespace.
pub struct WrapperSet {
    tools: HashMap<String, Arc<WrappedTool>>,
    order: Vec<String>,
    tracker: Arc<CallTracker>,
}

impl WrapperSet {
    pub fn build(
        catalog: &ToolCatalog,
        dispatcher: Arc<dyn ToolDispatcher>,
        tracker: Arc<CallTracker>,
        execution_id: Uuid,
    ) -> Result<Self, AppError> {
        let mut tools = HashMap::with_capacity(catalog.len());
        let mut order = Vec::with_capacity(catalog.len());
        for (name, definition) in catalog.iter() {
            validate_callable_name(name)?;
            // Exhaustive over capability kinds: adding one forces a decision
            // about how its dispatch failures read.
            let kind_noun = match definition.kind {
                ToolKind::Function => "function",
                ToolKind::Mcp => "remote procedure",
                ToolKind::CodeExec => "code execution tool",
                ToolKind::Agent => "sub-agent",
            };
            tools.insert(
                name.clone(),
                Arc::new(WrappedTool {
                    definition: definition.clone(),
                    kind_noun,
                    dispatcher: dispatcher.clone(),
                    tracker: tracker.clone(),
                    execution_id,
                }),
            );
            order.push(name.clone());
        }
        Ok(Self {
            tools,
            order,
            tracker,
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<WrappedTool>> {
        self.tools.get(name).cloned()
    }

    /// Wrapped tools in catalog registration order.
    pub fn tools(&self) -> Vec<Arc<WrappedTool>> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name).cloned())
            .collect()
    }

    pub fn index(&self) -> Arc<HashMap<String, Arc<WrappedTool>>> {
        Arc::new(self.tools.clone())
    }

    pub fn tracker(&self) -> Arc<CallTracker> {
        self.tracker.clone()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn validate_callable_name(name: &str) -> Result<(), AppError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_start || !valid_rest {
        return Err(AppError::new(
            ErrorCategory::ValidationError,
            format!("tool name is not an injectable identifier: {}", name),
        )
        .with_code("WRP-GEN-001"));
    }
    if RESERVED_CALLABLE_NAMES.contains(&name) {
        return Err(AppError::new(
            ErrorCategory::ValidationError,
            format!("tool name shadows a reserved callable: {}", name),
        )
        .with_code("WRP-GEN-002"));
    }
    Ok(())
}
