#![allow(clippy::result_large_err)] // Constructor returns AppError to preserve which catalog entry was rejected.

use crate::core::catalog::ToolCatalog;
use crate::core::dispatch::ToolDispatcher;
use crate::core::entities::{ExecutionResult, ExecutorConfig, ResourceLimits};
use crate::core::error::AppError;
use crate::core::sandbox::validator::SecurityValidator;
use crate::core::sandbox::SandboxEnvironment;
use crate::core::wrapper::{CallTracker, WrapperSet};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Runs model-generated programs against a catalog of tools. Owns one
/// sandbox environment and the wrapper layer; tracks and budgets every tool
/// invocation. Reusable across sequential `execute` calls: the call log and
/// counter are rebuilt per call, while the catalog, limits, and execution id
/// are stable for the executor's lifetime.
pub struct ProgrammaticToolExecutor {
    execution_id: Uuid,
    catalog: ToolCatalog,
    dispatcher: Arc<dyn ToolDispatcher>,
    config: ExecutorConfig,
    sandbox: SandboxEnvironment,
    cleaned_up: AtomicBool,
}

impl std::fmt::Debug for ProgrammaticToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgrammaticToolExecutor")
            .field("execution_id", &self.execution_id)
            .field("tools", &self.catalog.len())
            .field("max_tool_calls", &self.config.max_tool_calls)
            .finish_non_exhaustive()
    }
}

impl ProgrammaticToolExecutor {
    /// Build an executor. Fails if a catalog entry cannot be injected into
    /// the sandbox namespace (invalid or reserved name). The validator's
    /// denylist is fixed here from the configured limits; per-call limit
    /// overrides adjust duration and memory ceilings only.
    pub fn new(
        catalog: ToolCatalog,
        dispatcher: Arc<dyn ToolDispatcher>,
        config: ExecutorConfig,
    ) -> Result<Self, AppError> {
        let execution_id = Uuid::new_v4();
        // Surface uninjectable tool names at construction, not mid-run.
        let probe_tracker = Arc::new(CallTracker::new(0));
        WrapperSet::build(&catalog, dispatcher.clone(), probe_tracker, execution_id)?;

        let validator = Arc::new(SecurityValidator::new(
            &config.limits,
            &config.extra_allowed_modules,
        )?);
        let sandbox = SandboxEnvironment::new(config.limits.clone(), validator);

        Ok(Self {
            execution_id,
            catalog,
            dispatcher,
            config,
            sandbox,
            cleaned_up: AtomicBool::new(false),
        })
    }

    /// Stable identity attached to every tool call record this executor
    /// produces, so concurrent callers can attribute log entries.
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn max_tool_calls(&self) -> usize {
        self.config.max_tool_calls
    }

    /// Execute a program with the configured limits.
    pub async fn execute(
        &self,
        program_text: &str,
        context: &HashMap<String, Value>,
    ) -> ExecutionResult {
        self.execute_with_limits(program_text, context, None).await
    }

    /// Execute a program, optionally overriding duration/memory ceilings for
    /// this call. Never returns an error: every path, including validator
    /// rejections and internal failures, folds into an ExecutionResult.
    pub async fn execute_with_limits(
        &self,
        program_text: &str,
        context: &HashMap<String, Value>,
        limits_override: Option<ResourceLimits>,
    ) -> ExecutionResult {
        let started = Instant::now();
        tracing::debug!(execution_id = %self.execution_id, "validating program");

        if let Err(err) = self.sandbox.validate(program_text) {
            tracing::warn!(
                execution_id = %self.execution_id,
                code = %err.code,
                "program rejected: {}",
                err.message
            );
            return ExecutionResult::failure(
                err.error_kind(),
                err.message,
                String::new(),
                String::new(),
                started.elapsed().as_millis() as u64,
            );
        }

        // Fresh per-call state: call log, counter, and fan-out task map.
        let tracker = Arc::new(CallTracker::new(self.config.max_tool_calls));
        let wrappers = match WrapperSet::build(
            &self.catalog,
            self.dispatcher.clone(),
            tracker.clone(),
            self.execution_id,
        ) {
            Ok(wrappers) => wrappers,
            Err(err) => {
                return ExecutionResult::failure(
                    err.error_kind(),
                    err.message,
                    String::new(),
                    String::new(),
                    started.elapsed().as_millis() as u64,
                )
            }
        };

        tracing::debug!(
            execution_id = %self.execution_id,
            tools = wrappers.len(),
            "executing program in sandbox"
        );
        let result = self
            .sandbox
            .execute(program_text, context, &wrappers, limits_override.as_ref())
            .await;

        let tool_calls = tracker.drain_log();
        tracing::info!(
            execution_id = %self.execution_id,
            success = result.success,
            tool_calls = tool_calls.len(),
            duration_ms = result.execution_time_ms,
            "execution finished"
        );
        result.with_tool_calls(tool_calls)
    }

    /// Release collaborator resources. Idempotent: only the first call
    /// reaches the dispatcher.
    pub async fn cleanup(&self) -> Result<(), AppError> {
        if self.cleaned_up.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!(execution_id = %self.execution_id, "closing tool dispatcher");
        self.dispatcher.close().await
    }
}
