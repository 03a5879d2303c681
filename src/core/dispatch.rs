#![allow(clippy::result_large_err)] // Dispatchers return AppError directly for structured diagnostics without boxing.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value};
use std::future::Future;
use std::pin::Pin;

/// External collaborator that performs the actual tool invocation. The
/// executor core never implements transport; it only calls this seam from
/// inside a tool wrapper. Implementations must be safe for concurrent
/// invocation from multiple in-flight wrapper calls.
#[async_trait]
pub trait ToolDispatcher: Send + Sync + 'static {
    /// Invoke the named tool with validated parameters.
    async fn invoke(&self, tool_name: &str, parameters: JsonMap<String, Value>)
        -> Result<Value, AppError>;

    /// Release any held resources. Called once by `Executor::cleanup`.
    async fn close(&self) -> Result<(), AppError> {
        Ok(())
    }
}

type DispatchFn = dyn Fn(
        String,
        JsonMap<String, Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, AppError>> + Send>>
    + Send
    + Sync;

/// Dispatcher backed by a plain async closure. Used by the test suites and
/// by embedders that resolve tools in-process.
pub struct FnToolDispatcher {
    handler: Box<DispatchFn>,
}

impl FnToolDispatcher {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(String, JsonMap<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, AppError>> + Send + 'static,
    {
        Self {
            handler: Box::new(move |name, params| Box::pin(handler(name, params))),
        }
    }
}

#[async_trait]
impl ToolDispatcher for FnToolDispatcher {
    async fn invoke(
        &self,
        tool_name: &str,
        parameters: JsonMap<String, Value>,
    ) -> Result<Value, AppError> {
        (self.handler)(tool_name.to_string(), parameters).await
    }
}

/// Convenience constructor for a dispatcher that always fails, useful when a
/// catalog entry is known but its backend is unavailable.
pub fn unavailable_dispatcher(reason: &str) -> FnToolDispatcher {
    let reason = reason.to_string();
    FnToolDispatcher::new(move |name, _| {
        let reason = reason.clone();
        async move {
            Err(AppError::new(
                ErrorCategory::DispatchError,
                format!("tool {} unavailable: {}", name, reason),
            )
            .with_code("DSP-UNAVAIL-001"))
        }
    })
}
