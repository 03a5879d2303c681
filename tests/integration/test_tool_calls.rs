use crucible::core::dispatch::unavailable_dispatcher;
use crucible::core::{
    CallerKind, ErrorKind, ExecutorConfig, FnToolDispatcher, ParameterType,
    ProgrammaticToolExecutor, ResourceLimits, ToolCatalog, ToolDefinition, ToolKind,
    ToolParameterSpec,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

fn add_catalog() -> ToolCatalog {
    let mut catalog = ToolCatalog::new();
    catalog
        .register(
            ToolDefinition::new("add", ToolKind::Function, "Add two integers")
                .with_parameter(ToolParameterSpec::required(
                    "a",
                    ParameterType::Integer,
                    "left operand",
                ))
                .with_parameter(ToolParameterSpec::required(
                    "b",
                    ParameterType::Integer,
                    "right operand",
                )),
        )
        .unwrap();
    catalog
}

fn adding_dispatcher() -> Arc<FnToolDispatcher> {
    Arc::new(FnToolDispatcher::new(|_, params| async move {
        let a = params["a"].as_i64().unwrap_or(0);
        let b = params["b"].as_i64().unwrap_or(0);
        Ok(json!(a + b))
    }))
}

fn executor_with_budget(max_tool_calls: usize) -> ProgrammaticToolExecutor {
    ProgrammaticToolExecutor::new(
        add_catalog(),
        adding_dispatcher(),
        ExecutorConfig::new(ResourceLimits::default(), max_tool_calls),
    )
    .unwrap()
}

#[tokio::test]
async fn budget_cuts_off_dispatch_after_the_ceiling() {
    let exec = executor_with_budget(3);
    let program = r#"
        let outcomes = [];
        for i in 0..5 {
            outcomes.push(add(#{a: i, b: 1}));
        }
        outcomes
    "#;
    let result = exec.execute(program, &HashMap::new()).await;
    assert!(result.success, "error: {:?}", result.error);

    // Five outcomes came back to the program but only three dispatched.
    let outcomes = result.output.as_ref().unwrap().as_array().unwrap();
    assert_eq!(outcomes.len(), 5);
    for (i, outcome) in outcomes.iter().take(3).enumerate() {
        assert_eq!(outcome["ok"], json!(true), "outcome {}: {:?}", i, outcome);
        assert_eq!(outcome["result"], json!(i as i64 + 1));
    }
    for outcome in outcomes.iter().skip(3) {
        assert_eq!(outcome["ok"], json!(false));
        assert_eq!(outcome["kind"], json!("exceeded max tool calls"));
    }

    assert_eq!(result.tool_calls.len(), 3);
    for (i, record) in result.tool_calls.iter().enumerate() {
        assert_eq!(record.tool_name, "add");
        assert_eq!(record.parameters["a"], json!(i as i64));
        assert_eq!(record.caller, CallerKind::Programmatic);
    }
}

#[tokio::test]
async fn program_can_recover_from_a_budget_failure() {
    let exec = executor_with_budget(1);
    let program = r#"
        let first = add(#{a: 2, b: 2});
        let second = add(#{a: 9, b: 9});
        if second.ok { second.result } else { first.result }
    "#;
    let result = exec.execute(program, &HashMap::new()).await;
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.output, Some(json!(4)));
    assert_eq!(result.tool_calls.len(), 1);
}

#[tokio::test]
async fn missing_required_parameters_surface_to_the_program() {
    let exec = executor_with_budget(10);
    let program = r#"
        let outcome = add(#{a: 1});
        [outcome.ok, outcome.kind, outcome.error]
    "#;
    let result = exec.execute(program, &HashMap::new()).await;
    assert!(result.success, "error: {:?}", result.error);
    let output = result.output.as_ref().unwrap().as_array().unwrap();
    assert_eq!(output[0], json!(false));
    assert_eq!(output[1], json!("missing required parameters"));
    assert!(output[2].as_str().unwrap().contains("b"));
    // Rejected before dispatch: nothing logged, no budget slot spent.
    assert!(result.tool_calls.is_empty());
}

#[tokio::test]
async fn rejected_calls_do_not_consume_the_budget() {
    let exec = executor_with_budget(2);
    let program = r#"
        add(#{a: 1});
        add(#{});
        let one = add(#{a: 1, b: 1});
        let two = add(#{a: 2, b: 2});
        [one.result, two.result]
    "#;
    let result = exec.execute(program, &HashMap::new()).await;
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.output, Some(json!([2, 4])));
    assert_eq!(result.tool_calls.len(), 2);
}

#[tokio::test]
async fn dispatch_failure_is_structured_and_logged() {
    let exec = ProgrammaticToolExecutor::new(
        add_catalog(),
        Arc::new(unavailable_dispatcher("backend offline")),
        ExecutorConfig::new(ResourceLimits::default(), 10),
    )
    .unwrap();
    let program = r#"
        let outcome = add(#{a: 1, b: 2});
        [outcome.ok, outcome.kind, outcome.error]
    "#;
    let result = exec.execute(program, &HashMap::new()).await;
    assert!(result.success, "error: {:?}", result.error);
    let output = result.output.as_ref().unwrap().as_array().unwrap();
    assert_eq!(output[0], json!(false));
    assert_eq!(output[1], json!("tool dispatch failure"));
    assert!(output[2].as_str().unwrap().contains("backend offline"));

    // The attempt reached the dispatcher, so it is accounted for.
    assert_eq!(result.tool_calls.len(), 1);
    assert_eq!(result.tool_calls[0].result_size_bytes, 0);
}

#[tokio::test]
async fn records_carry_timing_and_identity() {
    let exec = executor_with_budget(10);
    let result = exec
        .execute("add(#{a: 20, b: 22}).result", &HashMap::new())
        .await;
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.output, Some(json!(42)));

    let record = &result.tool_calls[0];
    assert_eq!(record.tool_kind, ToolKind::Function);
    assert_eq!(record.execution_id, exec.execution_id());
    assert!(record.completed_at >= record.started_at);
    assert!(record.result_size_bytes > 0);
    assert!(record.duration_ms <= result.execution_time_ms);
}

#[tokio::test]
async fn slow_dispatch_is_cut_at_the_execution_deadline() {
    let mut catalog = ToolCatalog::new();
    catalog
        .register(ToolDefinition::new(
            "stall",
            ToolKind::Function,
            "Never returns in time",
        ))
        .unwrap();
    let dispatcher = Arc::new(FnToolDispatcher::new(|_, _| async {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(json!("late"))
    }));
    let limits = ResourceLimits {
        max_duration_seconds: 1,
        ..ResourceLimits::default()
    };
    let exec = ProgrammaticToolExecutor::new(
        catalog,
        dispatcher,
        ExecutorConfig::new(limits, 10),
    )
    .unwrap();

    // The call is cut at the deadline; any work after it trips the
    // wall-clock guard, so the run classifies as a timeout.
    let program = r#"
        let outcome = stall(#{});
        let i = 0;
        while i < 100000000 { i += 1; }
        outcome
    "#;
    let result = exec.execute(program, &HashMap::new()).await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    // The dispatch started before the deadline, so it is on the record.
    assert_eq!(result.tool_calls.len(), 1);
    assert_eq!(result.tool_calls[0].tool_name, "stall");
}
