//! Scheduler properties
//!
//! Ordering, leveling, chunking and aggregation guarantees of the executor,
//! checked against the scripted transport.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use reqchain::observe::{LifecycleEvent, MemoryReporter};
use reqchain::transport::{MockReply, MockTransport, RecordedCall, Response};
use reqchain::workflow::{ChainContext, ExecutionPlan};
use reqchain::{
    extract, ExecuteOptions, ExecutionStatus, Executor, FailureKind, RequestDescriptor, Step,
    Workflow,
};

fn ok(body: Value) -> MockReply {
    MockReply::json(200, body)
}

fn only_call(transport: &MockTransport, url: &str) -> RecordedCall {
    let calls = transport.calls_to(url);
    assert_eq!(calls.len(), 1, "expected exactly one call to {}", url);
    calls.into_iter().next().unwrap()
}

#[tokio::test]
async fn sequential_results_follow_input_order() {
    let mut transport = MockTransport::new();
    for i in 0..5 {
        transport = transport.route(format!("http://api/{}", i), ok(json!({ "i": i })));
    }
    let transport = Arc::new(transport);
    let executor = Executor::new(transport.clone());

    let items = (0..5)
        .map(|i| RequestDescriptor::get(format!("http://api/{}", i)))
        .collect();
    let result = executor.execute(items, ExecuteOptions::sequential()).await.unwrap();

    let keys: Vec<&str> = result.responses.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["request_0", "request_1", "request_2", "request_3", "request_4"]);
    let urls: Vec<String> = transport.calls().into_iter().map(|c| c.request.url).collect();
    assert_eq!(
        urls,
        (0..5).map(|i| format!("http://api/{}", i)).collect::<Vec<_>>()
    );
    for window in transport.calls().windows(2) {
        assert!(window[1].started >= window[0].finished);
    }
}

#[tokio::test]
async fn diamond_dependencies_happen_before() {
    let delay = Duration::from_millis(30);
    let transport = Arc::new(
        MockTransport::new()
            .route("http://api/a", ok(json!({"seed": 1})).delayed(delay))
            .route("http://api/b", ok(json!({})).delayed(delay))
            .route("http://api/c", ok(json!({})).delayed(delay))
            .route("http://api/d", ok(json!({})).delayed(delay)),
    );

    let workflow = Workflow::define("diamond")
        .request("a", RequestDescriptor::get("http://api/a"))
        .step(Step::request("b", RequestDescriptor::get("http://api/b")).depends_on(&["a"]))
        .step(Step::request("c", RequestDescriptor::get("http://api/c")).depends_on(&["a"]))
        .step(Step::request("d", RequestDescriptor::get("http://api/d")).depends_on(&["b", "c"]))
        .build();

    let plan = ExecutionPlan::from_workflow(&workflow);
    assert_eq!(plan.levels, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);

    let executor = Executor::new(transport.clone());
    let result = executor
        .execute_workflow(workflow, ExecuteOptions::workflow())
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::Success);

    let a = only_call(&transport, "http://api/a");
    let b = only_call(&transport, "http://api/b");
    let c = only_call(&transport, "http://api/c");
    let d = only_call(&transport, "http://api/d");

    assert!(b.started >= a.finished);
    assert!(c.started >= a.finished);
    assert!(d.started >= b.finished);
    assert!(d.started >= c.finished);
    // b and c share a level and overlap
    assert!(b.started < c.finished && c.started < b.finished);
}

#[tokio::test]
async fn cyclic_dependencies_terminate() {
    let transport = Arc::new(MockTransport::new().route("http://api/x", ok(json!({}))));
    let workflow = Workflow::define("cycle")
        .step(Step::request("a", RequestDescriptor::get("http://api/x")).depends_on(&["b"]))
        .step(Step::request("b", RequestDescriptor::get("http://api/x")).depends_on(&["a"]))
        .build();

    let executor = Executor::new(transport.clone());
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        executor.execute_workflow(workflow, ExecuteOptions::workflow()),
    )
    .await
    .expect("cyclic workflow must not hang")
    .unwrap();

    assert_eq!(result.unscheduled, vec!["a", "b"]);
    assert_eq!(result.failed, 2);
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.errors["a"].kind, FailureKind::Dependency);
    assert_eq!(transport.call_count(), 0);
}

#[test]
fn path_extraction_is_pure() {
    let data = json!({
        "items": [{"id": 1, "name": "first"}, {"id": 2, "name": "second"}],
        "meta": {"name": "list"}
    });
    let before = data.clone();

    assert_eq!(extract(&data, "$.items[-1].id"), Some(json!(2)));
    assert_eq!(extract(&data, "$.items[-1].id"), Some(json!(2)));
    assert_eq!(
        extract(&data, "$..name"),
        Some(json!(["first", "second", "list"]))
    );
    assert_eq!(extract(&data, "$.items[5].id"), None);
    assert_eq!(data, before);
}

#[test]
fn recursive_descent_collects_every_match() {
    let data = json!({"a": {"name": "x"}, "b": [{"name": "y"}]});
    assert_eq!(extract(&data, "$..name"), Some(json!(["x", "y"])));
}

#[tokio::test]
async fn chain_state_round_trips_through_export() {
    let transport = Arc::new(
        MockTransport::new().route("http://api/login", ok(json!({"token": "t-1", "roles": ["admin"]}))),
    );
    let workflow = Workflow::define("export")
        .variable("env", json!("staging"))
        .step(
            Step::request("login", RequestDescriptor::get("http://api/login"))
                .extract("token", "$.token")
                .extract("role", "$.roles[0]"),
        )
        .build();

    let executor = Executor::new(transport);
    let options = ExecuteOptions::workflow().with_execution_id("export-1");
    executor.execute_workflow(workflow, options).await.unwrap();

    let original = executor.contexts().get("export-1").unwrap();
    let exported = original.export().await.unwrap();

    let copy = ChainContext::new("copy");
    copy.import(exported.clone()).await.unwrap();
    assert_eq!(copy.id(), "copy");
    assert_eq!(copy.variable("token").await, Some(json!("t-1")));
    assert_eq!(copy.variable("role").await, Some(json!("admin")));
    assert_eq!(copy.response("login").await.unwrap().body["token"], "t-1");

    let mut reexported = copy.export().await.unwrap();
    let mut expected = exported;
    reexported.as_object_mut().unwrap().remove("id");
    expected.as_object_mut().unwrap().remove("id");
    assert_eq!(reexported, expected);
}

#[tokio::test]
async fn metrics_summarize_latencies() {
    let mut transport = MockTransport::new();
    for (i, ms) in [10u64, 20, 30].into_iter().enumerate() {
        let reply = MockReply::Respond {
            response: Response::new(200, json!({"i": i})).with_duration_ms(ms),
            delay: Duration::ZERO,
        };
        transport = transport.route(format!("http://api/{}", i), reply);
    }
    let executor = Executor::new(Arc::new(transport));

    let items = (0..3)
        .map(|i| RequestDescriptor::get(format!("http://api/{}", i)))
        .collect();
    let result = executor
        .execute(items, ExecuteOptions::sequential().collect_metrics())
        .await
        .unwrap();

    let metrics = result.metrics.unwrap();
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.average_latency_ms, 20.0);
    assert_eq!(metrics.min_latency_ms, 10);
    assert_eq!(metrics.max_latency_ms, 30);
    assert_eq!(metrics.success_rate, 100.0);
    assert_eq!(metrics.status_codes.get(&200), Some(&3));
}

#[tokio::test]
async fn batches_partition_items() {
    let transport = Arc::new(MockTransport::new().route("http://api/x", ok(json!({}))));
    let reporter = Arc::new(MemoryReporter::new());
    let executor = Executor::builder(transport).reporter(reporter.clone()).build();

    let items = vec![RequestDescriptor::get("http://api/x"); 10];
    let result = executor.execute(items, ExecuteOptions::batch(3)).await.unwrap();
    assert_eq!(result.successful, 10);

    let sizes: Vec<usize> = reporter
        .named("batch_started")
        .into_iter()
        .filter_map(|e| match e {
            LifecycleEvent::BatchStarted { size, .. } => Some(size),
            _ => None,
        })
        .collect();
    assert_eq!(sizes, vec![3, 3, 3, 1]);
    assert_eq!(sizes.iter().sum::<usize>(), 10);
}

#[tokio::test]
async fn parallel_failure_yields_partial() {
    let mut transport = MockTransport::new();
    for i in 0..5 {
        let reply = if i == 2 {
            MockReply::fail("connection refused")
        } else {
            ok(json!({ "i": i }))
        };
        transport = transport.route(format!("http://api/{}", i), reply);
    }
    let reporter = Arc::new(MemoryReporter::new());
    let executor = Executor::builder(Arc::new(transport)).reporter(reporter.clone()).build();

    let items = (0..5)
        .map(|i| RequestDescriptor::get(format!("http://api/{}", i)))
        .collect();
    let result = executor.execute(items, ExecuteOptions::parallel(2)).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Partial);
    assert_eq!(result.successful, 4);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors["request_2"].kind, FailureKind::Transport);
    assert!(!result.responses.contains_key("request_2"));
    assert_eq!(reporter.named("batch_started").len(), 3);
}

#[tokio::test]
async fn abort_stops_new_dispatches() {
    let transport = Arc::new(MockTransport::new().route("http://api/x", ok(json!({}))));
    let executor = Executor::new(transport.clone());

    let items = vec![RequestDescriptor::get("http://api/x"); 20];
    let options = ExecuteOptions::sequential()
        .with_delay_between_requests_ms(50)
        .with_execution_id("abort-1");

    let run = executor.execute(items, options);
    let abort = async {
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(executor.abort("abort-1"));
    };
    let (result, ()) = tokio::join!(run, abort);
    let result = result.unwrap();

    assert!(result.cancelled);
    assert!(result.successful < 20);
    assert_eq!(result.not_dispatched(), 20 - result.successful);
    assert_eq!(transport.call_count(), result.successful);
    assert!(!executor.registry().is_active("abort-1"));
}
