//! End-to-end tests for the newline-delimited JSON host bridge.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use yume::host::{BridgeExit, CommandHandler, ResponseEnvelope, run_bridge};
use yume::scheduler::{
    ActionInvoker, ActionOutput, AdaptiveScheduler, DecisionGateway, RunDecision, RunTimeline,
    ScheduledRun, SchedulerContext, SchedulerHandle, SqliteRunTimeline,
};

struct HourlyGateway;

#[async_trait]
impl DecisionGateway for HourlyGateway {
    async fn decide_next_run(&self, _ctx: &SchedulerContext) -> anyhow::Result<RunDecision> {
        Ok(RunDecision::new(
            Utc::now() + chrono::Duration::hours(1),
            "hourly",
            "check_in",
        ))
    }
}

struct NoopInvoker;

#[async_trait]
impl ActionInvoker for NoopInvoker {
    async fn execute(&self, _run: &ScheduledRun) -> anyhow::Result<ActionOutput> {
        Ok(ActionOutput::new("ok"))
    }
}

async fn scheduler_with_pending_run() -> (SchedulerHandle, ScheduledRun) {
    let store = Arc::new(SqliteRunTimeline::open_in_memory().unwrap());
    let now = Utc::now();
    let pending = ScheduledRun::from_decision(
        RunDecision::new(now + chrono::Duration::hours(2), "evening review", "planning"),
        now + chrono::Duration::hours(2),
        now,
    );
    store.commit(&pending).unwrap();

    let handle = AdaptiveScheduler::new(
        Default::default(),
        store,
        Arc::new(HourlyGateway),
        Arc::new(NoopInvoker),
    )
    .start()
    .await
    .unwrap();
    (handle, pending)
}

async fn exchange(handle: &SchedulerHandle, input: &str) -> (BridgeExit, Vec<ResponseEnvelope>) {
    let mut output = Vec::new();
    let exit = run_bridge(
        CommandHandler::new(handle.clone()),
        input.as_bytes(),
        &mut output,
    )
    .await
    .unwrap();

    let responses = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    (exit, responses)
}

#[tokio::test(start_paused = true)]
async fn ping_and_queries_answer_one_line_each() {
    let (handle, pending) = scheduler_with_pending_run().await;

    let input = concat!(
        r#"{"v":1,"request_id":"r1","command":"host.ping"}"#,
        "\n",
        r#"{"v":1,"request_id":"r2","command":"runs.next"}"#,
        "\n\n",
        r#"{"v":1,"request_id":"r3","command":"runs.recent","payload":{"limit":5}}"#,
        "\n",
    );
    let (exit, responses) = exchange(&handle, input).await;

    assert_eq!(exit, BridgeExit::Eof);
    assert_eq!(responses.len(), 3, "blank lines are skipped");

    assert!(responses[0].ok);
    assert_eq!(responses[0].request_id, "r1");
    assert_eq!(responses[0].payload["pong"], Value::Bool(true));

    assert_eq!(responses[1].request_id, "r2");
    assert_eq!(responses[1].payload["id"], Value::String(pending.id.clone()));
    assert_eq!(responses[1].payload["status"], "scheduled");

    let recent = responses[2].payload.as_array().unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0]["topic"], "planning");

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_line_gets_parse_error_and_loop_continues() {
    let (handle, _) = scheduler_with_pending_run().await;

    let input = concat!(
        "not json at all\n",
        r#"{"v":1,"request_id":"r2","command":"runs.delete"}"#,
        "\n",
        r#"{"v":1,"request_id":"r3","command":"host.ping"}"#,
        "\n",
    );
    let (_, responses) = exchange(&handle, input).await;

    assert_eq!(responses.len(), 3);
    assert!(!responses[0].ok);
    assert_eq!(responses[0].request_id, "parse-error");
    assert!(!responses[1].ok, "unknown command is rejected");
    assert!(responses[2].ok);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn invalid_payload_and_version_are_reported() {
    let (handle, _) = scheduler_with_pending_run().await;

    let input = concat!(
        r#"{"v":1,"request_id":"r1","command":"runs.get","payload":{}}"#,
        "\n",
        r#"{"v":9,"request_id":"r2","command":"host.ping"}"#,
        "\n",
    );
    let (_, responses) = exchange(&handle, input).await;

    assert!(!responses[0].ok);
    assert_eq!(responses[0].request_id, "r1");
    assert!(responses[0].error.as_deref().unwrap().contains("InvalidPayload"));
    assert!(!responses[1].ok);
    assert!(
        responses[1]
            .error
            .as_deref()
            .unwrap()
            .contains("unsupported contract version")
    );

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn runtime_stop_ends_bridge_before_later_commands() {
    let (handle, _) = scheduler_with_pending_run().await;

    let input = concat!(
        r#"{"v":1,"request_id":"r1","command":"runtime.stop"}"#,
        "\n",
        r#"{"v":1,"request_id":"r2","command":"host.ping"}"#,
        "\n",
    );
    let (exit, responses) = exchange(&handle, input).await;

    assert_eq!(exit, BridgeExit::StopRequested);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].payload["stopping"], Value::Bool(true));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn statistics_and_lookup_by_id() {
    let (handle, pending) = scheduler_with_pending_run().await;

    let input = format!(
        "{}\n{}\n{}\n",
        r#"{"v":1,"request_id":"s","command":"runs.statistics","payload":{"days":1}}"#,
        serde_json::json!({
            "v": 1,
            "request_id": "g",
            "command": "runs.get",
            "payload": { "id": pending.id },
        }),
        r#"{"v":1,"request_id":"t","command":"runs.by_topic","payload":{"topic":"nothing"}}"#,
    );
    let (_, responses) = exchange(&handle, &input).await;

    assert!(responses.iter().all(|r| r.ok));
    assert_eq!(responses[0].payload["statistics"]["scheduled_runs"], 1);
    assert_eq!(responses[0].payload["completed"], 0);
    assert_eq!(responses[1].payload["reason"], "evening review");
    assert_eq!(responses[2].payload, serde_json::json!([]));

    handle.shutdown().await;
}
