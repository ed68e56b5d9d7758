#![cfg(unix)]

mod common;

use std::fs;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use serde_json::json;
use tether_core::turn::{TerminationReason, TurnOutcome};
use tether_protocol::{EventMsg, FailureKind, ReviewDecision, TranscriptItem};

use common::{RecordingSink, ScriptedModel, Step, call, config_in, content, start, tool_results};

#[tokio::test]
async fn read_only_listing_runs_without_a_prompt() {
  let dir = tempfile::tempdir().expect("tempdir");
  fs::write(dir.path().join("b.txt"), "b").expect("write");
  fs::write(dir.path().join("a.txt"), "a").expect("write");

  let model = ScriptedModel::new(vec![
    vec![call("call_1", "list_files", json!({ "path": "." }))],
    vec![Step::Text("Two files.")],
  ]);
  let sink = RecordingSink::new();
  let mut tether = start(config_in(dir.path()), model.clone(), sink.clone()).await;

  let outcome = tether.run_turn("what is here?").await;

  assert_eq!(
    outcome,
    TurnOutcome::Done {
      text: "Two files.".to_string()
    }
  );
  assert!(sink.prompts().is_empty());

  let results = tool_results(tether.session().transcript());
  assert_eq!(results.len(), 1);
  assert_eq!(results[0].call_id, "call_1");
  assert_eq!(content(&results[0]), "a.txt\nb.txt");

  // The second request carries the result back to the model.
  let requests = model.requests();
  assert_eq!(requests.len(), 2);
  assert!(
    requests[1]
      .transcript
      .iter()
      .any(|item| matches!(item, TranscriptItem::ToolResult(result) if result.call_id == "call_1"))
  );
  assert!(requests[0].tools.iter().any(|tool| tool.name == "list_files"));
}

#[tokio::test]
async fn loop_walks_through_its_states() {
  let dir = tempfile::tempdir().expect("tempdir");
  let model = ScriptedModel::new(vec![
    vec![call("call_1", "list_files", json!({ "path": "." }))],
    vec![Step::Text("done")],
  ]);
  let sink = RecordingSink::new();
  let mut tether = start(config_in(dir.path()), model, sink.clone()).await;

  tether.run_turn("go").await;

  assert_eq!(
    sink.states(),
    vec![
      "awaiting_model",
      "interpreting_response",
      "executing_tools",
      "awaiting_model",
      "interpreting_response",
      "done",
    ]
  );
  let events = sink.events();
  assert!(matches!(events.first(), Some(EventMsg::TurnStarted(_))));
  assert!(matches!(
    events.last(),
    Some(EventMsg::TurnCompleted(completed)) if completed.final_message.as_deref() == Some("done")
  ));
  assert!(events.iter().any(|event| matches!(event, EventMsg::ToolCallBegin(begin) if begin.call_id == "call_1")));
  assert!(events.iter().any(|event| matches!(event, EventMsg::ToolCallEnd(end) if end.result.call_id == "call_1")));
}

#[tokio::test]
async fn session_deny_blocks_every_later_delete() {
  let dir = tempfile::tempdir().expect("tempdir");
  let target = dir.path().join("keep.txt");
  fs::write(&target, "precious").expect("write");

  let model = ScriptedModel::new(vec![
    vec![call("call_1", "delete_file", json!({ "path": "keep.txt" }))],
    vec![call("call_2", "delete_file", json!({ "path": "keep.txt" }))],
    vec![Step::Text("Could not delete it.")],
  ]);
  let sink = RecordingSink::new();
  sink.answer("delete_file", ReviewDecision::DeniedForSession);
  let mut tether = start(config_in(dir.path()), model, sink.clone()).await;

  let outcome = tether.run_turn("delete keep.txt").await;

  assert!(outcome.is_done());
  assert!(target.exists());
  assert_eq!(sink.prompts().len(), 1);
  let kinds: Vec<_> = tool_results(tether.session().transcript())
    .iter()
    .map(|result| result.failure_kind())
    .collect();
  assert_eq!(
    kinds,
    vec![Some(FailureKind::UserDenied), Some(FailureKind::UserDenied)]
  );
}

#[tokio::test]
async fn session_approval_carries_across_turns() {
  let dir = tempfile::tempdir().expect("tempdir");
  let model = ScriptedModel::new(vec![
    vec![call("call_1", "write_file", json!({ "path": "notes/one.txt", "content": "1" }))],
    vec![Step::Text("wrote one")],
    vec![call("call_2", "write_file", json!({ "path": "notes/two.txt", "content": "2" }))],
    vec![Step::Text("wrote two")],
  ]);
  let sink = RecordingSink::new();
  sink.answer("write_file", ReviewDecision::ApprovedForSession);
  let mut tether = start(config_in(dir.path()), model, sink.clone()).await;

  assert!(tether.run_turn("write one").await.is_done());
  assert!(tether.run_turn("write two").await.is_done());

  assert_eq!(sink.prompts().len(), 1);
  assert_eq!(fs::read_to_string(dir.path().join("notes/one.txt")).expect("one"), "1");
  assert_eq!(fs::read_to_string(dir.path().join("notes/two.txt")).expect("two"), "2");
  assert_eq!(tether.session().approvals().len(), 1);
}

#[tokio::test]
async fn one_time_approval_asks_again() {
  let dir = tempfile::tempdir().expect("tempdir");
  let model = ScriptedModel::new(vec![vec![
    call("call_1", "write_file", json!({ "path": "a.txt", "content": "a" })),
    call("call_2", "write_file", json!({ "path": "b.txt", "content": "b" })),
  ]]);
  let sink = RecordingSink::new();
  sink.answer("write_file", ReviewDecision::Approved);
  let mut tether = start(config_in(dir.path()), model, sink.clone()).await;

  tether.run_turn("write both").await;

  assert_eq!(sink.prompts().len(), 2);
  assert!(tether.session().approvals().is_empty());
}

#[tokio::test]
async fn every_call_gets_one_result_in_request_order() {
  let dir = tempfile::tempdir().expect("tempdir");
  let model = ScriptedModel::new(vec![
    vec![
      call("c1", "no_such_tool", json!({})),
      call("c2", "read_file", json!({})),
      call("c3", "list_files", json!({ "path": "." })),
      call("c3", "list_files", json!({ "path": "." })),
    ],
    vec![Step::Text("ok")],
  ]);
  let sink = RecordingSink::new();
  let mut tether = start(config_in(dir.path()), model, sink).await;

  tether.run_turn("mixed").await;

  let results = tool_results(tether.session().transcript());
  let ids: Vec<_> = results.iter().map(|result| result.call_id.as_str()).collect();
  assert_eq!(ids, vec!["c1", "c2", "c3", "c3"]);
  let kinds: Vec<_> = results.iter().map(|result| result.failure_kind()).collect();
  assert_eq!(
    kinds,
    vec![
      Some(FailureKind::UnknownTool),
      Some(FailureKind::InvalidArguments),
      None,
      Some(FailureKind::InvalidArguments),
    ]
  );
}

#[tokio::test]
async fn interrupt_cancels_the_whole_batch() {
  let dir = tempfile::tempdir().expect("tempdir");
  let model = ScriptedModel::new(vec![vec![
    call("s1", "shell", json!({ "command": "sleep 5" })),
    call("s2", "shell", json!({ "command": "sleep 5" })),
    call("s3", "shell", json!({ "command": "sleep 5" })),
  ]]);
  let sink = RecordingSink::new();
  sink.answer("shell", ReviewDecision::ApprovedForSession);
  let mut tether = start(config_in(dir.path()), model.clone(), sink.clone()).await;

  let handle = tether.interrupt_handle();
  let events = sink.clone();
  tokio::spawn(async move {
    common::eventually(|| {
      events
        .events()
        .iter()
        .filter(|event| matches!(event, EventMsg::ToolCallBegin(_)))
        .count()
        == 3
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    while !handle.interrupt() {
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  });

  let started = Instant::now();
  let outcome = tether.run_turn("sleep a lot").await;

  assert!(started.elapsed() < Duration::from_secs(4));
  assert_eq!(
    outcome,
    TurnOutcome::Terminated {
      reason: TerminationReason::Cancelled
    }
  );
  let results = tool_results(tether.session().transcript());
  assert_eq!(results.len(), 3);
  assert!(
    results
      .iter()
      .all(|result| result.failure_kind() == Some(FailureKind::Cancelled))
  );
  assert_eq!(model.requests().len(), 1);
  assert!(!tether.session().is_shut_down());
}

#[tokio::test]
async fn interrupt_retracts_an_open_prompt() {
  let dir = tempfile::tempdir().expect("tempdir");
  let target = dir.path().join("keep.txt");
  fs::write(&target, "x").expect("write");
  let model = ScriptedModel::new(vec![vec![call(
    "call_1",
    "delete_file",
    json!({ "path": "keep.txt" }),
  )]]);
  let sink = RecordingSink::new();
  let mut tether = start(config_in(dir.path()), model, sink.clone()).await;

  let handle = tether.interrupt_handle();
  let prompts = sink.clone();
  tokio::spawn(async move {
    common::eventually(|| prompts.prompts().len() == 1).await;
    handle.interrupt();
  });

  let outcome = tether.run_turn("delete it").await;

  assert_eq!(outcome.termination(), Some(&TerminationReason::Cancelled));
  assert!(target.exists());
  assert_eq!(sink.retracted(), vec!["call_1"]);
  let results = tool_results(tether.session().transcript());
  assert_eq!(results[0].failure_kind(), Some(FailureKind::Cancelled));
}

#[tokio::test]
async fn interrupt_while_waiting_on_the_model() {
  let dir = tempfile::tempdir().expect("tempdir");
  let model = ScriptedModel::new(vec![vec![Step::Text("thinking"), Step::Hang]]);
  let sink = RecordingSink::new();
  let mut tether = start(config_in(dir.path()), model, sink.clone()).await;

  let handle = tether.interrupt_handle();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(50)).await;
    while !handle.interrupt() {
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  });

  let outcome = tether.run_turn("hello").await;
  assert_eq!(outcome.termination(), Some(&TerminationReason::Cancelled));
  assert_eq!(sink.states().last().map(String::as_str), Some("terminated"));
}

#[tokio::test]
async fn turn_limit_ends_a_looping_model() {
  let dir = tempfile::tempdir().expect("tempdir");
  let model = ScriptedModel::new(vec![
    vec![call("call_1", "list_files", json!({ "path": "." }))],
    vec![call("call_2", "list_files", json!({ "path": "." }))],
    vec![Step::Text("never reached")],
  ]);
  let sink = RecordingSink::new();
  let mut config = config_in(dir.path());
  config.orchestrator.max_turns = 2;
  let mut tether = start(config, model.clone(), sink).await;

  let outcome = tether.run_turn("loop").await;

  assert_eq!(
    outcome,
    TurnOutcome::Terminated {
      reason: TerminationReason::TurnLimitReached
    }
  );
  assert_eq!(model.requests().len(), 2);
  assert_eq!(tool_results(tether.session().transcript()).len(), 2);
}

#[tokio::test]
async fn model_failure_terminates_the_turn() {
  let dir = tempfile::tempdir().expect("tempdir");
  let model = ScriptedModel::new(Vec::new());
  let sink = RecordingSink::new();
  let mut tether = start(config_in(dir.path()), model, sink.clone()).await;

  let outcome = tether.run_turn("hello").await;

  assert!(matches!(
    outcome,
    TurnOutcome::Terminated {
      reason: TerminationReason::ModelClient(_)
    }
  ));
  let completed = sink.events().into_iter().find_map(|event| match event {
    EventMsg::TurnCompleted(completed) => Some(completed),
    _ => None,
  });
  assert!(
    completed
      .and_then(|completed| completed.terminated)
      .is_some_and(|reason| reason.contains("no scripted response left"))
  );
}

#[tokio::test]
async fn slow_tool_times_out() {
  let dir = tempfile::tempdir().expect("tempdir");
  let model = ScriptedModel::new(vec![
    vec![call("call_1", "shell", json!({ "command": "sleep 5" }))],
    vec![Step::Text("too slow")],
  ]);
  let sink = RecordingSink::new();
  sink.answer("shell", ReviewDecision::Approved);
  let mut config = config_in(dir.path());
  config.tools.timeouts.insert("shell".to_string(), 200);
  let mut tether = start(config, model, sink).await;

  let started = Instant::now();
  let outcome = tether.run_turn("sleep").await;

  assert!(outcome.is_done());
  assert!(started.elapsed() < Duration::from_secs(4));
  let results = tool_results(tether.session().transcript());
  assert_eq!(results[0].failure_kind(), Some(FailureKind::Timeout));
}

#[tokio::test]
async fn trusted_rules_skip_the_prompt() {
  let dir = tempfile::tempdir().expect("tempdir");
  let model = ScriptedModel::new(vec![
    vec![call("call_1", "shell", json!({ "command": "echo hi" }))],
    vec![Step::Text("said hi")],
  ]);
  let sink = RecordingSink::new();
  let mut config = config_in(dir.path());
  config.approval.trusted.push(tether_config::TrustedRule {
    tool: "shell".to_string(),
    arguments: Some("*echo*".to_string()),
  });
  let mut tether = start(config, model, sink.clone()).await;

  tether.run_turn("greet").await;

  assert!(sink.prompts().is_empty());
  let results = tool_results(tether.session().transcript());
  assert_eq!(content(&results[0]), "exit_code: 0\nstdout:\nhi\n");
}

#[tokio::test]
async fn shutdown_stops_later_turns() {
  let dir = tempfile::tempdir().expect("tempdir");
  let model = ScriptedModel::new(vec![vec![Step::Text("hi")]]);
  let sink = RecordingSink::new();
  let mut tether = start(config_in(dir.path()), model.clone(), sink).await;

  tether.interrupt_handle().shutdown();
  assert!(tether.session().is_shut_down());

  let outcome = tether.run_turn("hello").await;
  assert_eq!(outcome.termination(), Some(&TerminationReason::Cancelled));
  assert!(model.requests().is_empty());
  tether.shutdown().await;
}
