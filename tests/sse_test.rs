//! SSE streaming against a live engine

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use stride::prelude::*;
use stride::ActivityRegistry;

fn parse_frames(raw: &str) -> Vec<(i64, String)> {
    // (id, event_type) pairs for data frames, ignoring comments
    let mut frames = Vec::new();
    for block in raw.split("\n\n") {
        let mut id = None;
        let mut event = None;
        for line in block.lines() {
            if let Some(value) = line.strip_prefix("id: ") {
                id = value.parse::<i64>().ok();
            } else if let Some(value) = line.strip_prefix("event: ") {
                event = Some(value.to_string());
            }
        }
        if let (Some(id), Some(event)) = (id, event) {
            frames.push((id, event));
        }
    }
    frames
}

#[tokio::test]
async fn live_workflow_streams_to_done() {
    let store = Arc::new(InMemoryStore::new());
    let queue = Arc::new(InMemoryQueue::new());
    let activities = Arc::new(ActivityRegistry::new());
    let workflows = Arc::new(WorkflowRegistry::new());

    activities
        .register(
            "echo-act",
            Arc::new(ActivityFn::new(|_ctx, input: Value| async move {
                Ok(input)
            })),
            ActivityInfo::default(),
        )
        .unwrap();
    workflows
        .register(
            WorkflowBuilder::new("echo")
                .activity_with_id("echo-act", json!("hi"), "a1")
                .build(),
        )
        .unwrap();

    let engine = Engine::new(EngineConfig::new(
        store.clone(),
        queue.clone(),
        workflows.clone(),
    ));
    engine.start();
    let worker = Worker::new(
        queue.clone(),
        activities,
        store.clone(),
        WorkerConfig::default().with_poll_interval(Duration::from_millis(50)),
    );
    worker.start().unwrap();

    let workflow_id = engine.start_workflow("echo", json!(null)).await.unwrap();

    // Subscribe while the workflow is still running
    let stream_store: Arc<dyn Store> = store.clone();
    let stream_id = workflow_id.clone();
    let handle = tokio::spawn(async move {
        let mut buffer = Vec::new();
        stream_events(
            &mut buffer,
            stream_store,
            &stream_id,
            None,
            SseConfig::default().with_poll_interval(Duration::from_millis(25)),
        )
        .await
        .unwrap();
        buffer
    });

    let buffer = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("stream completed")
        .unwrap();
    let raw = String::from_utf8(buffer).unwrap();

    let frames = parse_frames(&raw);
    let types: Vec<&str> = frames.iter().map(|(_, t)| t.as_str()).collect();
    assert_eq!(
        types,
        vec![
            "workflow_started",
            "activity_scheduled",
            "activity_started",
            "activity_completed",
            "workflow_completed",
        ]
    );

    // IDs are the sequence numbers, strictly increasing from 1
    for (i, (id, _)) in frames.iter().enumerate() {
        assert_eq!(*id, i as i64 + 1);
    }

    assert!(raw.ends_with("event: done\ndata: {}\n\n"));

    worker.stop(Duration::from_secs(2)).await.unwrap();
    engine.stop().await;
}

#[tokio::test]
async fn resume_starts_at_smallest_sequence_after_last_event_id() {
    let store = Arc::new(InMemoryStore::new());

    for event_type in [
        EventType::WorkflowStarted,
        EventType::ActivityScheduled,
        EventType::ActivityStarted,
        EventType::ActivityCompleted,
        EventType::WorkflowCompleted,
    ] {
        store
            .append_event(Event::new("wf-1", event_type, Default::default()))
            .await
            .unwrap();
    }

    for since in 0..5 {
        let mut buffer = Vec::new();
        stream_events(
            &mut buffer,
            store.clone(),
            "wf-1",
            Some(&since.to_string()),
            SseConfig::default().with_poll_interval(Duration::from_millis(10)),
        )
        .await
        .unwrap();

        let raw = String::from_utf8(buffer).unwrap();
        let frames = parse_frames(&raw);
        assert_eq!(frames[0].0, since + 1, "resume point {since}");
        assert_eq!(frames.last().unwrap().1, "workflow_completed");
        assert!(raw.ends_with("event: done\ndata: {}\n\n"));
    }
}
