//! Server-Sent Events fan-out of persisted workflow events
//!
//! A poll-and-flush loop over the event log, transport-agnostic: it writes
//! SSE frames to any [`AsyncWrite`], so the HTTP layer only has to hand it
//! the response body. Supports `Last-Event-ID` resume, heartbeats, and a
//! final `done` frame after the workflow's terminal event.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::state::{Store, StoreError};

/// Streaming configuration
#[derive(Debug, Clone)]
pub struct SseConfig {
    /// How often the event log is polled for new events
    pub poll_interval: Duration,

    /// How often a `: ping` comment keeps the connection alive
    pub heartbeat_interval: Duration,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

impl SseConfig {
    /// Set the event poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

/// Errors from event streaming
#[derive(Debug, thiserror::Error)]
pub enum SseError {
    /// Store error while polling events
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Write to the client failed
    #[error("write error: {0}")]
    Io(#[from] std::io::Error),

    /// Event could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stream a workflow's events as SSE frames until its terminal event
///
/// Wire format, per event:
///
/// ```text
/// id: <sequence_num>
/// event: <event_type>
/// data: <event_json>
/// ```
///
/// followed by a blank line. A `: ping` comment is written every heartbeat
/// interval, and after a terminal workflow event the stream writes
/// `event: done` with empty data and returns.
///
/// `last_event_id` is the numeric resume point from the `Last-Event-ID`
/// header; events at or below it are skipped. Unparseable values are
/// ignored. Caller cancellation is dropping (or `select!`-ing away) the
/// returned future.
pub async fn stream_events<W>(
    writer: &mut W,
    store: Arc<dyn Store>,
    workflow_id: &str,
    last_event_id: Option<&str>,
    config: SseConfig,
) -> Result<(), SseError>
where
    W: AsyncWrite + Unpin,
{
    let mut since: i64 = last_event_id
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0);

    debug!(%workflow_id, since, "starting event stream");

    let mut poll = tokio::time::interval(config.poll_interval);
    // First heartbeat comes after a full interval, not immediately
    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );

    loop {
        tokio::select! {
            _ = poll.tick() => {
                let events = store.get_events_since(workflow_id, since).await?;
                for event in events {
                    if event.sequence_num > since {
                        since = event.sequence_num;
                    }

                    let payload = serde_json::to_string(&event)?;
                    let frame = format!(
                        "id: {}\nevent: {}\ndata: {}\n\n",
                        event.sequence_num, event.event_type, payload
                    );
                    writer.write_all(frame.as_bytes()).await?;
                    writer.flush().await?;

                    if event.is_terminal() {
                        writer.write_all(b"event: done\ndata: {}\n\n").await?;
                        writer.flush().await?;
                        debug!(%workflow_id, "event stream finished");
                        return Ok(());
                    }
                }
            }
            _ = heartbeat.tick() => {
                writer.write_all(b": ping\n\n").await?;
                writer.flush().await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{event_data, Event, EventType, InMemoryStore, WorkflowCompletedData};
    use serde_json::json;

    async fn seed_terminal_history(store: &InMemoryStore, workflow_id: &str) {
        store
            .append_event(Event::new(
                workflow_id,
                EventType::WorkflowStarted,
                Default::default(),
            ))
            .await
            .unwrap();
        store
            .append_event(Event::new(
                workflow_id,
                EventType::WorkflowCompleted,
                event_data(&WorkflowCompletedData {
                    output: json!("done"),
                }),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_streams_events_and_done_frame() {
        let store = Arc::new(InMemoryStore::new());
        seed_terminal_history(&store, "wf-1").await;

        let mut buffer = Vec::new();
        stream_events(
            &mut buffer,
            store.clone(),
            "wf-1",
            None,
            SseConfig::default().with_poll_interval(Duration::from_millis(20)),
        )
        .await
        .unwrap();

        let output = String::from_utf8(buffer).unwrap();
        assert!(output.contains("id: 1\nevent: workflow_started\n"));
        assert!(output.contains("id: 2\nevent: workflow_completed\n"));
        assert!(output.ends_with("event: done\ndata: {}\n\n"));

        // Frames carry the full event JSON
        assert!(output.contains("\"sequence_num\":2"));
    }

    #[tokio::test]
    async fn test_resume_skips_past_events() {
        let store = Arc::new(InMemoryStore::new());
        seed_terminal_history(&store, "wf-1").await;

        let mut buffer = Vec::new();
        stream_events(
            &mut buffer,
            store.clone(),
            "wf-1",
            Some("1"),
            SseConfig::default().with_poll_interval(Duration::from_millis(20)),
        )
        .await
        .unwrap();

        let output = String::from_utf8(buffer).unwrap();
        assert!(!output.contains("event: workflow_started"));
        // First frame is the smallest sequence greater than the resume point
        assert!(output.starts_with("id: 2\nevent: workflow_completed\n"));
    }

    #[tokio::test]
    async fn test_unparseable_resume_point_is_ignored() {
        let store = Arc::new(InMemoryStore::new());
        seed_terminal_history(&store, "wf-1").await;

        let mut buffer = Vec::new();
        stream_events(
            &mut buffer,
            store.clone(),
            "wf-1",
            Some("not-a-number"),
            SseConfig::default().with_poll_interval(Duration::from_millis(20)),
        )
        .await
        .unwrap();

        let output = String::from_utf8(buffer).unwrap();
        assert!(output.starts_with("id: 1\nevent: workflow_started\n"));
    }

    #[tokio::test]
    async fn test_heartbeat_while_idle() {
        let store = Arc::new(InMemoryStore::new());
        // Non-terminal history: the stream stays open
        store
            .append_event(Event::new(
                "wf-1",
                EventType::WorkflowStarted,
                Default::default(),
            ))
            .await
            .unwrap();

        let mut buffer = Vec::new();
        let config = SseConfig::default()
            .with_poll_interval(Duration::from_millis(20))
            .with_heartbeat_interval(Duration::from_millis(50));

        // Cancel from outside after heartbeats have had time to appear
        let _ = tokio::time::timeout(
            Duration::from_millis(200),
            stream_events(&mut buffer, store.clone(), "wf-1", None, config),
        )
        .await;

        let output = String::from_utf8(buffer).unwrap();
        assert!(output.contains(": ping\n\n"));
        assert!(!output.contains("event: done"));
    }

    #[tokio::test]
    async fn test_picks_up_late_events() {
        let store = Arc::new(InMemoryStore::new());
        store
            .append_event(Event::new(
                "wf-1",
                EventType::WorkflowStarted,
                Default::default(),
            ))
            .await
            .unwrap();

        let writer_store = store.clone();
        let handle = tokio::spawn(async move {
            let mut buffer = Vec::new();
            stream_events(
                &mut buffer,
                writer_store,
                "wf-1",
                None,
                SseConfig::default().with_poll_interval(Duration::from_millis(20)),
            )
            .await
            .unwrap();
            buffer
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        store
            .append_event(Event::new(
                "wf-1",
                EventType::WorkflowCanceled,
                Default::default(),
            ))
            .await
            .unwrap();

        let buffer = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("stream finished")
            .unwrap();
        let output = String::from_utf8(buffer).unwrap();
        assert!(output.contains("event: workflow_canceled"));
        assert!(output.ends_with("event: done\ndata: {}\n\n"));
    }
}
