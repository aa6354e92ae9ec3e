//! Engine-facing halves of the two transports
//!
//! The streaming transport forwards every [`Step`] as a `repl_step` frame and
//! finishes with one `answer` or `error` frame. The request/response transport
//! persists every step as a `repl_log` message and hands back only the answer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::engine::{Engine, EngineError, Step, StepObserver};
use crate::session::{DataScope, Session, SessionManager};
use crate::store::StoreError;

/// Frames buffered between a run and a slow consumer.
const FRAME_BUFFER: usize = 16;

/// One JSON object on the streaming connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    ReplStep(Step),
    Answer { content: String },
    Error { content: String },
}

impl StreamFrame {
    pub fn to_json(&self) -> String {
        // Every variant is plain strings, numbers and bools.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// The single frame a client sends per query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncomingQuery {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub user_id: String,
}

impl IncomingQuery {
    /// Reject the query before any engine work when a field is missing.
    pub fn validate(&self) -> Result<(), StreamFrame> {
        if self.query.is_empty() || self.user_id.is_empty() {
            return Err(StreamFrame::Error {
                content: "Missing query or user_id".to_string(),
            });
        }
        Ok(())
    }
}

struct FrameObserver {
    tx: mpsc::Sender<StreamFrame>,
}

#[async_trait]
impl StepObserver for FrameObserver {
    async fn on_step(&self, step: &Step) {
        if self.tx.send(StreamFrame::ReplStep(step.clone())).await.is_err() {
            debug!(iteration = step.iteration, "Stream consumer gone; run continues");
        }
    }
}

/// Run `query` over `context` with `session`'s tools and stream its frames.
///
/// The run is spawned and owns everything it needs. Dropping the returned
/// stream stops delivery but the run still completes.
pub fn stream_query(
    engine: Arc<Engine>,
    session: Arc<Session>,
    query: String,
    context: String,
) -> ReceiverStream<StreamFrame> {
    spawn_run(engine, session, query, context, None)
}

fn spawn_run(
    engine: Arc<Engine>,
    session: Arc<Session>,
    query: String,
    context: String,
    sink: Option<Arc<dyn MessageSink>>,
) -> ReceiverStream<StreamFrame> {
    let (tx, rx) = mpsc::channel(FRAME_BUFFER);

    tokio::spawn(async move {
        let observer = FrameObserver { tx: tx.clone() };
        let result = engine
            .run(
                &query,
                &context,
                &session.tools,
                &session.tool_descriptions,
                Some(&observer),
            )
            .await
            .map_err(TransportError::from);

        let result = match (result, sink) {
            (Ok(answer), Some(sink)) => sink
                .append(StoredMessage {
                    role: MessageRole::Assistant,
                    content: answer.clone(),
                    metadata: None,
                })
                .await
                .map(|_| answer)
                .map_err(TransportError::from),
            (result, _) => result,
        };

        let frame = match result {
            Ok(answer) => StreamFrame::Answer { content: answer },
            Err(e) => StreamFrame::Error {
                content: e.to_string(),
            },
        };
        if tx.send(frame).await.is_err() {
            debug!(user_id = %session.user_id, "Stream consumer gone; answer discarded");
        }
    });

    ReceiverStream::new(rx)
}

/// Validate an incoming frame, bind the user's tools and stream the run.
///
/// An invalid frame or a failed session build yields a single `error` frame
/// and the engine is never invoked. With a `sink`, the query is stored before
/// the run and the answer before its frame is sent; steps are only streamed.
pub async fn handle_incoming(
    incoming: IncomingQuery,
    engine: Arc<Engine>,
    sessions: &SessionManager,
    scope: DataScope,
    sink: Option<Arc<dyn MessageSink>>,
) -> ReceiverStream<StreamFrame> {
    if let Err(frame) = incoming.validate() {
        return single_frame(frame);
    }
    if let Some(sink) = &sink {
        let stored = sink
            .append(StoredMessage {
                role: MessageRole::User,
                content: incoming.query.clone(),
                metadata: None,
            })
            .await;
        if let Err(e) = stored {
            warn!(user_id = %incoming.user_id, error = %e, "Failed to persist query");
            return single_frame(StreamFrame::Error {
                content: TransportError::from(e).to_string(),
            });
        }
    }
    match sessions.get_or_create(&incoming.user_id, scope).await {
        Ok(session) => spawn_run(engine, session, incoming.query, String::new(), sink),
        Err(e) => {
            warn!(user_id = %incoming.user_id, error = %e, "Failed to bind tools");
            single_frame(StreamFrame::Error {
                content: e.to_string(),
            })
        }
    }
}

fn single_frame(frame: StreamFrame) -> ReceiverStream<StreamFrame> {
    let (tx, rx) = mpsc::channel(1);
    // Capacity 1 and a live receiver: cannot fail.
    let _ = tx.try_send(frame);
    ReceiverStream::new(rx)
}

/// Role of a persisted conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    ReplLog,
}

/// A message handed to the conversation store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: MessageRole,
    pub content: String,
    pub metadata: Option<Value>,
}

/// Where the request/response transport writes conversation messages.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn append(&self, message: StoredMessage) -> Result<(), StoreError>;
}

/// Persists each step as a `repl_log` message: the code as content, the
/// whole step as metadata.
pub struct PersistingObserver {
    sink: Arc<dyn MessageSink>,
}

impl PersistingObserver {
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl StepObserver for PersistingObserver {
    async fn on_step(&self, step: &Step) {
        let message = StoredMessage {
            role: MessageRole::ReplLog,
            content: step.code.clone(),
            metadata: serde_json::to_value(step).ok(),
        };
        if let Err(e) = self.sink.append(message).await {
            warn!(iteration = step.iteration, error = %e, "Failed to persist step");
        }
    }
}

/// Failures of the request/response transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("failed to persist message: {0}")]
    Store(#[from] StoreError),
}

/// Request/response flow: store the query, run with every step persisted,
/// store and return the answer.
pub async fn answer_and_persist(
    engine: &Engine,
    session: &Session,
    query: &str,
    sink: Arc<dyn MessageSink>,
) -> Result<String, TransportError> {
    sink.append(StoredMessage {
        role: MessageRole::User,
        content: query.to_string(),
        metadata: None,
    })
    .await?;

    let observer = PersistingObserver::new(sink.clone());
    let answer = engine
        .run(
            query,
            "",
            &session.tools,
            &session.tool_descriptions,
            Some(&observer),
        )
        .await?;

    sink.append(StoredMessage {
        role: MessageRole::Assistant,
        content: answer.clone(),
        metadata: None,
    })
    .await?;
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_repl_step_frame_is_flat() {
        let frame = StreamFrame::ReplStep(Step {
            iteration: 1,
            code: "print(1)".into(),
            output: "stdout:\n1\n\n".into(),
            has_answer: false,
        });
        let value: Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "repl_step",
                "iteration": 1,
                "code": "print(1)",
                "output": "stdout:\n1\n\n",
                "has_answer": false
            })
        );
    }

    #[test]
    fn test_answer_and_error_frames() {
        let answer: Value =
            serde_json::from_str(&StreamFrame::Answer { content: "42".into() }.to_json()).unwrap();
        assert_eq!(answer, json!({"type": "answer", "content": "42"}));

        let error: Value =
            serde_json::from_str(&StreamFrame::Error { content: "x".into() }.to_json()).unwrap();
        assert_eq!(error, json!({"type": "error", "content": "x"}));
    }

    #[test]
    fn test_incoming_validation() {
        let ok: IncomingQuery =
            serde_json::from_value(json!({"query": "q", "user_id": "u1"})).unwrap();
        assert!(ok.validate().is_ok());

        let missing: IncomingQuery = serde_json::from_value(json!({"query": "q"})).unwrap();
        assert_eq!(
            missing.validate(),
            Err(StreamFrame::Error {
                content: "Missing query or user_id".into()
            })
        );

        let empty: IncomingQuery =
            serde_json::from_value(json!({"query": "", "user_id": "u1"})).unwrap();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_message_role_names() {
        assert_eq!(serde_json::to_value(MessageRole::ReplLog).unwrap(), json!("repl_log"));
    }
}
