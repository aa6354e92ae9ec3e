//! Scripted model and sandbox doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use rlm_engine::llm::{ChatError, ChatMessage, ChatModel, CompletionRequest, Embedder};
use rlm_engine::sandbox::{Execution, HostCalls, Sandbox, SandboxError, SandboxFactory, Seed};
use rlm_engine::tools::CallArgs;

/// A request as the model saw it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

/// Replies from a fixed script; an exhausted script answers HTTP 500.
#[derive(Default)]
pub struct ScriptedChat {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedChat {
    pub fn new<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, ChatError> {
        self.requests.lock().unwrap().push(Recorded {
            model: request.model.to_string(),
            messages: request.messages.to_vec(),
        });
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ChatError::Status {
                status: 500,
                body: "script exhausted".into(),
            })
    }
}

/// Every text embeds to the same unit vector.
pub struct FlatEmbedder;

#[async_trait]
impl Embedder for FlatEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ChatError> {
        Ok(vec![1.0, 0.0])
    }
}

/// Interprets a tiny line-based subset of Python:
/// `print("x")`, `SUBMIT("v")`, `raise Kind("msg")`, `print(name("arg"))`.
pub struct ScriptedSandbox;

fn quoted(text: &str) -> Option<&str> {
    text.strip_prefix('"')?.strip_suffix('"')
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn execute(
        &mut self,
        code: &str,
        host: &dyn HostCalls,
    ) -> Result<Execution, SandboxError> {
        let mut execution = Execution::default();
        for line in code.lines().map(str::trim) {
            if let Some(arg) = line.strip_prefix("SUBMIT(").and_then(|r| r.strip_suffix(')')) {
                execution.submitted = Some(quoted(arg).unwrap_or(arg).to_string());
            } else if let Some(rest) = line.strip_prefix("raise ") {
                let (kind, msg) = rest.split_once('(').unwrap_or((rest, "\"\")"));
                let msg = quoted(msg.trim_end_matches(')')).unwrap_or_default();
                let raised = format!("{}: {}", kind, msg);
                execution.stderr = format!("Error: {}", raised);
                execution.raised = Some(raised);
                break;
            } else if let Some(inner) = line.strip_prefix("print(").and_then(|r| r.strip_suffix(')')) {
                if let Some(text) = quoted(inner) {
                    execution.stdout.push_str(text);
                    execution.stdout.push('\n');
                    continue;
                }
                let Some((name, arg)) = inner.split_once('(') else {
                    continue;
                };
                let arg = quoted(arg.trim_end_matches(')')).unwrap_or_default();
                let args = CallArgs::positional([Value::String(arg.to_string())]);
                match host.call(name, args).await {
                    Ok(Value::String(s)) => {
                        execution.stdout.push_str(&s);
                        execution.stdout.push('\n');
                    }
                    Ok(other) => {
                        execution.stdout.push_str(&other.to_string());
                        execution.stdout.push('\n');
                    }
                    Err(rlm_engine::sandbox::CallError::Failed(msg)) => {
                        let raised = format!("RuntimeError: {}", msg);
                        execution.stderr = format!("Error: {}", raised);
                        execution.raised = Some(raised);
                        break;
                    }
                    Err(rlm_engine::sandbox::CallError::Upstream(e)) => {
                        return Err(SandboxError::Upstream(e));
                    }
                }
            }
        }
        Ok(execution)
    }
}

/// Hands out [`ScriptedSandbox`]es and remembers every seed.
#[derive(Default)]
pub struct ScriptedFactory {
    created: AtomicUsize,
    seeds: Mutex<Vec<Seed>>,
}

impl ScriptedFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn seeds(&self) -> Vec<Seed> {
        self.seeds.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxFactory for ScriptedFactory {
    async fn create(&self, seed: &Seed) -> Result<Box<dyn Sandbox>, SandboxError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.seeds.lock().unwrap().push(seed.clone());
        Ok(Box::new(ScriptedSandbox))
    }
}

/// Wrap `code` the way the model does.
pub fn fenced(code: &str) -> String {
    format!("Running this.\n```python\n{}\n```", code)
}
