//! Newline-delimited JSON spoken between the host and the worker
//!
//! Every message is one JSON object on one line, tagged by `type`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Host → worker
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage<'a> {
    /// First message after spawn; builds the namespace.
    Init {
        context: &'a str,
        functions: &'a [String],
    },
    /// Run a fragment in the namespace.
    Exec { code: &'a str },
    /// Reply to a `call`.
    Result {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl HostMessage<'_> {
    pub fn success(value: Value) -> Self {
        HostMessage::Result {
            ok: true,
            value: Some(value),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        HostMessage::Result {
            ok: false,
            value: None,
            error: Some(error.into()),
        }
    }

    /// Serialize as one protocol line, newline included.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Worker → host
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Namespace built, waiting for `exec`.
    Ready,
    /// A bound host function was called; the worker blocks until `result`.
    Call {
        name: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        kwargs: Map<String, Value>,
    },
    /// The fragment finished (normally or by raising).
    Done {
        #[serde(default)]
        stdout: String,
        #[serde(default)]
        stderr: String,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        submitted: Option<String>,
    },
}

impl WorkerMessage {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}
