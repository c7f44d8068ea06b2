//! Newline-delimited JSON messages exchanged with the host process
//!
//! Requests arrive as `{"text": "..."}`, one per line. Every line written back
//! is a single JSON object: startup status messages, ranked results, or
//! errors. A request without text is answered with `{"error": "No text provided"}`.

use crate::RequestError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;

/// Value of the `status` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Loading,
    Ready,
    Success,
    Error,
}

/// One classification request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub text: String,
}

impl Request {
    /// Parse one input line.
    ///
    /// An absent, null or empty `text` is [`RequestError::MissingText`]; anything
    /// that is not an object with a string `text` is [`RequestError::Malformed`].
    pub fn parse(line: &str) -> Result<Self, RequestError> {
        let value: Value = serde_json::from_str(line.trim())
            .map_err(|e| RequestError::Malformed(e.to_string()))?;

        let Value::Object(fields) = value else {
            return Err(RequestError::Malformed(
                "request must be a JSON object".to_string(),
            ));
        };

        match fields.get("text") {
            None | Some(Value::Null) => Err(RequestError::MissingText),
            Some(Value::String(text)) if text.is_empty() => Err(RequestError::MissingText),
            Some(Value::String(text)) => Ok(Self { text: text.clone() }),
            Some(other) => Err(RequestError::Malformed(format!(
                "\"text\" must be a string, got {}",
                other
            ))),
        }
    }
}

/// A label and its softmax probability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredIntent {
    pub intent: String,
    pub confidence: f64,
}

/// Any line the server writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Results {
        status: Status,
        results: Vec<ScoredIntent>,
    },
    Message {
        status: Status,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intents: Option<Vec<String>>,
    },
    MissingText {
        error: String,
    },
}

impl Response {
    pub fn loading(message: impl Into<String>) -> Self {
        Response::Message {
            status: Status::Loading,
            message: message.into(),
            intents: None,
        }
    }

    pub fn ready(message: impl Into<String>, intents: Vec<String>) -> Self {
        Response::Message {
            status: Status::Ready,
            message: message.into(),
            intents: Some(intents),
        }
    }

    pub fn success(results: Vec<ScoredIntent>) -> Self {
        Response::Results {
            status: Status::Success,
            results,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Message {
            status: Status::Error,
            message: message.into(),
            intents: None,
        }
    }

    /// The response for a failed request
    pub fn from_request_error(err: &RequestError) -> Self {
        match err {
            RequestError::MissingText => Response::MissingText {
                error: err.to_string(),
            },
            other => Response::error(other.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        match self {
            Response::Results { status, .. } | Response::Message { status, .. } => {
                *status == Status::Error
            }
            Response::MissingText { .. } => true,
        }
    }

    /// Write as one line and flush, so the host sees it immediately
    pub fn write_line<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        serde_json::to_writer(&mut *out, self)?;
        out.write_all(b"\n")?;
        out.flush()
    }
}
