//! Wire format for the command queue and the response topic.
//!
//! Inbound messages are `{ "type": <event>, "data": { ... } }` objects.
//! The parser accepts raw bytes, a UTF-8 string, or an already-parsed value;
//! anything that does not decode into a known command shape is rejected as
//! malformed before it can reach a handler.

use serde_json::{json, Value};

use crate::error::RouterError;

// ---------------------------------------------------------------------------
// Inbound commands
// ---------------------------------------------------------------------------

pub const EVENT_TRAIN_BUILT: &str = "trainBuilt";
pub const EVENT_TRAIN_START: &str = "startTrain";
pub const EVENT_TRAIN_STOP: &str = "stopTrain";
pub const EVENT_TRAIN_PUSHED: &str = "trainPushed";
pub const EVENT_TRAIN_STATUS: &str = "trainStatus";
pub const EVENT_TRAIN_RESET: &str = "trainReset";

/// A parsed command from the message queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterCommand {
    Built {
        train_id: String,
    },
    Start {
        train_id: String,
    },
    Stop {
        train_id: String,
    },
    Pushed {
        train_id: String,
        /// Project reported by the registry webhook. Informational only;
        /// the state store's current station is authoritative.
        project: String,
        operator: String,
    },
    Status {
        train_id: String,
    },
    Reset {
        train_id: String,
    },
    /// An event type outside the known set. Kept as a variant so the
    /// dispatcher can answer it instead of dropping the message.
    Unknown {
        event_type: String,
        train_id: Option<String>,
    },
}

impl RouterCommand {
    pub fn from_bytes(body: &[u8]) -> Result<Self, RouterError> {
        let value: Value = serde_json::from_slice(body)?;
        Self::from_value(&value)
    }

    pub fn from_str(body: &str) -> Result<Self, RouterError> {
        let value: Value = serde_json::from_str(body)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, RouterError> {
        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| RouterError::MalformedMessage("missing type field".into()))?;
        let data = value
            .get("data")
            .ok_or_else(|| RouterError::MalformedMessage("missing data field".into()))?;

        match event_type {
            EVENT_TRAIN_BUILT => Ok(RouterCommand::Built {
                train_id: built_train_id(data)?,
            }),
            EVENT_TRAIN_START => Ok(RouterCommand::Start {
                train_id: id_field(data)?,
            }),
            EVENT_TRAIN_STOP => Ok(RouterCommand::Stop {
                train_id: id_field(data)?,
            }),
            EVENT_TRAIN_PUSHED => {
                let (project, train_id) = split_repository(data)?;
                let operator = data
                    .get("operator")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        RouterError::MalformedMessage("push event missing operator".into())
                    })?;
                Ok(RouterCommand::Pushed {
                    train_id,
                    project,
                    operator: operator.to_string(),
                })
            }
            EVENT_TRAIN_STATUS => Ok(RouterCommand::Status {
                train_id: id_field(data)?,
            }),
            EVENT_TRAIN_RESET => Ok(RouterCommand::Reset {
                train_id: id_field(data)?,
            }),
            other => Ok(RouterCommand::Unknown {
                event_type: other.to_string(),
                train_id: data
                    .get("id")
                    .or_else(|| data.get("trainId"))
                    .and_then(Value::as_str)
                    .map(String::from),
            }),
        }
    }

    pub fn train_id(&self) -> Option<&str> {
        match self {
            RouterCommand::Built { train_id }
            | RouterCommand::Start { train_id }
            | RouterCommand::Stop { train_id }
            | RouterCommand::Pushed { train_id, .. }
            | RouterCommand::Status { train_id }
            | RouterCommand::Reset { train_id } => Some(train_id),
            RouterCommand::Unknown { train_id, .. } => train_id.as_deref(),
        }
    }
}

/// Built events arrive either with an explicit train id or with the full
/// repository path the build pipeline pushed to.
fn built_train_id(data: &Value) -> Result<String, RouterError> {
    if let Some(id) = data.get("trainId").and_then(Value::as_str) {
        return non_empty(id);
    }
    let (_, train_id) = split_repository(data)?;
    Ok(train_id)
}

fn id_field(data: &Value) -> Result<String, RouterError> {
    let id = data
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| RouterError::MalformedMessage("missing id field".into()))?;
    non_empty(id)
}

fn split_repository(data: &Value) -> Result<(String, String), RouterError> {
    let full_name = data
        .get("repositoryFullName")
        .and_then(Value::as_str)
        .ok_or_else(|| RouterError::MalformedMessage("missing repositoryFullName field".into()))?;
    let (project, train_id) = full_name.split_once('/').ok_or_else(|| {
        RouterError::MalformedMessage(format!(
            "repositoryFullName is not <project>/<train>: {full_name}"
        ))
    })?;
    if project.is_empty() || train_id.is_empty() {
        return Err(RouterError::MalformedMessage(format!(
            "repositoryFullName is not <project>/<train>: {full_name}"
        )));
    }
    Ok((project.to_string(), train_id.to_string()))
}

fn non_empty(id: &str) -> Result<String, RouterError> {
    if id.is_empty() {
        return Err(RouterError::MalformedMessage("empty train id".into()));
    }
    Ok(id.to_string())
}

// ---------------------------------------------------------------------------
// Outbound responses
// ---------------------------------------------------------------------------

/// Event types the router publishes back to the UI topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseEvent {
    Built,
    Started,
    Stopped,
    Moved,
    Completed,
    Status,
    Ignored,
    Failed,
}

impl ResponseEvent {
    pub fn wire_name(&self) -> &'static str {
        match self {
            ResponseEvent::Built => "trainBuilt",
            ResponseEvent::Started => "trainStarted",
            ResponseEvent::Stopped => "trainStopped",
            ResponseEvent::Moved => "trainMoved",
            ResponseEvent::Completed => "trainCompleted",
            ResponseEvent::Status => "trainStatus",
            ResponseEvent::Ignored => "trainIgnored",
            ResponseEvent::Failed => "trainFailed",
        }
    }
}

/// Error codes carried by `trainFailed` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound = 0,
    AlreadyStarted = 1,
    AlreadyStopped = 2,
    NotStarted = 3,
    NotRunning = 4,
    MoveFailed = 5,
    InvalidRoute = 6,
}

/// A response published to the message queue after processing one command.
#[derive(Debug, Clone)]
pub struct RouterResponse {
    pub event: ResponseEvent,
    pub train_id: Option<String>,
    pub message: Option<String>,
    pub error_code: Option<ErrorCode>,
}

impl RouterResponse {
    pub fn success(event: ResponseEvent, train_id: &str, message: impl Into<String>) -> Self {
        Self {
            event,
            train_id: Some(train_id.to_string()),
            message: Some(message.into()),
            error_code: None,
        }
    }

    pub fn failed(
        train_id: Option<&str>,
        error_code: Option<ErrorCode>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event: ResponseEvent::Failed,
            train_id: train_id.map(String::from),
            message: Some(message.into()),
            error_code,
        }
    }

    /// Serialize to the wire shape published on the response topic.
    pub fn to_queue_message(&self) -> Vec<u8> {
        let body = json!({
            "type": self.event.wire_name(),
            "data": {
                "trainId": self.train_id,
                "message": self.message,
                "errorCode": self.error_code.map(|c| c as i64),
            }
        });
        serde_json::to_vec(&body).expect("response serialization cannot fail")
    }
}
