use crate::agent::AgentKind;
use crate::error::{CarelineError, CarelineResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The opaque key-value body carried by envelopes.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Serialize any value into a [`Payload`]. The value must encode as a JSON object.
pub fn to_payload<T: Serialize>(value: &T) -> CarelineResult<Payload> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(CarelineError::validation(format!(
            "payload must be a JSON object, got {other}"
        ))),
    }
}

/// Decode a typed value out of a [`Payload`], reporting missing or malformed
/// fields as validation errors.
pub fn from_payload<T: DeserializeOwned>(payload: &Payload) -> CarelineResult<T> {
    serde_json::from_value(serde_json::Value::Object(payload.clone()))
        .map_err(|e| CarelineError::validation(format!("invalid payload: {e}")))
}

/// A point-to-point request from one agent to another.
///
/// Immutable once built; `correlation_id` is set with [`Message::correlated`]
/// and never rewritten afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MessageRepr")]
pub struct Message {
    id: String,
    from: String,
    to: AgentKind,
    action: String,
    payload: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct MessageRepr {
    id: String,
    from: String,
    to: AgentKind,
    action: String,
    #[serde(default)]
    payload: Payload,
    #[serde(default)]
    correlation_id: Option<String>,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
}

impl TryFrom<MessageRepr> for Message {
    type Error = CarelineError;

    fn try_from(repr: MessageRepr) -> Result<Self, Self::Error> {
        if repr.action.trim().is_empty() {
            return Err(CarelineError::validation("message action must not be empty"));
        }
        if repr.id.is_empty() {
            return Err(CarelineError::validation("message id must not be empty"));
        }
        Ok(Self {
            id: repr.id,
            from: repr.from,
            to: repr.to,
            action: repr.action,
            payload: repr.payload,
            correlation_id: repr.correlation_id,
            timestamp: repr.timestamp,
        })
    }
}

impl Message {
    /// Build a new top-level message with a fresh id and no correlation id.
    pub fn new(
        from: impl Into<String>,
        to: AgentKind,
        action: impl Into<String>,
        payload: Payload,
    ) -> CarelineResult<Self> {
        let action = action.into();
        if action.trim().is_empty() {
            return Err(CarelineError::validation("message action must not be empty"));
        }
        Ok(Self {
            id: format!("msg_{}", Uuid::new_v4().simple()),
            from: from.into(),
            to,
            action,
            payload,
            correlation_id: None,
            timestamp: Utc::now(),
        })
    }

    /// Attach the id of the task this message is issued on behalf of.
    pub fn correlated(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Unique id of this send.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sender identity.
    pub fn from(&self) -> &str {
        &self.from
    }

    /// Target agent.
    pub fn to(&self) -> AgentKind {
        self.to
    }

    /// Requested action name.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Request body.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Task this message belongs to, if it was issued within one.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Send time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// The single reply to a [`Message`].
///
/// A failed response never carries a payload and always carries a non-empty
/// error; a successful one never carries an error. Both hold on the wire too:
/// decoding rejects envelopes that break them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ResponseRepr")]
pub struct Response {
    message_id: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ResponseRepr {
    message_id: String,
    success: bool,
    #[serde(default)]
    payload: Option<Payload>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
}

impl TryFrom<ResponseRepr> for Response {
    type Error = CarelineError;

    fn try_from(repr: ResponseRepr) -> Result<Self, Self::Error> {
        match (repr.success, &repr.payload, &repr.error) {
            (true, _, Some(_)) => Err(CarelineError::validation(
                "successful response must not carry an error",
            )),
            (false, Some(_), _) => Err(CarelineError::validation(
                "failed response must not carry a payload",
            )),
            (false, _, None) => Err(CarelineError::validation(
                "failed response must carry an error",
            )),
            (false, _, Some(e)) if e.trim().is_empty() => Err(CarelineError::validation(
                "failed response must carry a non-empty error",
            )),
            _ => Ok(Self {
                message_id: repr.message_id,
                success: repr.success,
                payload: repr.payload,
                error: repr.error,
                timestamp: repr.timestamp,
            }),
        }
    }
}

const UNSPECIFIED_FAILURE: &str = "unspecified failure";

impl Response {
    /// A successful reply carrying `payload`.
    pub fn success(message_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            message_id: message_id.into(),
            success: true,
            payload: Some(payload),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// A failed reply. An empty error text is replaced so the invariant holds.
    pub fn failure(message_id: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        let error = if error.trim().is_empty() {
            UNSPECIFIED_FAILURE.to_string()
        } else {
            error
        };
        Self {
            message_id: message_id.into(),
            success: false,
            payload: None,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }

    /// Id of the message this response answers.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Whether the remote handler succeeded.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Reply body (only on success).
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Error text (only on failure).
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Creation time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Convert into a `Result`, mapping a failure into [`CarelineError::PeerFailure`]
    /// with the error text unchanged.
    pub fn into_result(self) -> CarelineResult<Payload> {
        if self.success {
            Ok(self.payload.unwrap_or_default())
        } else {
            Err(CarelineError::PeerFailure(
                self.error.unwrap_or_else(|| UNSPECIFIED_FAILURE.to_string()),
            ))
        }
    }

    /// Decode the payload of a successful response into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> CarelineResult<T> {
        match (&self.payload, &self.error) {
            (Some(payload), None) => from_payload(payload),
            (_, Some(err)) => Err(CarelineError::PeerFailure(err.clone())),
            (None, None) => Err(CarelineError::validation("response carries no payload")),
        }
    }
}
