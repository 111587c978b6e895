//! The wire-level message unit carried on every stream.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::EnvelopeError;

/// A single message on the bus. Fields beyond `role` are all optional or
/// default to empty; unknown fields in incoming JSON are dropped silently on
/// decode so older and newer producers/consumers can coexist.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub envelope_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub envelope_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub content: HashMap<String, Value>,
    #[serde(default)]
    pub trace: Vec<String>,
    #[serde(default)]
    pub headers: HashMap<String, Value>,
    #[serde(default)]
    pub meta: HashMap<String, Value>,
    #[serde(default)]
    pub usage: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_hint: Option<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_signature: Option<String>,
    pub timestamp: String,
}

impl Envelope {
    /// Construct a new envelope for `role`, stamping a fresh id and
    /// timestamp and defaulting `envelope_type` to `"message"`.
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            envelope_id: Uuid::new_v4().to_string(),
            correlation_id: None,
            role: role.into(),
            envelope_type: Some("message".to_string()),
            user_id: None,
            agent_name: None,
            session_code: None,
            task_id: None,
            target: None,
            reply_to: None,
            content: HashMap::new(),
            trace: Vec::new(),
            headers: HashMap::new(),
            meta: HashMap::new(),
            usage: HashMap::new(),
            billing_hint: None,
            tools_used: Vec::new(),
            auth_signature: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn with_content(mut self, content: HashMap<String, Value>) -> Self {
        self.content = content;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_agent_name(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn with_session_code(mut self, session_code: impl Into<String>) -> Self {
        self.session_code = Some(session_code.into());
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let text = std::str::from_utf8(bytes).map_err(|_| EnvelopeError::InvalidUtf8)?;
        let cleaned: std::borrow::Cow<str> = if text.contains('\0') {
            std::borrow::Cow::Owned(text.replace('\0', ""))
        } else {
            std::borrow::Cow::Borrowed(text)
        };
        Ok(serde_json::from_str(&cleaned)?)
    }

    /// Appends `"{label}:{unix_timestamp}"` to `trace`.
    pub fn add_hop(&mut self, label: &str) {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.trace.push(format!("{label}:{secs}"));
    }

    /// Size of the serialized form, used by the publisher's size gate.
    pub fn size_bytes(&self) -> Result<usize, EnvelopeError> {
        Ok(self.to_bytes()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let mut env = Envelope::new("user").with_target("agent.echo");
        env.content.insert("text".to_string(), Value::String("hi".to_string()));
        env.add_hop("bus_publish");

        let bytes = env.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn decode_tolerates_unknown_fields() {
        let json = serde_json::json!({
            "envelope_id": "e1",
            "role": "user",
            "timestamp": "2024-01-01T00:00:00Z",
            "from_the_future": {"nested": true},
        });
        let decoded = Envelope::from_bytes(json.to_string().as_bytes()).unwrap();
        assert_eq!(decoded.envelope_id, "e1");
        assert_eq!(decoded.envelope_type, None);
    }

    #[test]
    fn decode_strips_nul_bytes() {
        let mut json = serde_json::json!({
            "envelope_id": "e1",
            "role": "user",
            "timestamp": "2024-01-01T00:00:00Z",
        })
        .to_string();
        json.push('\0');
        let decoded = Envelope::from_bytes(json.as_bytes()).unwrap();
        assert_eq!(decoded.envelope_id, "e1");
    }

    #[test]
    fn new_defaults_envelope_type_to_message() {
        let env = Envelope::new("user");
        assert_eq!(env.envelope_type.as_deref(), Some("message"));
    }

    #[test]
    fn add_hop_appends_label_and_timestamp() {
        let mut env = Envelope::new("user");
        env.add_hop("bus_subscribe");
        assert_eq!(env.trace.len(), 1);
        assert!(env.trace[0].starts_with("bus_subscribe:"));
    }
}
