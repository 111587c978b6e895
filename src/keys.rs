//! Deterministic stream-key naming.

use crate::constants::DEFAULT_NAMESPACE;

/// Builds the colon-separated stream and registry keys used across the bus.
/// Pure and side-effect free — callers own connecting these names to an
/// actual broker.
#[derive(Clone, Debug)]
pub struct StreamKeyBuilder {
    namespace: String,
}

impl Default for StreamKeyBuilder {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl StreamKeyBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn edge_inbound_pattern(&self, platform: &str) -> String {
        format!("{}:edge:{platform}:*:stream", self.namespace)
    }

    pub fn edge_response_pattern(&self, platform: &str) -> String {
        format!("{}:edge:{platform}:*:response", self.namespace)
    }

    pub fn agent_inbox(&self, agent_id: &str) -> String {
        format!("{}:agent:{agent_id}:inbox", self.namespace)
    }

    pub fn agent_outbox(&self, agent_id: &str) -> String {
        format!("{}:agent:{agent_id}:outbox", self.namespace)
    }

    pub fn user_inbox(&self, user_id: &str) -> String {
        format!("{}:user:{user_id}:inbox", self.namespace)
    }

    pub fn flow_input(&self, flow_id: &str) -> String {
        format!("{}:flow:{flow_id}:input", self.namespace)
    }

    pub fn flow_output(&self, flow_id: &str) -> String {
        format!("{}:flow:{flow_id}:output", self.namespace)
    }

    pub fn session_stream(&self, session_code: &str) -> String {
        format!("{}:session:{session_code}:stream", self.namespace)
    }

    pub fn edge_register(&self, platform: &str) -> String {
        format!("{}:edge:{platform}:register", self.namespace)
    }

    pub fn edge_stream(&self, platform: &str, channel_id: &str) -> String {
        format!("{}:edge:{platform}:{channel_id}:stream", self.namespace)
    }

    pub fn edge_response(&self, platform: &str, channel_id: &str) -> String {
        format!("{}:edge:{platform}:{channel_id}:response", self.namespace)
    }

    pub fn a2a_register(&self) -> String {
        format!("{}:a2a:register", self.namespace)
    }

    pub fn a2a_inbox(&self, agent_name: &str) -> String {
        format!("{}:a2a:{agent_name}:inbox", self.namespace)
    }

    pub fn a2a_stream(&self, agent_name: &str, task_id: &str) -> String {
        format!("{}:a2a:{agent_name}:{task_id}:stream", self.namespace)
    }

    pub fn a2a_response(&self, agent_name: &str, task_id: &str) -> String {
        format!("{}:a2a:{agent_name}:{task_id}:response", self.namespace)
    }

    /// Per-agent accounting ledger.
    pub fn billing_ledger(&self, agent_id: &str) -> String {
        format!("{}:billing:{agent_id}:ledger", self.namespace)
    }

    /// Per-cassette memory.
    pub fn memory_key(&self, cassette_id: &str) -> String {
        format!("{}:memory:{cassette_id}:write", self.namespace)
    }

    pub fn rpc_reply(&self, agent_id: &str) -> String {
        format!(
            "{}:rpc_reply:{agent_id}:{}",
            self.namespace,
            uuid::Uuid::new_v4()
        )
    }

    pub fn registry_agents(&self) -> String {
        format!("{}:registry:agents", self.namespace)
    }

    pub fn registry_info(&self, agent_id: &str) -> String {
        format!("{}:registry:info:{agent_id}", self.namespace)
    }
}
