//! Agent presence registry: a membership set plus per-agent metadata,
//! advisory only (no eviction, no liveness expiry).

use std::sync::Arc;

use chrono::Utc;

use crate::broker::BrokerClient;
use crate::error::RegistryError;
use crate::keys::StreamKeyBuilder;

pub struct AgentRegistry {
    broker: Arc<dyn BrokerClient>,
    keys: StreamKeyBuilder,
}

impl AgentRegistry {
    pub fn new(broker: Arc<dyn BrokerClient>, keys: StreamKeyBuilder) -> Self {
        Self { broker, keys }
    }

    /// Adds `agent_id` to the membership set. On first registration only,
    /// writes its metadata map including a `registered_at` timestamp;
    /// subsequent calls leave existing metadata untouched.
    pub async fn register(
        &self,
        agent_id: &str,
        metadata: &[(String, String)],
    ) -> Result<(), RegistryError> {
        let is_new = self
            .broker
            .set_add(&self.keys.registry_agents(), agent_id)
            .await?;

        if is_new {
            let mut fields = metadata.to_vec();
            fields.push(("registered_at".to_string(), Utc::now().to_rfc3339()));
            self.broker
                .map_set(&self.keys.registry_info(agent_id), &fields)
                .await?;
        }

        Ok(())
    }

    pub async fn unregister(&self, agent_id: &str) -> Result<(), RegistryError> {
        self.broker
            .set_rem(&self.keys.registry_agents(), agent_id)
            .await?;
        self.broker.map_del(&self.keys.registry_info(agent_id)).await?;
        Ok(())
    }

    pub async fn is_registered(&self, agent_id: &str) -> Result<bool, RegistryError> {
        Ok(self
            .broker
            .set_has(&self.keys.registry_agents(), agent_id)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;

    #[tokio::test]
    async fn register_then_is_registered() {
        let broker: Arc<dyn BrokerClient> = Arc::new(MemoryBroker::new());
        let registry = AgentRegistry::new(broker, StreamKeyBuilder::new("AG1"));

        assert!(!registry.is_registered("echo").await.unwrap());
        registry.register("echo", &[]).await.unwrap();
        assert!(registry.is_registered("echo").await.unwrap());
    }

    #[tokio::test]
    async fn unregister_removes_membership() {
        let broker: Arc<dyn BrokerClient> = Arc::new(MemoryBroker::new());
        let registry = AgentRegistry::new(broker, StreamKeyBuilder::new("AG1"));

        registry.register("echo", &[]).await.unwrap();
        registry.unregister("echo").await.unwrap();
        assert!(!registry.is_registered("echo").await.unwrap());
    }

    #[tokio::test]
    async fn second_register_does_not_overwrite_metadata() {
        let broker: Arc<dyn BrokerClient> = Arc::new(MemoryBroker::new());
        let registry = AgentRegistry::new(broker.clone(), StreamKeyBuilder::new("AG1"));

        registry
            .register("echo", &[("version".to_string(), "1".to_string())])
            .await
            .unwrap();
        registry
            .register("echo", &[("version".to_string(), "2".to_string())])
            .await
            .unwrap();

        // second call is a no-op on metadata since the agent was already a member
        assert!(registry.is_registered("echo").await.unwrap());
    }
}
