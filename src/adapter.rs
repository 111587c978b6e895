//! The agent-facing façade: register, subscribe, publish, call, wait — all
//! subscriptions tracked so `stop()` can cancel and drain them uniformly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::broker::BrokerClient;
use crate::envelope::Envelope;
use crate::error::{PublishError, RpcError};
use crate::keys::StreamKeyBuilder;
use crate::publisher::Publisher;
use crate::registry::AgentRegistry;
use crate::subscriber::{ConsumerGroupSubscriber, Handler};

struct SubscriptionHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns one agent's wiring onto the bus: its consumer-group subscriptions,
/// its publisher, and its registry membership.
pub struct BusAdapter {
    agent_id: String,
    group: String,
    broker: Arc<dyn BrokerClient>,
    publisher: Publisher,
    registry: Arc<AgentRegistry>,
    keys: StreamKeyBuilder,
    subscriptions: Mutex<HashMap<String, SubscriptionHandle>>,
}

impl BusAdapter {
    pub fn new(
        agent_id: impl Into<String>,
        group: impl Into<String>,
        broker: Arc<dyn BrokerClient>,
        registry: Arc<AgentRegistry>,
        keys: StreamKeyBuilder,
        stream_maxlen: u64,
        envelope_size_limit: usize,
    ) -> Self {
        let publisher = Publisher::new(broker.clone(), stream_maxlen, envelope_size_limit);
        Self {
            agent_id: agent_id.into(),
            group: group.into(),
            broker,
            publisher,
            registry,
            keys,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Registers this agent and subscribes its inbox.
    pub async fn start<H: Handler + 'static>(&self, handler: H) -> anyhow::Result<()> {
        self.registry.register(&self.agent_id, &[]).await?;
        let inbox = self.keys.agent_inbox(&self.agent_id);
        self.add_subscription(inbox, handler).await;
        Ok(())
    }

    /// Cancels every subscription (bounded wait per task), then
    /// unregisters. Errors raised while a subscription task winds down are
    /// swallowed — shutdown must still complete.
    pub async fn stop(&self) {
        let handles: Vec<_> = {
            let mut subs = self.subscriptions.lock().await;
            subs.drain().collect()
        };

        for (stream, handle) in handles {
            let _ = handle.cancel.send(true);
            if tokio::time::timeout(Duration::from_secs(5), handle.task)
                .await
                .is_err()
            {
                tracing::warn!(stream = %stream, "subscription task did not stop within timeout");
            }
        }

        if let Err(e) = self.registry.unregister(&self.agent_id).await {
            tracing::warn!(error = %e, "failed to unregister agent during shutdown");
        }
    }

    pub async fn add_subscription<H: Handler + 'static>(&self, stream: impl Into<String>, handler: H) {
        let stream = stream.into();
        let consumer = format!("{}-{}", self.agent_id, uuid::Uuid::new_v4());
        let subscriber = ConsumerGroupSubscriber::new(
            self.broker.clone(),
            stream.clone(),
            self.group.clone(),
            consumer,
            handler,
        );
        let (task, cancel) = subscriber.spawn();
        self.subscriptions
            .lock()
            .await
            .insert(stream, SubscriptionHandle { cancel, task });
    }

    pub async fn remove_subscription(&self, stream: &str) {
        let handle = self.subscriptions.lock().await.remove(stream);
        if let Some(handle) = handle {
            let _ = handle.cancel.send(true);
            if tokio::time::timeout(Duration::from_secs(5), handle.task)
                .await
                .is_err()
            {
                tracing::warn!(stream = %stream, "subscription task did not stop within timeout");
            }
        }
    }

    pub async fn publish(&self, stream: &str, envelope: &Envelope) -> Result<String, PublishError> {
        self.publisher.publish(stream, envelope).await
    }

    pub async fn request_response(
        &self,
        stream: &str,
        req: Envelope,
        timeout: Duration,
    ) -> Result<Envelope, RpcError> {
        let reply_to = self.keys.rpc_reply(&self.agent_id);
        crate::rpc::call(&self.publisher, self.broker.as_ref(), stream, req, &reply_to, timeout).await
    }

    /// Groupless wait for the next envelope on `stream` satisfying
    /// `predicate`, bounded by `timeout`.
    pub async fn wait_for_next_message(
        &self,
        stream: &str,
        predicate: impl Fn(&Envelope) -> bool,
        timeout: Duration,
    ) -> Result<Option<Envelope>, RpcError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut from_id = "$".to_string();

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let entries = self
                .broker
                .read(stream, &from_id, 10, remaining.as_millis() as u64)
                .await?;

            for entry in entries {
                from_id = entry.id.clone();
                let Some(payload) = entry.payload() else { continue };
                match Envelope::from_bytes(payload) {
                    Ok(env) if predicate(&env) => return Ok(Some(env)),
                    Ok(_) => continue,
                    Err(e) => tracing::warn!(error = %e, "skipping malformed envelope while waiting"),
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    pub async fn list_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.keys().cloned().collect()
    }

    pub async fn dump_wiring(&self) -> serde_json::Value {
        serde_json::json!({
            "agent_id": self.agent_id,
            "group": self.group,
            "subscriptions": self.list_subscriptions().await,
        })
    }
}
