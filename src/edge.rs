//! Shared lifecycle contract for edge bridges (chat platforms, websockets,
//! mail, etc). Only the registration → inbound → response shape lives here;
//! no concrete platform integration does.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::BrokerClient;
use crate::discovery::PatternDiscoverer;
use crate::envelope::Envelope;
use crate::keys::StreamKeyBuilder;
use crate::publisher::Publisher;
use crate::subscriber::{ConsumerGroupSubscriber, Handler};

/// Handles an edge bridge needs to talk back onto the bus.
#[derive(Clone)]
pub struct EdgeContext {
    pub broker: Arc<dyn BrokerClient>,
    pub keys: StreamKeyBuilder,
    pub publisher: Publisher,
}

pub struct EdgeRegistration {
    pub channel_id: String,
}

/// A platform-specific bridge implements this; `run_edge_handler` wires its
/// three streams (register, inbound, response) without knowing the
/// platform's wire format.
#[async_trait]
pub trait EdgeHandler: Send + Sync {
    fn platform(&self) -> &str;
    async fn on_register(&self, envelope: Envelope) -> anyhow::Result<EdgeRegistration>;
    async fn on_inbound(&self, envelope: Envelope, ctx: &EdgeContext) -> anyhow::Result<()>;
    async fn on_response(&self, envelope: Envelope, ctx: &EdgeContext) -> anyhow::Result<()>;
}

/// Dispatches a delivered envelope to one of `EdgeHandler`'s three hooks,
/// selected by `Role`.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    Register,
    Inbound,
    Response,
}

#[derive(Clone)]
struct EdgeRoleHandler<E: EdgeHandler> {
    edge: Arc<E>,
    ctx: EdgeContext,
    role: Role,
}

#[async_trait]
impl<E: EdgeHandler + 'static> Handler for EdgeRoleHandler<E> {
    async fn handle(&self, envelope: Envelope, _broker: &dyn BrokerClient) -> anyhow::Result<()> {
        match self.role {
            Role::Register => {
                self.edge.on_register(envelope).await?;
                Ok(())
            }
            Role::Inbound => self.edge.on_inbound(envelope, &self.ctx).await,
            Role::Response => self.edge.on_response(envelope, &self.ctx).await,
        }
    }
}

/// Handles tasks spawned for one running edge bridge, owned by the caller so
/// it can cancel and join them alongside its own shutdown.
pub struct EdgeHandle {
    register: (JoinHandle<()>, watch::Sender<bool>),
    inbound: (JoinHandle<()>, watch::Sender<bool>),
    response: (JoinHandle<()>, watch::Sender<bool>),
}

impl EdgeHandle {
    pub async fn stop(self) {
        let _ = self.register.1.send(true);
        let _ = self.inbound.1.send(true);
        let _ = self.response.1.send(true);
        let _ = self.register.0.await;
        let _ = self.inbound.0.await;
        let _ = self.response.0.await;
    }
}

/// Subscribes `edge_register` directly, and spawns `PatternDiscoverer`s over
/// the inbound and response stream families so new channels are picked up
/// without a restart.
pub async fn run_edge_handler<E: EdgeHandler + 'static>(
    edge: Arc<E>,
    ctx: EdgeContext,
    group: &str,
) -> EdgeHandle {
    let platform = edge.platform().to_string();

    let register_stream = ctx.keys.edge_register(&platform);
    ctx.broker.ensure_group(&register_stream, group).await.ok();
    let register_subscriber = ConsumerGroupSubscriber::new(
        ctx.broker.clone(),
        register_stream,
        group.to_string(),
        format!("{platform}-register"),
        EdgeRoleHandler {
            edge: edge.clone(),
            ctx: ctx.clone(),
            role: Role::Register,
        },
    );
    let register = register_subscriber.spawn();

    let inbound_pattern = ctx.keys.edge_inbound_pattern(&platform);
    let inbound_discoverer = PatternDiscoverer::new(
        ctx.broker.clone(),
        inbound_pattern,
        group.to_string(),
        EdgeRoleHandler {
            edge: edge.clone(),
            ctx: ctx.clone(),
            role: Role::Inbound,
        },
    );
    let (inbound_cancel, inbound_cancel_rx) = watch::channel(false);
    let inbound = (tokio::spawn(inbound_discoverer.run(inbound_cancel_rx)), inbound_cancel);

    let response_pattern = ctx.keys.edge_response_pattern(&platform);
    let response_discoverer = PatternDiscoverer::new(
        ctx.broker.clone(),
        response_pattern,
        group.to_string(),
        EdgeRoleHandler {
            edge,
            ctx,
            role: Role::Response,
        },
    );
    let (response_cancel, response_cancel_rx) = watch::channel(false);
    let response = (tokio::spawn(response_discoverer.run(response_cancel_rx)), response_cancel);

    EdgeHandle {
        register,
        inbound,
        response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct CountingEdge(Arc<AtomicU32>);

    #[async_trait]
    impl EdgeHandler for CountingEdge {
        fn platform(&self) -> &str {
            "test"
        }

        async fn on_register(&self, _envelope: Envelope) -> anyhow::Result<EdgeRegistration> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(EdgeRegistration {
                channel_id: "c1".to_string(),
            })
        }

        async fn on_inbound(&self, _envelope: Envelope, _ctx: &EdgeContext) -> anyhow::Result<()> {
            Ok(())
        }

        async fn on_response(&self, _envelope: Envelope, _ctx: &EdgeContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn register_handler_invokes_on_register() {
        let broker: Arc<dyn BrokerClient> = Arc::new(MemoryBroker::new());
        let keys = StreamKeyBuilder::new("AG1");
        let ctx = EdgeContext {
            broker: broker.clone(),
            keys: keys.clone(),
            publisher: Publisher::new(broker.clone(), 100, 131_072),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let edge = Arc::new(CountingEdge(calls.clone()));

        broker
            .append(
                &keys.edge_register("test"),
                "data",
                &Envelope::new("edge").to_bytes().unwrap(),
                10,
            )
            .await
            .unwrap();

        let handle = run_edge_handler(edge, ctx, "edge-group").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
