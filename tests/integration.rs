//! End-to-end checks against `MemoryBroker` only; no live Redis required.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use aetherbus::broker::memory::MemoryBroker;
use aetherbus::broker::BrokerClient;
use aetherbus::publisher::Publisher;
use aetherbus::subscriber::{ConsumerGroupSubscriber, Handler};
use aetherbus::{Envelope, StreamKeyBuilder};

#[test]
fn envelope_round_trips_through_bytes() {
    let mut env = Envelope::new("user").with_correlation_id("corr-1");
    env.content
        .insert("text".to_string(), serde_json::json!("hello"));

    let bytes = env.to_bytes().unwrap();
    let decoded = Envelope::from_bytes(&bytes).unwrap();

    assert_eq!(decoded, env);
}

#[test]
fn stream_key_builder_is_deterministic_across_instances() {
    let a = StreamKeyBuilder::new("AG1");
    let b = StreamKeyBuilder::new("AG1");

    assert_eq!(a.agent_inbox("echo"), b.agent_inbox("echo"));
    assert_eq!(a.session_stream("s1"), "AG1:session:s1:stream");
    assert_eq!(a.billing_ledger("echo"), "AG1:billing:echo:ledger");
    assert_eq!(a.memory_key("cassette-1"), "AG1:memory:cassette-1:write");
}

struct EchoHandler {
    seen: Arc<AtomicU32>,
}

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, _envelope: Envelope, _broker: &dyn BrokerClient) -> anyhow::Result<()> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn publish_subscribe_ack_happy_path() {
    let broker: Arc<dyn BrokerClient> = Arc::new(MemoryBroker::new());
    let keys = StreamKeyBuilder::new("AG1");
    let stream = keys.agent_inbox("echo");

    let publisher = Publisher::new(broker.clone(), 1_000, 131_072);
    let env = Envelope::new("user").with_target("echo");
    publisher.publish(&stream, &env).await.unwrap();

    let seen = Arc::new(AtomicU32::new(0));
    let handler = EchoHandler { seen: seen.clone() };
    let subscriber =
        ConsumerGroupSubscriber::new(broker.clone(), stream.clone(), "g1", "c1", handler)
            .with_block_ms(50);
    let (task, cancel) = subscriber.spawn();

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let _ = cancel.send(true);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), task).await;

    assert_eq!(seen.load(Ordering::SeqCst), 1);

    // The delivered entry was acked: a fresh consumer in the same group has
    // nothing pending to redeliver.
    let entries = broker
        .read_group("g1", "c2", &stream, 10, 20)
        .await
        .unwrap();
    assert!(entries.is_empty());
}
