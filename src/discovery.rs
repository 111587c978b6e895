//! Scans for streams matching a glob pattern and spawns a subscriber for
//! each newly discovered one. Names are added to a flat set and never
//! removed — a stream that disappears just stops producing deliveries.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::broker::BrokerClient;
use crate::subscriber::{ConsumerGroupSubscriber, Handler};

pub struct PatternDiscoverer<H: Handler + Clone + 'static> {
    broker: Arc<dyn BrokerClient>,
    pattern: String,
    group: String,
    handler: H,
    poll_delay: Duration,
    subscribed: HashSet<String>,
    tasks: Vec<(JoinHandle<()>, watch::Sender<bool>)>,
}

impl<H: Handler + Clone + 'static> PatternDiscoverer<H> {
    pub fn new(broker: Arc<dyn BrokerClient>, pattern: impl Into<String>, group: impl Into<String>, handler: H) -> Self {
        Self {
            broker,
            pattern: pattern.into(),
            group: group.into(),
            handler,
            poll_delay: Duration::from_secs(crate::constants::DEFAULT_DISCOVERY_POLL_DELAY_SECS),
            subscribed: HashSet::new(),
            tasks: Vec::new(),
        }
    }

    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// Currently-discovered stream names.
    pub fn subscribed(&self) -> &HashSet<String> {
        &self.subscribed
    }

    /// Runs until `cancel` fires, scanning for new matches every
    /// `poll_delay` and spawning a `ConsumerGroupSubscriber` for each.
    /// Child subscriber tasks are cancelled alongside this one.
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) {
        loop {
            if *cancel.borrow() {
                break;
            }

            self.discover_once().await;

            tokio::select! {
                _ = cancel.changed() => break,
                _ = tokio::time::sleep(self.poll_delay) => {}
            }
        }

        for (task, child_cancel) in self.tasks {
            let _ = child_cancel.send(true);
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
    }

    async fn discover_once(&mut self) {
        let mut cursor = "0".to_string();
        loop {
            let (next_cursor, matches) = match self.broker.scan(&cursor, &self.pattern).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(pattern = %self.pattern, error = %e, "discovery scan failed");
                    return;
                }
            };

            for stream in matches {
                if self.subscribed.contains(&stream) {
                    continue;
                }
                if let Err(e) = self.broker.ensure_group(&stream, &self.group).await {
                    tracing::warn!(stream = %stream, error = %e, "failed to ensure consumer group for discovered stream");
                    continue;
                }
                let consumer = format!("{}-{}", self.group, uuid::Uuid::new_v4());
                let subscriber = ConsumerGroupSubscriber::new(
                    self.broker.clone(),
                    stream.clone(),
                    self.group.clone(),
                    consumer,
                    self.handler.clone(),
                );
                let (task, child_cancel) = subscriber.spawn();
                self.tasks.push((task, child_cancel));
                self.subscribed.insert(stream.clone());
                tracing::debug!(stream = %stream, "discovered and subscribed to new stream");
            }

            cursor = next_cursor;
            if cursor == "0" {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use crate::envelope::Envelope;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Clone)]
    struct CountingHandler(Arc<AtomicU32>);

    #[async_trait]
    impl Handler for CountingHandler {
        async fn handle(&self, _envelope: Envelope, _broker: &dyn BrokerClient) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn discovers_new_streams_matching_pattern() {
        let broker: Arc<dyn BrokerClient> = Arc::new(MemoryBroker::new());
        broker
            .append("AG1:agent:alpha:inbox", "data", b"x", 10)
            .await
            .unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let discoverer = PatternDiscoverer::new(
            broker.clone(),
            "AG1:agent:*:inbox",
            "discovery-group",
            CountingHandler(calls.clone()),
        )
        .with_poll_delay(Duration::from_millis(20));

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(discoverer.run(cancel_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = cancel_tx.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(1), task).await;

        assert!(calls.load(Ordering::SeqCst) >= 1);
    }
}
