//! Publishing envelopes onto a stream, with the size gate applied before any
//! broker call is made.

use std::sync::Arc;

use crate::broker::BrokerClient;
use crate::envelope::Envelope;
use crate::error::PublishError;

#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn BrokerClient>,
    maxlen: u64,
    size_limit: usize,
}

impl Publisher {
    pub fn new(broker: Arc<dyn BrokerClient>, maxlen: u64, size_limit: usize) -> Self {
        Self {
            broker,
            maxlen,
            size_limit,
        }
    }

    /// Serializes `envelope` and appends it to `stream` under the canonical
    /// `"data"` field. Rejects oversized envelopes before touching the
    /// broker; no discovery side-effect is emitted on first publish.
    pub async fn publish(&self, stream: &str, envelope: &Envelope) -> Result<String, PublishError> {
        let bytes = envelope.to_bytes()?;
        if bytes.len() > self.size_limit {
            return Err(PublishError::PayloadTooLarge {
                size: bytes.len(),
                limit: self.size_limit,
            });
        }

        let id = self.broker.append(stream, "data", &bytes, self.maxlen).await?;
        Ok(id)
    }
}
