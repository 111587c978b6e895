//! The pluggable transport underneath publish/subscribe/RPC: a trait plus an
//! in-memory and a Redis-Streams-backed implementation.

pub mod memory;
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::BrokerError;

/// One entry read back off a stream: its id plus its raw field map.
/// Field values stay as bytes so callers can accept either the canonical
/// `"data"` key or the legacy `"envelope"` key without the broker caring.
#[derive(Clone, Debug)]
pub struct BrokerEntry {
    pub id: String,
    pub fields: HashMap<String, Vec<u8>>,
}

impl BrokerEntry {
    /// The envelope payload, accepting `"data"` (canonical) or `"envelope"`
    /// (legacy) field names.
    pub fn payload(&self) -> Option<&[u8]> {
        self.fields
            .get("data")
            .or_else(|| self.fields.get("envelope"))
            .map(|v| v.as_slice())
    }
}

/// Transport capability required by everything above the broker layer.
/// Object-safe so adapters, subscribers, and RPC can hold `Arc<dyn BrokerClient>`
/// without committing to a concrete backend.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BrokerError>;

    async fn append(
        &self,
        stream: &str,
        field: &str,
        payload: &[u8],
        cap: u64,
    ) -> Result<String, BrokerError>;

    async fn exists(&self, stream: &str) -> Result<bool, BrokerError>;

    /// Cursor-based scan for stream keys matching `pattern`. Returns the
    /// next cursor (`"0"` means the scan is complete) and the matches found
    /// in this page.
    async fn scan(&self, cursor: &str, pattern: &str) -> Result<(String, Vec<String>), BrokerError>;

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<BrokerEntry>, BrokerError>;

    /// Groupless read, starting after `from_id` (`"$"` means "only new").
    async fn read(
        &self,
        stream: &str,
        from_id: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<BrokerEntry>, BrokerError>;

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), BrokerError>;

    /// Non-destructive range read, mirroring `XRANGE`: entries with ids in
    /// `[from, to]` inclusive, up to `count`. `"-"` and `"+"` mean the start
    /// and end of the stream respectively. Does not touch consumer-group
    /// state and requires no `ack`.
    async fn range(
        &self,
        stream: &str,
        from: &str,
        to: &str,
        count: usize,
    ) -> Result<Vec<BrokerEntry>, BrokerError>;

    async fn set_add(&self, set: &str, member: &str) -> Result<bool, BrokerError>;
    async fn set_rem(&self, set: &str, member: &str) -> Result<(), BrokerError>;
    async fn set_has(&self, set: &str, member: &str) -> Result<bool, BrokerError>;

    async fn map_set(&self, key: &str, fields: &[(String, String)]) -> Result<(), BrokerError>;
    async fn map_del(&self, key: &str) -> Result<(), BrokerError>;

    async fn health_check(&self) -> Result<(), BrokerError>;

    fn backend_name(&self) -> &'static str;
}
