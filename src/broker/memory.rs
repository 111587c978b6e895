//! In-process broker backend used for tests and single-process development.
//! Mirrors the Redis backend's semantics (consumer groups, pending entries,
//! approximate MAXLEN) without needing a live Redis server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BrokerClient, BrokerEntry};
use crate::error::BrokerError;

struct Entry {
    id: String,
    fields: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
struct GroupState {
    next_index: usize,
    pending: HashMap<String, usize>,
}

#[derive(Default)]
struct StreamState {
    entries: Vec<Entry>,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct Sets {
    members: HashMap<String, std::collections::HashSet<String>>,
}

#[derive(Default)]
struct Maps {
    values: HashMap<String, HashMap<String, String>>,
}

/// A `BrokerClient` backed entirely by process memory. Cheap, synchronous
/// under the hood, polling-based for blocking reads.
pub struct MemoryBroker {
    streams: Mutex<HashMap<String, StreamState>>,
    sets: Mutex<Sets>,
    maps: Mutex<Maps>,
    seq: AtomicU64,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            sets: Mutex::new(Sets::default()),
            maps: Mutex::new(Maps::default()),
            seq: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> String {
        let n = self.seq.fetch_add(1, Ordering::SeqCst);
        format!("{n}-0")
    }
}

/// Parses a stream id (`"<millis>-<seq>"`) into a comparable tuple.
/// `"-"` and `"+"` resolve to the minimum and maximum id respectively,
/// matching `XRANGE`'s sentinel semantics.
fn parse_id(id: &str, low_sentinel: u64, high_sentinel: u64) -> (u64, u64) {
    match id {
        "-" => (low_sentinel, 0),
        "+" => (high_sentinel, u64::MAX),
        other => {
            let mut parts = other.splitn(2, '-');
            let ms = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let seq = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            (ms, seq)
        }
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BrokerError> {
        let mut streams = self.streams.lock();
        let state = streams.entry(stream.to_string()).or_default();
        state.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn append(
        &self,
        stream: &str,
        field: &str,
        payload: &[u8],
        cap: u64,
    ) -> Result<String, BrokerError> {
        let id = self.next_id();
        let mut streams = self.streams.lock();
        let state = streams.entry(stream.to_string()).or_default();
        let mut fields = HashMap::new();
        fields.insert(field.to_string(), payload.to_vec());
        state.entries.push(Entry {
            id: id.clone(),
            fields,
        });

        let cap = cap as usize;
        if cap > 0 && state.entries.len() > cap {
            let drop_count = state.entries.len() - cap;
            state.entries.drain(0..drop_count);
            for group in state.groups.values_mut() {
                group.next_index = group.next_index.saturating_sub(drop_count);
            }
        }

        Ok(id)
    }

    async fn exists(&self, stream: &str) -> Result<bool, BrokerError> {
        Ok(self.streams.lock().contains_key(stream))
    }

    async fn scan(
        &self,
        _cursor: &str,
        pattern: &str,
    ) -> Result<(String, Vec<String>), BrokerError> {
        let streams = self.streams.lock();
        let prefix = pattern.trim_end_matches('*');
        let matches = streams
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        Ok(("0".to_string(), matches))
    }

    async fn read_group(
        &self,
        group: &str,
        _consumer: &str,
        stream: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<BrokerEntry>, BrokerError> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(block_ms.max(1));
        loop {
            {
                let mut streams = self.streams.lock();
                let state = streams.entry(stream.to_string()).or_default();
                let group_state = state.groups.entry(group.to_string()).or_default();
                if group_state.next_index < state.entries.len() {
                    let end = (group_state.next_index + count).min(state.entries.len());
                    let mut out = Vec::with_capacity(end - group_state.next_index);
                    for idx in group_state.next_index..end {
                        let entry = &state.entries[idx];
                        group_state.pending.insert(entry.id.clone(), idx);
                        out.push(BrokerEntry {
                            id: entry.id.clone(),
                            fields: entry.fields.clone(),
                        });
                    }
                    group_state.next_index = end;
                    return Ok(out);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn read(
        &self,
        stream: &str,
        from_id: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<BrokerEntry>, BrokerError> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(block_ms.max(1));

        // "$" resolves to the current tail once, at call time — only
        // entries appended after this point are visible, matching XREAD's
        // "only new" cursor. "0" reads from the very start.
        let tail_cursor = if from_id == "$" {
            let streams = self.streams.lock();
            streams.get(stream).map(|s| s.entries.len())
        } else {
            None
        };

        loop {
            {
                let streams = self.streams.lock();
                if let Some(state) = streams.get(stream) {
                    let start_idx = if from_id == "0" {
                        0
                    } else if let Some(tail) = tail_cursor {
                        tail
                    } else {
                        state
                            .entries
                            .iter()
                            .position(|e| e.id == from_id)
                            .map(|idx| idx + 1)
                            .unwrap_or(state.entries.len())
                    };
                    if start_idx < state.entries.len() {
                        let end = (start_idx + count).min(state.entries.len());
                        let out = state.entries[start_idx..end]
                            .iter()
                            .map(|e| BrokerEntry {
                                id: e.id.clone(),
                                fields: e.fields.clone(),
                            })
                            .collect();
                        return Ok(out);
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), BrokerError> {
        let mut streams = self.streams.lock();
        if let Some(state) = streams.get_mut(stream)
            && let Some(group_state) = state.groups.get_mut(group)
        {
            group_state.pending.remove(id);
        }
        Ok(())
    }

    async fn range(
        &self,
        stream: &str,
        from: &str,
        to: &str,
        count: usize,
    ) -> Result<Vec<BrokerEntry>, BrokerError> {
        let streams = self.streams.lock();
        let Some(state) = streams.get(stream) else {
            return Ok(Vec::new());
        };
        let lo = parse_id(from, 0, 0);
        let hi = parse_id(to, u64::MAX, u64::MAX);
        let out = state
            .entries
            .iter()
            .filter(|e| {
                let id = parse_id(&e.id, 0, 0);
                id >= lo && id <= hi
            })
            .take(count)
            .map(|e| BrokerEntry {
                id: e.id.clone(),
                fields: e.fields.clone(),
            })
            .collect();
        Ok(out)
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<bool, BrokerError> {
        let mut sets = self.sets.lock();
        Ok(sets
            .members
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_rem(&self, set: &str, member: &str) -> Result<(), BrokerError> {
        let mut sets = self.sets.lock();
        if let Some(s) = sets.members.get_mut(set) {
            s.remove(member);
        }
        Ok(())
    }

    async fn set_has(&self, set: &str, member: &str) -> Result<bool, BrokerError> {
        let sets = self.sets.lock();
        Ok(sets
            .members
            .get(set)
            .map(|s| s.contains(member))
            .unwrap_or(false))
    }

    async fn map_set(&self, key: &str, fields: &[(String, String)]) -> Result<(), BrokerError> {
        let mut maps = self.maps.lock();
        let entry = maps.values.entry(key.to_string()).or_default();
        for (k, v) in fields {
            entry.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    async fn map_del(&self, key: &str) -> Result<(), BrokerError> {
        self.maps.lock().values.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_and_read_group_round_trips() {
        let broker = MemoryBroker::new();
        broker.ensure_group("s1", "g1").await.unwrap();
        broker.append("s1", "data", b"hello", 100).await.unwrap();

        let entries = broker.read_group("g1", "c1", "s1", 10, 50).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload(), Some(b"hello".as_slice()));
    }

    #[tokio::test]
    async fn maxlen_trims_oldest_entries() {
        let broker = MemoryBroker::new();
        for i in 0..5 {
            broker
                .append("s1", "data", format!("{i}").as_bytes(), 3)
                .await
                .unwrap();
        }
        let streams = broker.streams.lock();
        assert_eq!(streams.get("s1").unwrap().entries.len(), 3);
    }

    #[tokio::test]
    async fn ack_removes_from_pending() {
        let broker = MemoryBroker::new();
        broker.ensure_group("s1", "g1").await.unwrap();
        broker.append("s1", "data", b"x", 100).await.unwrap();
        let entries = broker.read_group("g1", "c1", "s1", 10, 50).await.unwrap();
        broker.ack("s1", "g1", &entries[0].id).await.unwrap();

        let streams = broker.streams.lock();
        assert!(
            streams.get("s1").unwrap().groups.get("g1").unwrap().pending.is_empty()
        );
    }

    #[tokio::test]
    async fn range_is_non_destructive() {
        let broker = MemoryBroker::new();
        broker.ensure_group("s1", "g1").await.unwrap();
        for i in 0..3 {
            broker
                .append("s1", "data", format!("{i}").as_bytes(), 100)
                .await
                .unwrap();
        }

        let ranged = broker.range("s1", "-", "+", 10).await.unwrap();
        assert_eq!(ranged.len(), 3);

        // A range read leaves stream length and group pending state alone.
        assert_eq!(broker.streams.lock().get("s1").unwrap().entries.len(), 3);
        let entries = broker.read_group("g1", "c1", "s1", 10, 50).await.unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[tokio::test]
    async fn set_add_is_idempotent() {
        let broker = MemoryBroker::new();
        assert!(broker.set_add("agents", "a1").await.unwrap());
        assert!(!broker.set_add("agents", "a1").await.unwrap());
        assert!(broker.set_has("agents", "a1").await.unwrap());
    }
}
