//! Envelope protocol, Redis-Streams broker, and consumer-group subscription
//! substrate for agent message buses.
//!
//! A minimal wiring looks like:
//!
//! ```no_run
//! use std::sync::Arc;
//! use aetherbus::{BusConfig, StreamKeyBuilder};
//! use aetherbus::broker::redis::RedisBroker;
//! use aetherbus::publisher::Publisher;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = BusConfig::from_env()?;
//! let broker: Arc<dyn aetherbus::broker::BrokerClient> =
//!     Arc::new(RedisBroker::new(&config.redis_url()).await?);
//! let keys = StreamKeyBuilder::new(config.namespace.clone());
//! let publisher = Publisher::new(broker.clone(), config.stream_maxlen, config.envelope_size_limit);
//! let mut env = aetherbus::Envelope::new("user");
//! env.content.insert("text".into(), serde_json::json!("hello"));
//! publisher.publish(&keys.agent_inbox("echo"), &env).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod broker;
pub mod config;
pub mod constants;
pub mod discovery;
pub mod edge;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod publisher;
pub mod registry;
pub mod rpc;
pub mod subscriber;

pub use adapter::BusAdapter;
pub use config::BusConfig;
pub use envelope::Envelope;
pub use keys::StreamKeyBuilder;
pub use publisher::Publisher;
pub use registry::AgentRegistry;
