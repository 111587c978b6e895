use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope serialization failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("envelope bytes are not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
    #[error("redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),
    #[error("unexpected reply shape from broker: {0}")]
    Protocol(String),
    #[error("stream {stream} not found")]
    NoSuchStream { stream: String },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("envelope size {size} exceeds limit {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("handler failed: {0}")]
    Handler(#[source] anyhow::Error),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("no reply received within the deadline")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}
