//! Named env vars and defaults for bus configuration.
//!
//! Names are fixed by the external wire contract — unlike an app's own
//! internal tuning knobs, these are consumed by every process on the bus and
//! must not be renamed or namespaced.

pub const ENV_BROKER_HOST: &str = "BROKER_HOST";
pub const DEFAULT_BROKER_HOST: &str = "127.0.0.1";

pub const ENV_BROKER_PORT: &str = "BROKER_PORT";
pub const DEFAULT_BROKER_PORT: u16 = 6379;

pub const ENV_BROKER_USERNAME: &str = "BROKER_USERNAME";
pub const ENV_BROKER_PASSWORD: &str = "BROKER_PASSWORD";

pub const ENV_BUS_STREAM_MAXLEN: &str = "BUS_STREAM_MAXLEN";
pub const DEFAULT_BUS_STREAM_MAXLEN: u64 = 10_000;

pub const ENV_ENVELOPE_SIZE_LIMIT: &str = "ENVELOPE_SIZE_LIMIT";
pub const DEFAULT_ENVELOPE_SIZE_LIMIT: usize = 131_072;

pub const ENV_NAMESPACE: &str = "NAMESPACE";
pub const DEFAULT_NAMESPACE: &str = "AG1";

pub const DEFAULT_READ_BLOCK_MS: u64 = 1_000;
pub const DEFAULT_DEAD_LETTER_MAX_RETRIES: u32 = 3;
pub const DEFAULT_DISCOVERY_POLL_DELAY_SECS: u64 = 5;
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;
