//! Request/reply on top of plain publish + a groupless tail read, matched by
//! correlation id.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use futures::Stream;
use uuid::Uuid;

use crate::broker::BrokerClient;
use crate::envelope::Envelope;
use crate::error::RpcError;
use crate::publisher::Publisher;

fn prepare_request(mut req: Envelope, reply_to: &str) -> Envelope {
    if req.reply_to.is_none() {
        req.reply_to = Some(reply_to.to_string());
    }
    if req.correlation_id.is_none() {
        req.correlation_id = Some(Uuid::new_v4().to_string());
    }
    req
}

/// Sends `req` to `stream` and waits for the first reply on `req.reply_to`
/// (assigned if unset) whose `correlation_id` matches. Malformed replies are
/// logged and skipped rather than failing the call.
pub async fn call(
    publisher: &Publisher,
    broker: &dyn BrokerClient,
    stream: &str,
    req: Envelope,
    reply_to: &str,
    timeout: Duration,
) -> Result<Envelope, RpcError> {
    let req = prepare_request(req, reply_to);
    let correlation_id = req.correlation_id.clone();
    let reply_stream = req.reply_to.clone().expect("reply_to set above");

    publisher.publish(stream, &req).await?;

    let deadline = Instant::now() + timeout;
    let mut from_id = "$".to_string();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(RpcError::Timeout);
        }

        let entries = broker
            .read(&reply_stream, &from_id, 10, remaining.as_millis() as u64)
            .await?;

        for entry in entries {
            from_id = entry.id.clone();
            let Some(payload) = entry.payload() else {
                continue;
            };
            let reply = match Envelope::from_bytes(payload) {
                Ok(env) => env,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed RPC reply");
                    continue;
                }
            };
            if reply.correlation_id == correlation_id {
                return Ok(reply);
            }
        }

        if Instant::now() >= deadline {
            return Err(RpcError::Timeout);
        }
    }
}

/// Streaming variant of [`call`]: yields every matching reply until the
/// deadline, with no dedup and no early return on the first match.
pub fn stream_call(
    publisher: Publisher,
    broker: Arc<dyn BrokerClient>,
    stream: String,
    req: Envelope,
    reply_to: String,
    timeout: Duration,
) -> Pin<Box<dyn Stream<Item = Result<Envelope, RpcError>> + Send>> {
    let req = prepare_request(req, &reply_to);
    let correlation_id = req.correlation_id.clone();
    let reply_stream = req.reply_to.clone().expect("reply_to set above");

    Box::pin(stream! {
        if let Err(e) = publisher.publish(&stream, &req).await {
            yield Err(RpcError::from(e));
            return;
        }

        let deadline = Instant::now() + timeout;
        let mut from_id = "$".to_string();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                yield Err(RpcError::Timeout);
                return;
            }

            let entries = match broker
                .read(&reply_stream, &from_id, 10, remaining.as_millis() as u64)
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    yield Err(RpcError::from(e));
                    return;
                }
            };

            for entry in entries {
                from_id = entry.id.clone();
                let Some(payload) = entry.payload() else { continue };
                match Envelope::from_bytes(payload) {
                    Ok(reply) if reply.correlation_id == correlation_id => {
                        yield Ok(reply);
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping malformed RPC reply");
                    }
                }
            }

            if Instant::now() >= deadline {
                yield Err(RpcError::Timeout);
                return;
            }
        }
    })
}
