//! Reconnect supervision
//!
//! A `Connection` never reconnects on its own. Callers that want a new
//! connection after a failure go through this module, which repeats the
//! connect step with a doubling, capped wait between attempts.
//!
//! ```text
//!   attempt 1 ──fail──► wait backoff ──► attempt 2 ──fail──► wait 2x ──► ...
//!       │                                    │
//!       └─ ok / permanent error: stop        └─ ok / permanent error: stop
//! ```

use std::sync::Arc;
use std::thread;

use crate::config::Config;
use crate::error::Result;
use crate::network::Connection;
use crate::protocol::{BincodeCodec, MessageCodec};

pub use crate::config::RetryPolicy;

/// Repeat `op` per `policy` while `should_retry` accepts its error
///
/// `op` is given the attempt number, starting at 1. The last error is
/// returned once attempts run out.
pub fn retry_blocking<T, E, Op, ShouldRetry>(
    policy: &RetryPolicy,
    mut op: Op,
    mut should_retry: ShouldRetry,
) -> std::result::Result<T, E>
where
    Op: FnMut(usize) -> std::result::Result<T, E>,
    ShouldRetry: FnMut(&E) -> bool,
{
    let attempts = policy.connect_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match op(attempt) {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if attempt == attempts || !should_retry(&error) {
            return Err(error);
        }

        let wait = policy.backoff(attempt);
        tracing::debug!("Attempt {}/{} failed, retrying in {:?}", attempt, attempts, wait);
        thread::sleep(wait);
        attempt += 1;
    }
}

/// Connect with the default codec, retrying transient failures per
/// `config.retry`
pub fn connect_with_retry(config: &Config) -> Result<Connection> {
    connect_with_retry_and_codec(config, Arc::new(BincodeCodec::new()))
}

pub fn connect_with_retry_and_codec(
    config: &Config,
    codec: Arc<dyn MessageCodec>,
) -> Result<Connection> {
    retry_blocking(
        &config.retry,
        |attempt| {
            Connection::connect_with_codec(config.clone(), Arc::clone(&codec)).map_err(|e| {
                tracing::warn!("Connection attempt {} to {} failed: {}", attempt, config.addr(), e);
                e
            })
        },
        |e| e.is_transient(),
    )
}
