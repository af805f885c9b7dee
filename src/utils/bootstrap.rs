//! Bootstrap utilities.
//!
//! Shared initialization for applications and test harnesses.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the WARREN_LOG environment variable.
///
/// Defaults to "info" level if WARREN_LOG is not set. Safe to call more than
/// once; only the first call installs a subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Backoff for broker connection retries at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Total attempts: `max_attempts` (at least one)
/// - Jitter enabled
pub fn connection_backoff(max_attempts: u32) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(max_attempts.saturating_sub(1) as usize)
        .with_jitter()
}

/// Connect with exponential backoff retry.
///
/// # Arguments
/// * `service_name` - Human-readable name for logging (e.g., "amqp broker")
/// * `address` - The address being connected to
/// * `max_attempts` - Attempts before giving up (at least one is made)
/// * `connect` - Async function that attempts to establish a connection
///
/// # Returns
/// The connection on success, or the last error after `max_attempts`.
pub async fn connect_with_retry<T, E, F, Fut>(
    service_name: &str,
    address: &str,
    max_attempts: u32,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let result = connect
        .retry(connection_backoff(max_attempts))
        .notify(|err: &E, dur: Duration| {
            warn!(
                service = %service_name,
                address = %address,
                error = %err,
                delay = ?dur,
                "Connection failed, retrying"
            );
        })
        .await;

    match &result {
        Ok(_) => info!(service = %service_name, address = %address, "Connected"),
        Err(e) => error!(
            service = %service_name,
            address = %address,
            error = %e,
            "Giving up after {} attempts",
            max_attempts.max(1)
        ),
    }
    result
}
