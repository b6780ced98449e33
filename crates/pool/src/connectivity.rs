//! Bounded TCP reachability probe for freshly created workers.
//!
//! A container reported as started by its backend is not necessarily
//! accepting connections yet. [`wait_until_reachable`] keeps dialing the
//! worker endpoint with a fixed delay between attempts until it answers
//! or the attempt budget is spent.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::WorkerPoolError;

/// Tunable parameters for the reachability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityPolicy {
    /// Maximum number of connect attempts.
    pub attempts: u32,
    /// Pause between two consecutive attempts.
    pub delay: Duration,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
}

impl Default for ConnectivityPolicy {
    fn default() -> Self {
        Self {
            attempts: 20,
            delay: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(1),
        }
    }
}

impl ConnectivityPolicy {
    /// Zero values fall back to the defaults.
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        Self {
            attempts: if self.attempts == 0 { defaults.attempts } else { self.attempts },
            delay: if self.delay.is_zero() { defaults.delay } else { self.delay },
            connect_timeout: if self.connect_timeout.is_zero() {
                defaults.connect_timeout
            } else {
                self.connect_timeout
            },
        }
    }

    /// Worst-case time spent waiting between attempts.
    pub fn worst_case_delay(&self) -> Duration {
        self.delay * self.attempts.saturating_sub(1)
    }
}

/// Dial `endpoint` until it accepts a TCP connection.
///
/// Returns [`WorkerPoolError::Unreachable`] carrying the last connect
/// error once `policy.attempts` dials have failed.
pub async fn wait_until_reachable(
    worker_id: &str,
    endpoint: SocketAddr,
    policy: &ConnectivityPolicy,
) -> Result<(), WorkerPoolError> {
    let mut last_error = String::new();

    for attempt in 1..=policy.attempts {
        match tokio::time::timeout(policy.connect_timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(_stream)) => {
                tracing::debug!(worker_id, %endpoint, attempt, "Worker endpoint reachable");
                return Ok(());
            }
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = format!("connect timed out after {:?}", policy.connect_timeout),
        }

        tracing::debug!(
            worker_id,
            %endpoint,
            attempt,
            error = %last_error,
            "Worker endpoint not reachable yet",
        );

        if attempt < policy.attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    Err(WorkerPoolError::Unreachable {
        worker_id: worker_id.to_string(),
        endpoint,
        attempts: policy.attempts,
        reason: last_error,
    })
}
