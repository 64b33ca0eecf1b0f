//! Readiness-checked connection to the simulation service.
//!
//! An [`UpstreamChannel`] owns a background connector that probes the target
//! and publishes its connectivity state. The connector retries on its own with
//! the jittered [`DialPolicy`]; [`wait_for_connection_ready`] sits above it and
//! tears the channel down and redials with its own, unjittered backoff until
//! the channel reports `Ready`.

use crate::error::UpstreamError;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Connectivity of an upstream channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Ready => "READY",
            Self::TransientFailure => "TRANSIENT_FAILURE",
            Self::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

/// Retry parameters of the channel's own connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialPolicy {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    /// Relative spread applied to every delay, `0.4` meaning ±40%
    pub jitter: f64,
    pub max_delay_ms: u64,
    /// Time a single connection attempt is allowed to take
    pub min_connect_timeout_ms: u64,
}

impl Default for DialPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 2000,
            multiplier: 1.2,
            jitter: 0.4,
            max_delay_ms: 5000,
            min_connect_timeout_ms: 10_000,
        }
    }
}

impl DialPolicy {
    /// Delay before retry number `retries` (0 for the first retry).
    pub fn backoff(&self, retries: u32) -> Duration {
        let max = self.max_delay_ms as f64;
        let mut delay = self.base_delay_ms as f64;
        let mut n = retries;
        while n > 0 && delay < max {
            delay *= self.multiplier;
            n -= 1;
        }
        delay = delay.min(max);

        let spread: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
        delay *= 1.0 + self.jitter * spread;
        Duration::from_millis(delay.max(0.0) as u64)
    }

    pub fn min_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.min_connect_timeout_ms)
    }
}

/// Delay sequence of the readiness loop: doubles from `initial`, capped at `max`.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    current: Duration,
    max: Duration,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial.min(max),
            max,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

/// Anything that reports connectivity state transitions.
#[async_trait]
pub trait Connectivity: Send {
    fn state(&self) -> ConnectivityState;

    /// Waits until the state differs from the last observed one and returns
    /// it. Reports `Shutdown` once no further transitions can happen.
    async fn changed(&mut self) -> ConnectivityState;
}

/// A dialed connection to the simulation service.
#[derive(Debug)]
pub struct UpstreamChannel {
    target: String,
    state: watch::Receiver<ConnectivityState>,
    connector: JoinHandle<()>,
}

impl UpstreamChannel {
    /// Validates `target` and starts connecting in the background.
    ///
    /// Must be called from within a tokio runtime. Fails only when the target
    /// is not a `host:port` pair.
    pub fn dial(target: &str, policy: DialPolicy) -> Result<Self, UpstreamError> {
        validate_target(target)?;

        let (state_tx, state) = watch::channel(ConnectivityState::Idle);
        let connector = tokio::spawn(connect(target.to_string(), policy, state_tx));
        Ok(Self {
            target: target.to_string(),
            state,
            connector,
        })
    }

    /// The `host:port` this channel dials.
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for UpstreamChannel {
    fn drop(&mut self) {
        self.connector.abort();
    }
}

#[async_trait]
impl Connectivity for UpstreamChannel {
    fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    async fn changed(&mut self) -> ConnectivityState {
        match self.state.changed().await {
            Ok(()) => *self.state.borrow_and_update(),
            Err(_) => ConnectivityState::Shutdown,
        }
    }
}

/// Checks that `target` is `host:port` without a scheme or path.
pub fn validate_target(target: &str) -> Result<(), UpstreamError> {
    let invalid = || UpstreamError::InvalidTarget(target.to_string());
    if target.contains("://") || target.contains('/') {
        return Err(invalid());
    }
    let (host, port) = target.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid());
    }
    Ok(())
}

async fn connect(target: String, policy: DialPolicy, state: watch::Sender<ConnectivityState>) {
    let mut retries = 0;
    loop {
        state.send_replace(ConnectivityState::Connecting);
        match tokio::time::timeout(policy.min_connect_timeout(), TcpStream::connect(&target)).await {
            Ok(Ok(_probe)) => {
                debug!(upstream = %target, "Upstream reachable");
                state.send_replace(ConnectivityState::Ready);
                // Keep the sender alive so observers keep seeing Ready.
                std::future::pending::<()>().await;
            }
            Ok(Err(e)) => debug!(upstream = %target, "Upstream connect failed: {e}"),
            Err(_) => debug!(upstream = %target, "Upstream connect timed out"),
        }
        state.send_replace(ConnectivityState::TransientFailure);
        tokio::time::sleep(policy.backoff(retries)).await;
        retries = retries.saturating_add(1);
    }
}

/// Dials until a channel reports `Ready`.
///
/// `TransientFailure` and `Shutdown` close the channel and redial after the
/// next backoff delay. Never gives up; the only error is one returned by
/// `dial` itself, such as an invalid target.
pub async fn wait_for_connection_ready<C, F>(
    mut dial: F,
    mut backoff: ReconnectBackoff,
) -> Result<C, UpstreamError>
where
    C: Connectivity,
    F: FnMut() -> Result<C, UpstreamError>,
{
    loop {
        let mut channel = dial()?;
        let mut state = channel.state();
        loop {
            match state {
                ConnectivityState::Ready => return Ok(channel),
                ConnectivityState::TransientFailure | ConnectivityState::Shutdown => break,
                ConnectivityState::Idle | ConnectivityState::Connecting => {
                    state = channel.changed().await;
                }
            }
        }
        drop(channel);

        let delay = backoff.next_delay();
        info!(%state, backoff_ms = delay.as_millis() as u64, "Connection state changed. Backing off");
        tokio::time::sleep(delay).await;
    }
}
