//! Broker connection manager.
//!
//! One `BrokerManager` per process owns the single NATS connection and
//! JetStream context. Every producer and worker goes through it, so a
//! broker outage is handled in one place.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use async_nats::jetstream::{self, Context};
use async_nats::{Client, ConnectOptions, Event};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::ConnectConfig;
use crate::error::BrokerError;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
}

struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: ConnState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn get(&self) -> ConnState {
        match self.0.load(Ordering::Acquire) {
            0 => ConnState::Disconnected,
            1 => ConnState::Connecting,
            2 => ConnState::Connected,
            _ => ConnState::ShuttingDown,
        }
    }

    fn set(&self, state: ConnState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Set unless already shutting down. Shutdown is terminal; a late
    /// reconnect event from the client must not resurrect the manager.
    fn set_unless_terminal(&self, state: ConnState) {
        if self.get() != ConnState::ShuttingDown {
            self.set(state);
        }
    }
}

#[derive(Clone)]
struct Handle {
    client: Client,
    jetstream: Context,
}

/// Owns the process-wide broker connection.
///
/// `jetstream()` hands out the shared context, connecting on first use.
/// Concurrent callers during a (re)connect wait on one in-flight attempt
/// rather than racing to open duplicate connections.
pub struct BrokerManager {
    config: ConnectConfig,
    state: Arc<StateCell>,
    attempts: AtomicU32,
    inner: Arc<Mutex<Option<Handle>>>,
}

/// Point-in-time connection snapshot for health probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerHealth {
    pub state: ConnState,
    /// Consecutive failed connect attempts; 0 once connected.
    pub attempts: u32,
}

impl BrokerManager {
    pub fn new(config: ConnectConfig) -> Self {
        Self {
            config,
            state: Arc::new(StateCell::new(ConnState::Disconnected)),
            attempts: AtomicU32::new(0),
            inner: Arc::new(Mutex::new(None)),
        }
    }

    /// Current connection state. Pure read, safe from health probes.
    pub fn state(&self) -> ConnState {
        self.state.get()
    }

    /// Snapshot for probes; never consulted by pipeline logic.
    pub fn health(&self) -> BrokerHealth {
        BrokerHealth {
            state: self.state.get(),
            attempts: self.attempts.load(Ordering::Relaxed),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.get() == ConnState::Connected
    }

    /// The shared JetStream context, connecting if necessary.
    pub async fn jetstream(&self) -> Result<Context, BrokerError> {
        Ok(self.handle().await?.jetstream)
    }

    /// The raw client, for core (non-durable) publishes.
    pub async fn client(&self) -> Result<Client, BrokerError> {
        Ok(self.handle().await?.client)
    }

    async fn handle(&self) -> Result<Handle, BrokerError> {
        if self.state.get() == ConnState::ShuttingDown {
            return Err(BrokerError::ShuttingDown);
        }

        let mut inner = self.inner.lock().await;

        // Re-check under the lock: a shutdown may have raced us here.
        if self.state.get() == ConnState::ShuttingDown {
            return Err(BrokerError::ShuttingDown);
        }
        if let Some(handle) = inner.as_ref() {
            return Ok(handle.clone());
        }

        let handle = self.connect_with_retry().await?;
        *inner = Some(handle.clone());
        Ok(handle)
    }

    /// Connect with exponential backoff and jitter between attempts.
    ///
    /// Exhausting the budget is fatal: the caller is expected to let the
    /// process die so the orchestrator restarts it with a clean slate.
    async fn connect_with_retry(&self) -> Result<Handle, BrokerError> {
        self.state.set_unless_terminal(ConnState::Connecting);

        let mut attempt = 0;
        loop {
            match self.connect_once().await {
                Ok(handle) => {
                    self.attempts.store(0, Ordering::Relaxed);
                    self.state.set_unless_terminal(ConnState::Connected);
                    info!(
                        url = %self.config.url,
                        attempts = attempt + 1,
                        "Connected to broker"
                    );
                    return Ok(handle);
                }
                Err(e) => {
                    attempt += 1;
                    self.attempts.store(attempt, Ordering::Relaxed);
                    if attempt >= self.config.max_attempts {
                        self.state.set_unless_terminal(ConnState::Disconnected);
                        warn!(
                            url = %self.config.url,
                            attempts = attempt,
                            error = %e,
                            "Reconnect budget exhausted"
                        );
                        return Err(BrokerError::ReconnectsExhausted { attempts: attempt });
                    }

                    let delay = self.config.backoff.delay_with_jitter(attempt - 1);
                    warn!(
                        url = %self.config.url,
                        attempt = attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Broker connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn connect_once(&self) -> Result<Handle, BrokerError> {
        let state = self.state.clone();
        let inner = Arc::clone(&self.inner);
        let options = ConnectOptions::new()
            .name(&self.config.client_name)
            // The client's internal reconnect loop gets the same budget;
            // once it is spent the client emits `Closed` instead of
            // retrying forever behind a live-looking handle.
            .max_reconnects(self.config.max_attempts as usize)
            .event_callback(move |event| {
                let state = state.clone();
                let inner = Arc::clone(&inner);
                async move {
                    match event {
                        Event::Connected => {
                            info!("Broker connection restored");
                            state.set_unless_terminal(ConnState::Connected);
                        }
                        Event::Disconnected => {
                            warn!("Broker connection lost");
                            state.set_unless_terminal(ConnState::Disconnected);
                        }
                        Event::Closed => {
                            warn!("Broker connection closed");
                            state.set_unless_terminal(ConnState::Disconnected);
                            // The handle is dead for good; drop it so the
                            // next caller redials through
                            // `connect_with_retry` and can surface
                            // `ReconnectsExhausted`.
                            inner.lock().await.take();
                        }
                        other => {
                            warn!(event = %other, "Broker event");
                        }
                    }
                }
            });

        let client = tokio::time::timeout(
            self.config.connect_timeout,
            options.connect(&self.config.url),
        )
        .await
        .map_err(|_| BrokerError::Timeout(self.config.connect_timeout))??;

        let jetstream = jetstream::new(client.clone());
        Ok(Handle { client, jetstream })
    }

    /// Drain the connection and refuse all further work.
    pub async fn shutdown(&self) -> Result<(), BrokerError> {
        self.state.set(ConnState::ShuttingDown);

        let handle = self.inner.lock().await.take();
        if let Some(handle) = handle {
            info!("Draining broker connection");
            handle
                .client
                .drain()
                .await
                .map_err(BrokerError::from_jetstream_error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobs::Backoff;
    use std::time::Duration;

    fn unreachable_config() -> ConnectConfig {
        ConnectConfig::new("nats://127.0.0.1:1")
            .with_max_attempts(2)
            .with_connect_timeout(Duration::from_millis(200))
    }

    #[test]
    fn state_cell_shutdown_is_terminal() {
        let cell = StateCell::new(ConnState::Connected);
        cell.set(ConnState::ShuttingDown);
        cell.set_unless_terminal(ConnState::Connected);
        assert_eq!(cell.get(), ConnState::ShuttingDown);
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let manager = BrokerManager::new(unreachable_config());
        assert_eq!(manager.state(), ConnState::Disconnected);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn exhausted_reconnects_are_fatal() {
        let mut config = unreachable_config();
        config.backoff = Backoff::Fixed(Duration::from_millis(10));
        let manager = BrokerManager::new(config);

        match manager.jetstream().await {
            Err(BrokerError::ReconnectsExhausted { attempts }) => assert_eq!(attempts, 2),
            other => panic!("expected ReconnectsExhausted, got {other:?}"),
        }
        assert_eq!(manager.state(), ConnState::Disconnected);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_work() {
        let manager = BrokerManager::new(unreachable_config());
        manager.shutdown().await.unwrap();

        assert_eq!(manager.state(), ConnState::ShuttingDown);
        assert!(matches!(
            manager.jetstream().await,
            Err(BrokerError::ShuttingDown)
        ));
    }
}
