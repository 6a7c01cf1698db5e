//! Connection state machine: DISCONNECTED -> CONNECTING -> CONNECTED.

use super::{BedSession, Inner, Link};
use crate::domain::error::{BedError, TransportError};
use crate::domain::models::{Actuator, ConnectionState, LinkEvent, MessageSeverity};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Reaction to a connectivity change: reconnect only when a caller asked for
/// the link, it is currently down, and we did not drop it ourselves for idling.
pub fn should_reconnect(desired: bool, idle_parked: bool, state: ConnectionState) -> bool {
    desired && !idle_parked && state == ConnectionState::Disconnected
}

impl Inner {
    /// Bring the link up. Caller holds `link` and has cancelled the idle task.
    pub(super) async fn ensure_connected_locked(&self, _link: &mut Link) -> Result<(), BedError> {
        if self.state().connection == ConnectionState::Connected {
            if self.transport.is_connected().await {
                self.touch();
                return Ok(());
            }
            warn!("Bed {} link lost without notification", self.address);
            self.set_connection(ConnectionState::Disconnected);
        }

        self.state().idle_parked = false;
        self.set_connection(ConnectionState::Connecting);

        let policy = &self.policy;
        let attempts = policy.max_connect_attempts;
        let mut failure = BedError::ConnectTimeout {
            attempts: 0,
            timeout: policy.connect_timeout,
        };

        for attempt in 1..=attempts {
            info!(
                "Connecting to bed {} (attempt {}/{})",
                self.address, attempt, attempts
            );
            match timeout(policy.connect_timeout, self.transport.connect()).await {
                Ok(Ok(())) => {
                    self.finish_connect().await;
                    return Ok(());
                }
                Ok(Err(TransportError::Unavailable(reason))) => {
                    warn!("No transport for bed {}: {}", self.address, reason);
                    self.state().available = false;
                    self.set_connection(ConnectionState::Disconnected);
                    self.send_log(
                        format!("Bed {} not found", self.address),
                        MessageSeverity::Error,
                    );
                    return Err(BedError::TransportUnavailable(self.address.clone()));
                }
                Ok(Err(e)) => {
                    warn!("Connect attempt {} failed: {}", attempt, e);
                    failure = BedError::ConnectFailed {
                        attempts: attempt,
                        source: e,
                    };
                }
                Err(_) => {
                    warn!(
                        "Connect attempt {} timed out after {:?}",
                        attempt, policy.connect_timeout
                    );
                    failure = BedError::ConnectTimeout {
                        attempts: attempt,
                        timeout: policy.connect_timeout,
                    };
                }
            }

            if attempt < attempts {
                sleep(policy.connect_retry_delay).await;
            }
        }

        error!("Giving up on bed {}: {}", self.address, failure);
        self.set_connection(ConnectionState::Disconnected);
        self.send_log(format!("Connection failed: {}", failure), MessageSeverity::Error);
        Err(failure)
    }

    async fn finish_connect(&self) {
        // Discovery only confirms the command characteristic; writes are attempted regardless.
        match timeout(
            self.policy.discovery_timeout,
            self.transport.discover_services(),
        )
        .await
        {
            Ok(Ok(())) => debug!("Service discovery complete"),
            Ok(Err(e)) => warn!("Service discovery failed, continuing: {}", e),
            Err(_) => warn!(
                "Service discovery timed out after {:?}, continuing",
                self.policy.discovery_timeout
            ),
        }

        if !self.policy.post_connect_delay.is_zero() {
            sleep(self.policy.post_connect_delay).await;
        }

        self.state().available = true;
        self.touch();
        self.set_connection(ConnectionState::Connected);
        info!("Connected to bed {}", self.address);
        self.send_log("Connected", MessageSeverity::Success);
    }

    /// Caller holds `link` and has cancelled the idle task.
    pub(super) async fn disconnect_locked(&self, _link: &mut Link) {
        if let Err(e) = self.transport.disconnect().await {
            warn!("Disconnect from bed {} failed: {}", self.address, e);
        }
        self.set_connection(ConnectionState::Disconnected);
    }

    /// Connect and arm the idle-disconnect timer.
    pub(super) async fn connect_and_arm(self: &Arc<Self>) -> Result<(), BedError> {
        let mut link = self.link.lock().await;
        self.cancel_idle(&mut link).await;
        self.ensure_connected_locked(&mut link).await?;
        self.arm_idle(&mut link);
        Ok(())
    }
}

impl BedSession {
    /// Explicit connect request. Marks the session as expected to stay connected.
    pub async fn connect(&self) -> Result<(), BedError> {
        self.inner.state().desired_connected = true;
        self.inner.connect_and_arm().await
    }

    /// Explicit disconnect. Link events no longer trigger reconnects afterwards.
    pub async fn disconnect(&self) {
        self.inner.state().desired_connected = false;
        let mut link = self.inner.link.lock().await;
        self.inner.cancel_idle(&mut link).await;
        self.inner.disconnect_locked(&mut link).await;
        info!("Disconnected from bed {}", self.inner.address);
        self.inner.send_log("Disconnected from bed", MessageSeverity::Info);
    }

    /// Teardown: stop running loops, cancel timers, release the link.
    pub async fn shutdown(&self) {
        for actuator in Actuator::ALL {
            self.inner.cancel.flag(actuator).store(true, Ordering::SeqCst);
        }
        self.disconnect().await;
    }

    /// Reconnect when the session is expected to be connected. Returns whether
    /// a reconnect was attempted. Failures are logged, never returned.
    pub async fn reconnect_if_expected(&self) -> bool {
        let reconnect = {
            let state = self.inner.state();
            should_reconnect(state.desired_connected, state.idle_parked, state.connection)
        };
        if !reconnect {
            return false;
        }

        info!("Re-establishing session with bed {}", self.inner.address);
        if let Err(e) = self.inner.connect_and_arm().await {
            warn!("Reconnect to bed {} failed: {}", self.inner.address, e);
        }
        true
    }

    /// Platform notification for this bed's address.
    pub async fn handle_link_event(&self, event: LinkEvent) {
        debug!("Link event {:?} for bed {}", event, self.inner.address);
        if event == LinkEvent::Disconnected {
            let mut link = self.inner.link.lock().await;
            let connected = self.inner.state().connection == ConnectionState::Connected;
            if connected && !self.inner.transport.is_connected().await {
                warn!("Bed {} dropped the link", self.inner.address);
                self.inner.cancel_idle(&mut link).await;
                self.inner.set_connection(ConnectionState::Disconnected);
            }
        }
        self.reconnect_if_expected().await;
    }

    /// Consume link events until the sender side goes away.
    pub fn spawn_link_watcher(
        &self,
        mut events: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                session.handle_link_event(event).await;
            }
            debug!("Link watcher for bed {} finished", session.inner.address);
        })
    }
}
