//! Idle-disconnect scheduler
//!
//! At most one deferred disconnect exists per session. It lives in `Link::idle`
//! and is only replaced while `link` is held, after the previous task has been
//! aborted and awaited.

use super::{Inner, Link};
use crate::domain::models::{ConnectionState, MessageSeverity};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

impl Inner {
    pub(super) async fn cancel_idle(&self, link: &mut Link) {
        if let Some(handle) = link.idle.take() {
            handle.abort();
            let _ = handle.await;
            debug!("Cancelled pending idle disconnect");
        }
    }

    /// Caller holds `link` and has cancelled any previous task.
    pub(super) fn arm_idle(self: &Arc<Self>, link: &mut Link) {
        debug_assert!(link.idle.is_none(), "previous idle task must be cancelled first");
        link.idle = Some(self.spawn_idle(self.policy.idle_window));
    }

    /// Cancel the pending idle task and arm a fresh one if still connected.
    pub(super) async fn rearm_idle(self: &Arc<Self>) {
        let mut link = self.link.lock().await;
        self.cancel_idle(&mut link).await;
        if self.state().connection == ConnectionState::Connected {
            self.arm_idle(&mut link);
        }
    }

    fn spawn_idle(self: &Arc<Self>, delay: Duration) -> JoinHandle<()> {
        debug!("Scheduling idle disconnect in {:?}", delay);
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.idle_fired().await;
            }
        })
    }

    async fn idle_fired(self: &Arc<Self>) {
        let mut link = self.link.lock().await;
        // Holding the lock means nobody replaced us; drop our own handle without aborting.
        drop(link.idle.take());

        let (connection, idle_for) = {
            let state = self.state();
            (state.connection, state.last_activity.elapsed())
        };
        if connection != ConnectionState::Connected {
            debug!("Idle timer fired while {}, nothing to do", connection);
            return;
        }

        if idle_for > self.policy.recent_activity {
            info!(
                "Bed {} idle for {:?}, disconnecting",
                self.address, idle_for
            );
            if let Err(e) = self.transport.disconnect().await {
                warn!("Idle disconnect from bed {} failed: {}", self.address, e);
            }
            self.state().idle_parked = true;
            self.set_connection(ConnectionState::Disconnected);
            self.send_log("Disconnected after inactivity", MessageSeverity::Info);
        } else {
            debug!(
                "Bed used {:?} ago, rescheduling idle disconnect",
                idle_for
            );
            link.idle = Some(self.spawn_idle(self.policy.idle_window));
        }
    }
}
