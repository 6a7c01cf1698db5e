//! Bed Session Controller
//!
//! Owns everything about one physical bed: the connection state machine, the
//! pulse-integrated position estimate, the movement loops and the
//! idle-disconnect scheduler.
//!
//! ## Locking
//!
//! - `link` (async mutex) serializes connect/disconnect transitions and the
//!   idle-disconnect slot. `SessionState::connection` is only written while it
//!   is held.
//! - `state` (sync mutex) holds the position model and flags. It is never held
//!   across an `.await`.
//!
//! Head and foot loops run independently; each is exclusive with itself through
//! its `moving` flag.

mod connection;
mod idle;
mod movement;

pub use connection::should_reconnect;

use crate::domain::models::{
    Actuator, BedEvent, ConnectionState, MessageSeverity, PositionSnapshot, StatusMessage,
};
use crate::domain::position::ActuatorEstimate;
use crate::domain::settings::SessionPolicy;
use crate::infrastructure::bluetooth::transport::BedTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct ActuatorState {
    estimate: ActuatorEstimate,
    target: Option<f64>,
    moving: bool,
}

impl ActuatorState {
    fn new(step: f64) -> Self {
        Self {
            estimate: ActuatorEstimate::new(step),
            target: None,
            moving: false,
        }
    }
}

#[derive(Debug)]
struct SessionState {
    connection: ConnectionState,
    /// Set by explicit connect, cleared by explicit disconnect. Drives reconnects.
    desired_connected: bool,
    /// Last disconnect was our own idle disconnect; reconnect on demand only.
    idle_parked: bool,
    available: bool,
    head: ActuatorState,
    feet: ActuatorState,
    last_activity: Instant,
}

impl SessionState {
    fn actuator(&self, actuator: Actuator) -> &ActuatorState {
        match actuator {
            Actuator::Head => &self.head,
            Actuator::Foot => &self.feet,
        }
    }

    fn actuator_mut(&mut self, actuator: Actuator) -> &mut ActuatorState {
        match actuator {
            Actuator::Head => &mut self.head,
            Actuator::Foot => &mut self.feet,
        }
    }
}

#[derive(Debug, Default)]
struct Link {
    idle: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct CancelFlags {
    head: AtomicBool,
    foot: AtomicBool,
}

impl CancelFlags {
    fn flag(&self, actuator: Actuator) -> &AtomicBool {
        match actuator {
            Actuator::Head => &self.head,
            Actuator::Foot => &self.foot,
        }
    }
}

struct Inner {
    address: String,
    transport: Arc<dyn BedTransport>,
    policy: SessionPolicy,
    link: tokio::sync::Mutex<Link>,
    state: Mutex<SessionState>,
    cancel: CancelFlags,
    event_sender: mpsc::UnboundedSender<BedEvent>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        // Every mutation leaves the state consistent, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: BedEvent) {
        let _ = self.event_sender.send(event);
    }

    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        self.emit(BedEvent::LogMessage(StatusMessage {
            message: message.into(),
            severity,
        }));
    }

    /// Only called with `link` held.
    fn set_connection(&self, next: ConnectionState) {
        let previous = std::mem::replace(&mut self.state().connection, next);
        if previous != next {
            debug!("Bed {} connection: {} -> {}", self.address, previous, next);
            self.emit(BedEvent::ConnectionStatus(next));
        }
    }

    fn touch(&self) {
        self.state().last_activity = Instant::now();
    }

    fn is_cancelled(&self, actuator: Actuator) -> bool {
        self.cancel.flag(actuator).load(Ordering::SeqCst)
    }

    fn position(&self, actuator: Actuator) -> f64 {
        self.state().actuator(actuator).estimate.position()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.link.get_mut().idle.take() {
            handle.abort();
        }
    }
}

/// Marks actuators as moving for the lifetime of one movement request.
struct MoveGuard {
    inner: Arc<Inner>,
    actuators: Vec<Actuator>,
}

impl MoveGuard {
    /// `None` when any of `actuators` already has a loop running.
    fn acquire(inner: &Arc<Inner>, actuators: &[Actuator], target: f64) -> Option<Self> {
        let mut state = inner.state();
        if actuators.iter().any(|a| state.actuator(*a).moving) {
            return None;
        }
        for actuator in actuators {
            let slot = state.actuator_mut(*actuator);
            slot.moving = true;
            slot.target = Some(target);
        }
        Some(Self {
            inner: Arc::clone(inner),
            actuators: actuators.to_vec(),
        })
    }
}

impl Drop for MoveGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state();
        for actuator in &self.actuators {
            let slot = state.actuator_mut(*actuator);
            slot.moving = false;
            slot.target = None;
        }
    }
}

/// Handle to the session for one bed. Clones share the session.
#[derive(Clone)]
pub struct BedSession {
    inner: Arc<Inner>,
}

impl BedSession {
    pub fn new(
        address: impl Into<String>,
        transport: Arc<dyn BedTransport>,
        policy: SessionPolicy,
        event_sender: mpsc::UnboundedSender<BedEvent>,
    ) -> Self {
        let state = SessionState {
            connection: ConnectionState::Disconnected,
            desired_connected: false,
            idle_parked: false,
            available: true,
            // Assume flat on creation; the bed cannot tell us otherwise.
            head: ActuatorState::new(policy.head_step),
            feet: ActuatorState::new(policy.feet_step),
            last_activity: Instant::now(),
        };

        Self {
            inner: Arc::new(Inner {
                address: address.into(),
                transport,
                policy,
                link: tokio::sync::Mutex::new(Link::default()),
                state: Mutex::new(state),
                cancel: CancelFlags::default(),
                event_sender,
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state().connection
    }

    pub fn is_available(&self) -> bool {
        self.inner.state().available
    }

    pub fn desired_connected(&self) -> bool {
        self.inner.state().desired_connected
    }

    pub fn position(&self, actuator: Actuator) -> f64 {
        self.inner.position(actuator)
    }

    /// Target of the running loop for `actuator`, if any.
    pub fn target(&self, actuator: Actuator) -> Option<f64> {
        self.inner.state().actuator(actuator).target
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        let state = self.inner.state();
        PositionSnapshot {
            head: state.head.estimate.position(),
            feet: state.feet.estimate.position(),
            connection: state.connection,
            available: state.available,
            head_moving: state.head.moving,
            feet_moving: state.feet.moving,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::infrastructure::bluetooth::SimulatedTransport;

    pub(crate) fn session_with(
        policy: SessionPolicy,
    ) -> (
        BedSession,
        SimulatedTransport,
        mpsc::UnboundedReceiver<BedEvent>,
    ) {
        let sim = SimulatedTransport::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let session = BedSession::new("C4:2B:11:09:8E:AA", Arc::new(sim.clone()), policy, tx);
        (session, sim, rx)
    }

    pub(crate) fn session() -> (
        BedSession,
        SimulatedTransport,
        mpsc::UnboundedReceiver<BedEvent>,
    ) {
        session_with(SessionPolicy::default())
    }

    /// Connection states published so far, in order.
    pub(crate) fn drain_states(rx: &mut mpsc::UnboundedReceiver<BedEvent>) -> Vec<ConnectionState> {
        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let BedEvent::ConnectionStatus(state) = event {
                states.push(state);
            }
        }
        states
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_new_session_starts_flat_and_disconnected() {
        let (session, _sim, _rx) = session();
        let snap = session.snapshot();
        assert_eq!(snap.head, 0.0);
        assert_eq!(snap.feet, 0.0);
        assert_eq!(snap.connection, ConnectionState::Disconnected);
        assert!(snap.available);
        assert!(!session.desired_connected());
    }

    #[test]
    fn test_move_guard_is_exclusive_per_actuator() {
        let (session, _sim, _rx) = session();
        let guard = MoveGuard::acquire(&session.inner, &[Actuator::Head], 80.0).unwrap();
        assert!(MoveGuard::acquire(&session.inner, &[Actuator::Head], 20.0).is_none());
        assert!(MoveGuard::acquire(&session.inner, &Actuator::ALL, 0.0).is_none());
        assert_eq!(session.target(Actuator::Head), Some(80.0));

        let foot = MoveGuard::acquire(&session.inner, &[Actuator::Foot], 10.0);
        assert!(foot.is_some());

        drop(guard);
        assert_eq!(session.target(Actuator::Head), None);
        assert!(!session.snapshot().head_moving);
        assert!(session.snapshot().feet_moving);
    }
}
