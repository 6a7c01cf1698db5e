use super::error::PresentationError;
use crate::domain::models::{Actuator, MoveOutcome};
use crate::domain::position::{MAX_POSITION, MIN_POSITION};
use crate::session::BedSession;

/// One adjustable section of the bed exposed as a cover: 0 is flat (closed),
/// 100 fully raised (open).
#[derive(Clone)]
pub struct BedCover {
    session: BedSession,
    actuator: Actuator,
    unique_id: String,
}

impl BedCover {
    pub fn new(session: BedSession, actuator: Actuator) -> Self {
        let unique_id = format!("{}_{}", session.address(), actuator.name());
        Self {
            session,
            actuator,
            unique_id,
        }
    }

    /// Covers for both sections of the bed, head first.
    pub fn pair(session: &BedSession) -> [BedCover; 2] {
        Actuator::ALL.map(|actuator| BedCover::new(session.clone(), actuator))
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn actuator(&self) -> Actuator {
        self.actuator
    }

    pub async fn open(&self) -> Result<MoveOutcome, PresentationError> {
        self.session
            .move_to(self.actuator, MAX_POSITION)
            .await
            .map_err(PresentationError::failed(format!("raise {}", self.actuator)))
    }

    pub async fn close(&self) -> Result<MoveOutcome, PresentationError> {
        self.session
            .move_to(self.actuator, MIN_POSITION)
            .await
            .map_err(PresentationError::failed(format!("lower {}", self.actuator)))
    }

    pub fn stop(&self) {
        self.session.stop(self.actuator);
    }

    /// Values above 100 are treated as 100.
    pub async fn set_position(&self, position: u8) -> Result<MoveOutcome, PresentationError> {
        self.session
            .move_to(self.actuator, f64::from(position))
            .await
            .map_err(PresentationError::failed(format!(
                "move {} to {}%",
                self.actuator, position
            )))
    }

    pub fn current_position(&self) -> u8 {
        self.session.position(self.actuator).round().clamp(0.0, 100.0) as u8
    }

    pub fn is_closed(&self) -> bool {
        self.current_position() == 0
    }

    pub fn is_moving(&self) -> bool {
        self.session.snapshot().is_moving(self.actuator)
    }

    pub fn available(&self) -> bool {
        self.session.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::session;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_cover_ids_and_initial_state() {
        let (session, _sim, _rx) = session();
        let [head, foot] = BedCover::pair(&session);
        assert_eq!(head.unique_id(), "C4:2B:11:09:8E:AA_head");
        assert_eq!(foot.unique_id(), "C4:2B:11:09:8E:AA_foot");
        assert!(head.is_closed());
        assert!(foot.available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_position_reports_rounded_percent() {
        let (session, _sim, _rx) = session();
        let foot = BedCover::new(session, Actuator::Foot);
        let outcome = foot.set_position(40).await.unwrap();
        assert_eq!(outcome, MoveOutcome::Reached);
        let position = foot.current_position();
        assert!((39..=41).contains(&position), "position {}", position);
        assert!(!foot.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_then_close() {
        let (session, _sim, _rx) = session();
        let head = BedCover::new(session, Actuator::Head);
        head.open().await.unwrap();
        assert!(head.current_position() >= 99);
        head.close().await.unwrap();
        assert!(head.current_position() <= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_cover() {
        let (session, _sim, _rx) = session();
        let head = BedCover::new(session, Actuator::Head);
        let mover = head.clone();
        let task = tokio::spawn(async move { mover.open().await });

        sleep(Duration::from_secs(1)).await;
        assert!(head.is_moving());
        head.stop();
        assert_eq!(task.await.unwrap().unwrap(), MoveOutcome::Cancelled);
        assert!(head.current_position() < 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_surfaces_as_operation_failed() {
        let (session, sim, _rx) = session();
        sim.set_unavailable(true);
        let head = BedCover::new(session, Actuator::Head);

        let err = head.set_position(30).await.unwrap_err();
        assert_eq!(err.action(), "move head to 30%");
        assert_eq!(err.to_string(), "Failed to move head to 30%");
        assert!(!head.available());
    }
}
