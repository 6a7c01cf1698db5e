use super::error::PresentationError;
use crate::domain::models::MoveOutcome;
use crate::session::BedSession;

/// Single-press action that lays the whole bed flat.
#[derive(Clone)]
pub struct FlatButton {
    session: BedSession,
    unique_id: String,
}

impl FlatButton {
    pub fn new(session: BedSession) -> Self {
        let unique_id = format!("set_flat-{}", session.address());
        Self { session, unique_id }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub async fn press(&self) -> Result<MoveOutcome, PresentationError> {
        self.session
            .set_flat()
            .await
            .map_err(PresentationError::failed("flatten bed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Actuator;
    use crate::infrastructure::bluetooth::BedCommand;
    use crate::session::test_support::session;

    #[tokio::test(start_paused = true)]
    async fn test_press_flattens_bed() {
        let (session, sim, _rx) = session();
        session.move_to(Actuator::Foot, 30.0).await.unwrap();

        let button = FlatButton::new(session.clone());
        assert_eq!(button.unique_id(), "set_flat-C4:2B:11:09:8E:AA");
        assert_eq!(button.press().await.unwrap(), MoveOutcome::Reached);

        let snap = session.snapshot();
        assert!(snap.head <= 1.5);
        assert!(snap.feet <= 1.5);
        assert_eq!(sim.writes().last(), Some(&BedCommand::AllDown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_without_bed_fails() {
        let (session, sim, _rx) = session();
        sim.fail_next_connects(10);
        let err = FlatButton::new(session).press().await.unwrap_err();
        assert_eq!(err.action(), "flatten bed");
    }
}
