//! Movement execution
//!
//! The bed only understands fixed-direction pulses, so a target percentage is
//! reached by writing one pulse at a time and integrating the estimate after
//! each acknowledged write. Loops end on reaching the target, on `stop`, on
//! exhausting the pulse budget, or on the first failed write.

use super::{BedSession, Inner, MoveGuard};
use crate::domain::error::BedError;
use crate::domain::models::{Actuator, BedEvent, Direction, MoveOutcome};
use crate::domain::position::{clamp_percent, MAX_POSITION, MIN_POSITION};
use crate::infrastructure::bluetooth::protocol::BedCommand;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};

impl Inner {
    /// Cancel the idle timer and make sure the link is up before writing.
    async fn begin_operation(self: &Arc<Self>) -> Result<(), BedError> {
        let mut link = self.link.lock().await;
        self.cancel_idle(&mut link).await;
        self.ensure_connected_locked(&mut link).await
    }

    async fn write_command(&self, command: BedCommand) -> Result<(), BedError> {
        let write_timeout = self.policy.write_timeout;
        match timeout(write_timeout, self.transport.write(command.as_bytes())).await {
            Ok(Ok(())) => {
                self.touch();
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Write of {:?} to bed {} failed: {}", command, self.address, e);
                Err(BedError::WriteFailed(e))
            }
            Err(_) => {
                error!(
                    "Write of {:?} to bed {} timed out after {:?}",
                    command, self.address, write_timeout
                );
                Err(BedError::WriteTimeout(write_timeout))
            }
        }
    }

    /// Send one pulse and account for it in the estimate.
    async fn pulse(&self, command: BedCommand) -> Result<(), BedError> {
        self.write_command(command).await?;

        let moved: Vec<(Actuator, f64)> = {
            let mut state = self.state();
            command
                .effect()
                .iter()
                .map(|(actuator, direction)| {
                    let position = state
                        .actuator_mut(*actuator)
                        .estimate
                        .apply_pulse(*direction);
                    (*actuator, position)
                })
                .collect()
        };
        for (actuator, position) in moved {
            self.emit(BedEvent::Position { actuator, position });
        }

        if !self.policy.pulse_interval.is_zero() {
            sleep(self.policy.pulse_interval).await;
        }
        Ok(())
    }

    async fn run_single(&self, actuator: Actuator, target: f64) -> Result<MoveOutcome, BedError> {
        let tolerance = self.policy.position_tolerance;
        let mut remaining = self.policy.max_pulses;

        loop {
            let (current, reached) = {
                let state = self.state();
                let estimate = &state.actuator(actuator).estimate;
                (estimate.position(), estimate.within(target, tolerance))
            };
            if reached {
                return Ok(MoveOutcome::Reached);
            }
            if self.is_cancelled(actuator) {
                return Ok(MoveOutcome::Cancelled);
            }
            if remaining == 0 {
                warn!(
                    "Pulse budget exhausted moving {} to {:.2}% (at {:.2}%)",
                    actuator, target, current
                );
                return Ok(MoveOutcome::Incomplete);
            }
            remaining -= 1;

            let direction = Direction::toward(current, target);
            trace!(
                "{} at {:.2}%, moving {:?} toward {:.2}%",
                actuator,
                current,
                direction,
                target
            );
            self.pulse(BedCommand::for_pulse(actuator, direction)).await?;
        }
    }

    /// Extra pulses owed past the end stop. Only flattening overdrives; the
    /// estimate itself stays clamped at 0 while they are sent.
    fn overrun(&self, direction: Direction) -> Overrun {
        let overdrive = self.policy.flat_overdrive;
        if direction == Direction::Up || overdrive <= 0.0 {
            return Overrun::default();
        }
        let state = self.state();
        Overrun {
            head: state.head.estimate.pulses_for(overdrive),
            foot: state.feet.estimate.pulses_for(overdrive),
        }
    }

    /// Checked before every write of a two-section move.
    fn gate(&self, remaining: &mut u32) -> Option<MoveOutcome> {
        if Actuator::ALL.iter().any(|a| self.is_cancelled(*a)) {
            return Some(MoveOutcome::Cancelled);
        }
        if *remaining == 0 {
            warn!("Pulse budget exhausted moving bed");
            return Some(MoveOutcome::Incomplete);
        }
        *remaining -= 1;
        None
    }

    /// Drive both actuators to the end stop in `direction`.
    async fn run_both(&self, direction: Direction) -> Result<MoveOutcome, BedError> {
        let target = match direction {
            Direction::Up => MAX_POSITION,
            Direction::Down => MIN_POSITION,
        };
        let tolerance = self.policy.position_tolerance;
        let mut remaining = self.policy.max_pulses;
        let mut overrun = self.overrun(direction);
        debug!("Moving bed {:?} with overrun {:?}", direction, overrun);

        loop {
            // (actuator, already at the end stop)
            let pending: Vec<(Actuator, bool)> = {
                let state = self.state();
                Actuator::ALL
                    .iter()
                    .map(|a| (*a, state.actuator(*a).estimate.within(target, tolerance)))
                    .filter(|(a, at_stop)| !*at_stop || overrun.left(*a) > 0)
                    .collect()
            };
            if pending.is_empty() {
                return Ok(MoveOutcome::Reached);
            }

            if self.policy.combined_commands {
                if let Some(outcome) = self.gate(&mut remaining) {
                    return Ok(outcome);
                }
                self.pulse(BedCommand::combined(direction)).await?;
                for (actuator, at_stop) in &pending {
                    if *at_stop {
                        overrun.consume(*actuator);
                    }
                }
            } else {
                for (actuator, at_stop) in pending {
                    if let Some(outcome) = self.gate(&mut remaining) {
                        return Ok(outcome);
                    }
                    self.pulse(BedCommand::for_pulse(actuator, direction))
                        .await?;
                    if at_stop {
                        overrun.consume(actuator);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct Overrun {
    head: u32,
    foot: u32,
}

impl Overrun {
    fn left(&self, actuator: Actuator) -> u32 {
        match actuator {
            Actuator::Head => self.head,
            Actuator::Foot => self.foot,
        }
    }

    fn consume(&mut self, actuator: Actuator) {
        let left = match actuator {
            Actuator::Head => &mut self.head,
            Actuator::Foot => &mut self.foot,
        };
        *left = left.saturating_sub(1);
    }
}

impl BedSession {
    /// Drive one actuator to `target` percent.
    ///
    /// Returns [`MoveOutcome::Busy`] without touching anything if a loop for the
    /// actuator is already running. Connection failures and write failures are
    /// errors; running out of pulses is [`MoveOutcome::Incomplete`].
    pub async fn move_to(&self, actuator: Actuator, target: f64) -> Result<MoveOutcome, BedError> {
        let target = clamp_percent(target);
        let Some(_guard) = MoveGuard::acquire(&self.inner, &[actuator], target) else {
            info!(
                "{} movement already in progress, ignoring request for {:.2}%",
                actuator, target
            );
            return Ok(MoveOutcome::Busy);
        };
        self.inner.cancel.flag(actuator).store(false, Ordering::SeqCst);

        info!(
            "Moving {} from {:.2}% to {:.2}%",
            actuator,
            self.inner.position(actuator),
            target
        );
        self.inner.begin_operation().await?;
        let result = self.inner.run_single(actuator, target).await;
        self.inner.rearm_idle().await;

        log_outcome(actuator.name(), &result, self.inner.position(actuator));
        result
    }

    pub async fn open(&self, actuator: Actuator) -> Result<MoveOutcome, BedError> {
        self.move_to(actuator, MAX_POSITION).await
    }

    pub async fn close(&self, actuator: Actuator) -> Result<MoveOutcome, BedError> {
        self.move_to(actuator, MIN_POSITION).await
    }

    /// Ask the running loop for `actuator` to stop at its next pulse boundary.
    pub fn stop(&self, actuator: Actuator) {
        info!("Stop requested for {}", actuator);
        self.inner.cancel.flag(actuator).store(true, Ordering::SeqCst);
    }

    pub fn stop_all(&self) {
        for actuator in Actuator::ALL {
            self.stop(actuator);
        }
    }

    /// Lower both sections to flat.
    ///
    /// Once a section's estimate reads 0 it keeps receiving pulses worth the
    /// configured overdrive, so the bed bottoms out despite estimate drift.
    pub async fn set_flat(&self) -> Result<MoveOutcome, BedError> {
        self.move_both(Direction::Down).await
    }

    /// Raise both sections fully.
    pub async fn set_max(&self) -> Result<MoveOutcome, BedError> {
        self.move_both(Direction::Up).await
    }

    async fn move_both(&self, direction: Direction) -> Result<MoveOutcome, BedError> {
        let target = match direction {
            Direction::Up => MAX_POSITION,
            Direction::Down => MIN_POSITION,
        };
        let Some(_guard) = MoveGuard::acquire(&self.inner, &Actuator::ALL, target) else {
            info!("Bed movement already in progress, ignoring {:?} request", direction);
            return Ok(MoveOutcome::Busy);
        };
        for actuator in Actuator::ALL {
            self.inner.cancel.flag(actuator).store(false, Ordering::SeqCst);
        }

        info!("Moving bed {:?} to {:.0}%", direction, target);
        self.inner.begin_operation().await?;

        let result = self.inner.run_both(direction).await;
        self.inner.rearm_idle().await;

        log_outcome("bed", &result, self.inner.position(Actuator::Head));
        result
    }
}

fn log_outcome(what: &str, result: &Result<MoveOutcome, BedError>, position: f64) {
    match result {
        Ok(MoveOutcome::Reached) => info!("{} reached target ({:.2}%)", what, position),
        Ok(MoveOutcome::Cancelled) => info!("{} stopped at {:.2}%", what, position),
        Ok(MoveOutcome::Incomplete) => warn!("{} stopped short at {:.2}%", what, position),
        Ok(MoveOutcome::Busy) => {}
        Err(e) => error!("{} movement aborted at {:.2}%: {}", what, position, e),
    }
}
