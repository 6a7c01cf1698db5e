use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two independently driven bed sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actuator {
    Head,
    Foot,
}

impl Actuator {
    pub const ALL: [Actuator; 2] = [Actuator::Head, Actuator::Foot];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Foot => "foot",
        }
    }
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Direction of a single motor pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Direction that moves `current` toward `target`.
    pub fn toward(current: f64, target: f64) -> Self {
        if current < target {
            Self::Up
        } else {
            Self::Down
        }
    }

    pub fn sign(&self) -> f64 {
        match self {
            Self::Up => 1.0,
            Self::Down => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// How a movement request ended when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Estimated position is within tolerance of the target.
    Reached,
    /// `stop` was requested; position is left where the last pulse put it.
    Cancelled,
    /// Another loop already drives this actuator; the request was ignored.
    Busy,
    /// Pulse budget ran out before reaching the target; the estimate is still valid.
    Incomplete,
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSnapshot {
    pub head: f64,
    pub feet: f64,
    pub connection: ConnectionState,
    pub available: bool,
    pub head_moving: bool,
    pub feet_moving: bool,
}

impl PositionSnapshot {
    pub fn position(&self, actuator: Actuator) -> f64 {
        match actuator {
            Actuator::Head => self.head,
            Actuator::Foot => self.feet,
        }
    }

    pub fn is_moving(&self, actuator: Actuator) -> bool {
        match actuator {
            Actuator::Head => self.head_moving,
            Actuator::Foot => self.feet_moving,
        }
    }
}

/// Link-layer notification delivered by the platform for the bed's address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Advertised,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone)]
pub enum BedEvent {
    ConnectionStatus(ConnectionState),
    Position { actuator: Actuator, position: f64 },
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
