//! Linak Bed Protocol
//!
//! The bed exposes a single writable command characteristic. Every command is a
//! two-byte opcode; each write drives the addressed motor(s) for one fixed-length
//! pulse. There is no absolute positioning and no position feedback on the wire.

use crate::domain::models::{Actuator, Direction};
use uuid::Uuid;

/// Command characteristic UUID - where pulse commands are written
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x99fa0002_338a_1024_8a49_009c0215f78a);

/// Complete command vocabulary of the bed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BedCommand {
    /// Lower both sections
    AllDown,
    /// Raise both sections
    AllUp,
    /// Halt any motion
    Stop,
    HeadUp,
    HeadDown,
    FootUp,
    FootDown,
}

impl BedCommand {
    /// Get the raw bytes for this command
    pub fn as_bytes(&self) -> &'static [u8; 2] {
        match self {
            Self::AllDown => &[0x00, 0x00],
            Self::AllUp => &[0x01, 0x00],
            Self::Stop => &[0xFF, 0x00],
            Self::HeadUp => &[0x0B, 0x00],
            Self::HeadDown => &[0x0A, 0x00],
            Self::FootUp => &[0x09, 0x00],
            Self::FootDown => &[0x08, 0x00],
        }
    }

    /// Decode a payload written to the command characteristic
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x00, 0x00] => Some(Self::AllDown),
            [0x01, 0x00] => Some(Self::AllUp),
            [0xFF, 0x00] => Some(Self::Stop),
            [0x0B, 0x00] => Some(Self::HeadUp),
            [0x0A, 0x00] => Some(Self::HeadDown),
            [0x09, 0x00] => Some(Self::FootUp),
            [0x08, 0x00] => Some(Self::FootDown),
            _ => None,
        }
    }

    /// Single-actuator pulse
    pub fn for_pulse(actuator: Actuator, direction: Direction) -> Self {
        match (actuator, direction) {
            (Actuator::Head, Direction::Up) => Self::HeadUp,
            (Actuator::Head, Direction::Down) => Self::HeadDown,
            (Actuator::Foot, Direction::Up) => Self::FootUp,
            (Actuator::Foot, Direction::Down) => Self::FootDown,
        }
    }

    /// Pulse driving both actuators at once
    pub fn combined(direction: Direction) -> Self {
        match direction {
            Direction::Up => Self::AllUp,
            Direction::Down => Self::AllDown,
        }
    }

    /// Actuators moved by this command, and in which direction
    pub fn effect(&self) -> &'static [(Actuator, Direction)] {
        match self {
            Self::AllDown => &[
                (Actuator::Head, Direction::Down),
                (Actuator::Foot, Direction::Down),
            ],
            Self::AllUp => &[
                (Actuator::Head, Direction::Up),
                (Actuator::Foot, Direction::Up),
            ],
            Self::Stop => &[],
            Self::HeadUp => &[(Actuator::Head, Direction::Up)],
            Self::HeadDown => &[(Actuator::Head, Direction::Down)],
            Self::FootUp => &[(Actuator::Foot, Direction::Up)],
            Self::FootDown => &[(Actuator::Foot, Direction::Down)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [BedCommand; 7] = [
        BedCommand::AllDown,
        BedCommand::AllUp,
        BedCommand::Stop,
        BedCommand::HeadUp,
        BedCommand::HeadDown,
        BedCommand::FootUp,
        BedCommand::FootDown,
    ];

    #[test]
    fn test_command_uuid() {
        assert_eq!(
            COMMAND_CHAR_UUID.to_string(),
            "99fa0002-338a-1024-8a49-009c0215f78a"
        );
    }

    #[test]
    fn test_command_bytes() {
        assert_eq!(BedCommand::AllDown.as_bytes(), &[0x00, 0x00]);
        assert_eq!(BedCommand::Stop.as_bytes(), &[0xFF, 0x00]);
        assert_eq!(BedCommand::HeadUp.as_bytes(), &[0x0B, 0x00]);
        assert_eq!(BedCommand::FootDown.as_bytes(), &[0x08, 0x00]);
    }

    #[test]
    fn test_decode_known_opcodes_only() {
        for cmd in ALL {
            assert_eq!(BedCommand::from_bytes(cmd.as_bytes()), Some(cmd));
        }
        assert_eq!(BedCommand::from_bytes(&[0x0C, 0x00]), None);
        assert_eq!(BedCommand::from_bytes(&[0x0B]), None);
    }

    #[test]
    fn test_pulse_selection() {
        assert_eq!(
            BedCommand::for_pulse(Actuator::Foot, Direction::Up),
            BedCommand::FootUp
        );
        assert_eq!(BedCommand::combined(Direction::Down), BedCommand::AllDown);
        assert_eq!(BedCommand::AllUp.effect().len(), 2);
        assert!(BedCommand::Stop.effect().is_empty());
    }
}
