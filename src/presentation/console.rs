//! Line-oriented front end.
//!
//! Movement commands run as background tasks so `stop` can be typed while a
//! section is still moving. End of input waits for running moves; `quit`
//! stops them.

use super::button::FlatButton;
use super::cover::BedCover;
use super::error::PresentationError;
use crate::domain::models::{Actuator, MoveOutcome, PositionSnapshot};
use crate::session::BedSession;
use std::future::Future;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

const HELP: &str = "\
commands:
  head|foot <0-100>      move a section to a position
  head|foot open|close   raise or lower a section fully
  head|foot stop         stop a section
  stop                   stop everything
  flat | max             lower or raise the whole bed
  status                 show positions and connection
  connect | disconnect   manage the Bluetooth link
  help | quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    SetPosition(Actuator, u8),
    Open(Actuator),
    Close(Actuator),
    Stop(Actuator),
    StopAll,
    Flat,
    Max,
    Status,
    Connect,
    Disconnect,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command '{0}', type 'help'")]
    Unknown(String),
    #[error("'{0}' needs a position, open, close or stop")]
    MissingArgument(Actuator),
    #[error("invalid position '{0}', expected 0-100")]
    InvalidPosition(String),
}

fn parse_actuator(word: &str) -> Option<Actuator> {
    match word {
        "head" => Some(Actuator::Head),
        "foot" | "feet" => Some(Actuator::Foot),
        _ => None,
    }
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, ParseError> {
    let lowered = line.trim().to_ascii_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();

    let command = match words.as_slice() {
        [] => return Ok(None),
        ["flat"] => ConsoleCommand::Flat,
        ["max"] => ConsoleCommand::Max,
        ["stop"] => ConsoleCommand::StopAll,
        ["status"] => ConsoleCommand::Status,
        ["connect"] => ConsoleCommand::Connect,
        ["disconnect"] => ConsoleCommand::Disconnect,
        ["help"] | ["?"] => ConsoleCommand::Help,
        ["quit"] | ["exit"] => ConsoleCommand::Quit,
        [section, rest @ ..] => {
            let Some(actuator) = parse_actuator(section) else {
                return Err(ParseError::Unknown(lowered.clone()));
            };
            match rest {
                [] => return Err(ParseError::MissingArgument(actuator)),
                ["open"] | ["up"] => ConsoleCommand::Open(actuator),
                ["close"] | ["down"] => ConsoleCommand::Close(actuator),
                ["stop"] => ConsoleCommand::Stop(actuator),
                [value] => {
                    let value = value.trim_end_matches('%');
                    match value.parse::<u8>() {
                        Ok(position) if position <= 100 => {
                            ConsoleCommand::SetPosition(actuator, position)
                        }
                        _ => return Err(ParseError::InvalidPosition(value.to_string())),
                    }
                }
                _ => return Err(ParseError::Unknown(lowered.clone())),
            }
        }
    };
    Ok(Some(command))
}

pub fn format_status(snapshot: &PositionSnapshot) -> String {
    let section = |actuator: Actuator| {
        let moving = if snapshot.is_moving(actuator) {
            " (moving)"
        } else {
            ""
        };
        format!("{} {:.0}%{}", actuator, snapshot.position(actuator), moving)
    };
    let mut status = format!(
        "{}, {}, {}",
        section(Actuator::Head),
        section(Actuator::Foot),
        snapshot.connection
    );
    if !snapshot.available {
        status.push_str(", unavailable");
    }
    status
}

fn report(what: &str, result: Result<MoveOutcome, PresentationError>) {
    match result {
        Ok(MoveOutcome::Reached) => println!("{}: done", what),
        Ok(MoveOutcome::Cancelled) => println!("{}: stopped", what),
        Ok(MoveOutcome::Busy) => println!("{}: already moving, stop it first", what),
        Ok(MoveOutcome::Incomplete) => println!("{}: stopped short, run it again", what),
        Err(e) => {
            error!("{}: {:?}", what, e);
            println!("{}: {}", what, e);
        }
    }
}

struct Console {
    session: BedSession,
    covers: [BedCover; 2],
    button: FlatButton,
    tasks: JoinSet<()>,
}

impl Console {
    fn new(session: BedSession) -> Self {
        Self {
            covers: BedCover::pair(&session),
            button: FlatButton::new(session.clone()),
            session,
            tasks: JoinSet::new(),
        }
    }

    fn cover(&self, actuator: Actuator) -> BedCover {
        match actuator {
            Actuator::Head => self.covers[0].clone(),
            Actuator::Foot => self.covers[1].clone(),
        }
    }

    fn spawn_move<F>(&mut self, what: String, operation: F)
    where
        F: Future<Output = Result<MoveOutcome, PresentationError>> + Send + 'static,
    {
        self.tasks.spawn(async move { report(&what, operation.await) });
    }

    /// Returns false once the console should exit.
    async fn execute(&mut self, command: ConsoleCommand) -> bool {
        while self.tasks.try_join_next().is_some() {}

        match command {
            ConsoleCommand::SetPosition(actuator, position) => {
                let cover = self.cover(actuator);
                self.spawn_move(format!("{} {}%", actuator, position), async move {
                    cover.set_position(position).await
                });
            }
            ConsoleCommand::Open(actuator) => {
                let cover = self.cover(actuator);
                self.spawn_move(format!("{} open", actuator), async move { cover.open().await });
            }
            ConsoleCommand::Close(actuator) => {
                let cover = self.cover(actuator);
                self.spawn_move(format!("{} close", actuator), async move {
                    cover.close().await
                });
            }
            ConsoleCommand::Stop(actuator) => self.cover(actuator).stop(),
            ConsoleCommand::StopAll => self.session.stop_all(),
            ConsoleCommand::Flat => {
                let button = self.button.clone();
                self.spawn_move("flat".to_string(), async move { button.press().await });
            }
            ConsoleCommand::Max => {
                let session = self.session.clone();
                self.spawn_move("max".to_string(), async move {
                    session
                        .set_max()
                        .await
                        .map_err(PresentationError::failed("raise bed"))
                });
            }
            ConsoleCommand::Status => println!("{}", format_status(&self.session.snapshot())),
            ConsoleCommand::Connect => match self.session.connect().await {
                Ok(()) => println!("connected"),
                Err(e) => println!("connect failed: {}", e),
            },
            ConsoleCommand::Disconnect => {
                self.session.disconnect().await;
                println!("disconnected");
            }
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => return false,
        }
        true
    }

    async fn wait_for_moves(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }

    async fn abort_moves(&mut self) {
        self.session.stop_all();
        self.tasks.abort_all();
        self.wait_for_moves().await;
    }
}

/// Read commands from `input` until `quit` or end of input.
pub async fn run<R>(session: BedSession, input: R) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut console = Console::new(session);
    let mut lines = input.lines();
    info!("Console ready");

    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Ok(Some(command)) => {
                debug!("Console command {:?}", command);
                if !console.execute(command).await {
                    console.abort_moves().await;
                    return Ok(());
                }
            }
            Ok(None) => {}
            Err(e) => println!("{}", e),
        }
    }

    console.wait_for_moves().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ConnectionState;
    use crate::session::test_support::session;

    #[test]
    fn test_parse_section_commands() {
        assert_eq!(
            parse_command("head 40"),
            Ok(Some(ConsoleCommand::SetPosition(Actuator::Head, 40)))
        );
        assert_eq!(
            parse_command("  Foot OPEN "),
            Ok(Some(ConsoleCommand::Open(Actuator::Foot)))
        );
        assert_eq!(
            parse_command("feet 75%"),
            Ok(Some(ConsoleCommand::SetPosition(Actuator::Foot, 75)))
        );
        assert_eq!(
            parse_command("head stop"),
            Ok(Some(ConsoleCommand::Stop(Actuator::Head)))
        );
        assert_eq!(
            parse_command("foot down"),
            Ok(Some(ConsoleCommand::Close(Actuator::Foot)))
        );
    }

    #[test]
    fn test_parse_bed_commands() {
        assert_eq!(parse_command(""), Ok(None));
        assert_eq!(parse_command("flat"), Ok(Some(ConsoleCommand::Flat)));
        assert_eq!(parse_command("max"), Ok(Some(ConsoleCommand::Max)));
        assert_eq!(parse_command("stop"), Ok(Some(ConsoleCommand::StopAll)));
        assert_eq!(parse_command("status"), Ok(Some(ConsoleCommand::Status)));
        assert_eq!(parse_command("disconnect"), Ok(Some(ConsoleCommand::Disconnect)));
        assert_eq!(parse_command("quit"), Ok(Some(ConsoleCommand::Quit)));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_command("head 101"),
            Err(ParseError::InvalidPosition("101".to_string()))
        );
        assert_eq!(
            parse_command("foot -5"),
            Err(ParseError::InvalidPosition("-5".to_string()))
        );
        assert_eq!(
            parse_command("head"),
            Err(ParseError::MissingArgument(Actuator::Head))
        );
        assert!(matches!(parse_command("dance"), Err(ParseError::Unknown(_))));
        assert!(matches!(parse_command("head 1 2"), Err(ParseError::Unknown(_))));
    }

    #[test]
    fn test_format_status() {
        let snapshot = PositionSnapshot {
            head: 42.31,
            feet: 0.0,
            connection: ConnectionState::Connected,
            available: true,
            head_moving: true,
            feet_moving: false,
        };
        assert_eq!(
            format_status(&snapshot),
            "head 42% (moving), foot 0%, connected"
        );

        let offline = PositionSnapshot {
            available: false,
            connection: ConnectionState::Disconnected,
            head_moving: false,
            ..snapshot
        };
        assert_eq!(
            format_status(&offline),
            "head 42%, foot 0%, disconnected, unavailable"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_for_moves_at_end_of_input() {
        let (session, sim, _rx) = session();
        let script: &[u8] = b"foot 30\nhead 10\nbogus\nstatus\n";
        run(session.clone(), script).await.unwrap();

        let snap = session.snapshot();
        assert!((snap.feet - 30.0).abs() <= 1.5);
        assert!((snap.head - 10.0).abs() <= 1.5);
        assert!(!snap.feet_moving && !snap.head_moving);
        assert_eq!(sim.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quit_stops_running_moves() {
        let (session, _sim, _rx) = session();
        let script: &[u8] = b"head open\nquit\nfoot open\n";
        run(session.clone(), script).await.unwrap();

        let snap = session.snapshot();
        assert!(snap.head < 100.0);
        assert!(!snap.head_moving);
        assert_eq!(snap.feet, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_disconnect_commands() {
        let (session, sim, _rx) = session();
        run(session.clone(), &b"connect\n"[..]).await.unwrap();
        assert!(session.desired_connected());
        assert!(sim.connected());

        run(session.clone(), &b"disconnect\n"[..]).await.unwrap();
        assert!(!session.desired_connected());
        assert!(!sim.connected());
    }
}
