//! Commands on the per-location control items
//!
//! - Occupancy-State: `ON` occupies the location, `OFF` vacates it
//! - Occupancy-Control: `LOCK`, `LOCK,<seconds>`, `UNLOCK`, `CLEARLOCKS`

use super::LocationGraph;
use crate::domain::types::StatusItem;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const DIRECT_COMMAND: &str = "Direct command";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Lock { timeout: Option<Duration> },
    Unlock,
    ClearLocks,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlCommandError {
    #[error("empty control command")]
    Empty,
    #[error("unknown control command '{0}'")]
    Unknown(String),
    #[error("invalid lock timeout '{0}'")]
    InvalidTimeout(String),
    #[error("unexpected argument '{arg}' for {command}")]
    UnexpectedArgument { command: String, arg: String },
}

impl FromStr for ControlCommand {
    type Err = ControlCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(',').map(str::trim);
        let command = parts.next().unwrap_or_default();
        let arg = parts.next().filter(|a| !a.is_empty());

        let parsed = match command.to_ascii_uppercase().as_str() {
            "" => return Err(ControlCommandError::Empty),
            "LOCK" => {
                let timeout = match arg {
                    Some(secs) => Some(
                        secs.parse::<u64>()
                            .map(Duration::from_secs)
                            .map_err(|_| ControlCommandError::InvalidTimeout(secs.to_string()))?,
                    ),
                    None => None,
                };
                // LOCK,0 is a plain lock
                return Ok(ControlCommand::Lock { timeout: timeout.filter(|t| !t.is_zero()) });
            }
            "UNLOCK" => ControlCommand::Unlock,
            "CLEARLOCKS" => ControlCommand::ClearLocks,
            _ => return Err(ControlCommandError::Unknown(s.trim().to_string())),
        };

        match arg {
            Some(arg) => Err(ControlCommandError::UnexpectedArgument {
                command: command.to_string(),
                arg: arg.to_string(),
            }),
            None => Ok(parsed),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Lock { timeout: Some(t) } => write!(f, "LOCK,{}", t.as_secs()),
            ControlCommand::Lock { timeout: None } => f.write_str("LOCK"),
            ControlCommand::Unlock => f.write_str("UNLOCK"),
            ControlCommand::ClearLocks => f.write_str("CLEARLOCKS"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateCommand {
    Occupied,
    Vacant,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid occupancy state command '{0}', expected ON or OFF")]
pub struct StateCommandError(pub String);

impl FromStr for StateCommand {
    type Err = StateCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ON" => Ok(StateCommand::Occupied),
            "OFF" => Ok(StateCommand::Vacant),
            other => Err(StateCommandError(other.to_string())),
        }
    }
}

impl StateCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateCommand::Occupied => "ON",
            StateCommand::Vacant => "OFF",
        }
    }
}

impl LocationGraph {
    /// Dispatch a command received on one of a location's status items
    pub(crate) fn handle_status_command(
        &mut self,
        location: &str,
        status: StatusItem,
        command: &str,
    ) {
        match status {
            StatusItem::State => match command.parse::<StateCommand>() {
                Ok(cmd) => {
                    self.metrics.record_command_event();
                    info!(location = %location, command = cmd.as_str(), "occupancy_state_command");
                    self.apply_state_command(location, cmd);
                }
                Err(e) => warn!(location = %location, error = %e, "occupancy_state_command_invalid"),
            },
            StatusItem::Control => match command.parse::<ControlCommand>() {
                Ok(cmd) => {
                    self.metrics.record_command_event();
                    info!(location = %location, command = %cmd, "occupancy_control_command");
                    self.apply_control_command(location, cmd);
                }
                Err(e) => warn!(location = %location, error = %e, "occupancy_control_command_invalid"),
            },
            StatusItem::Lock | StatusItem::Time => {
                debug!(location = %location, item = status.tag(), "status_item_command_ignored");
            }
        }
    }

    pub fn apply_state_command(&mut self, location: &str, command: StateCommand) {
        match command {
            StateCommand::Occupied => self.set_occupied(location, DIRECT_COMMAND, None),
            StateCommand::Vacant => self.set_vacant(location, DIRECT_COMMAND),
        }
    }

    pub fn apply_control_command(&mut self, location: &str, command: ControlCommand) {
        match command {
            ControlCommand::Lock { timeout } => self.lock(location, timeout),
            ControlCommand::Unlock => self.unlock(location),
            ControlCommand::ClearLocks => self.clear_lock(location),
        }
    }
}
