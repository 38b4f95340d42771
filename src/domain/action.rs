//! Symbolic action tokens configured on locations

use std::fmt;
use std::str::FromStr;

/// An action run when a location becomes occupied or vacant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionToken {
    LightsOn,
    LightsOnIfDark,
    SceneOn,
    SceneOnIfDark,
    AvOn,
    ExhaustFansOn,
    LightsOff,
    SceneOff,
    AvOff,
    ExhaustFansOff,
}

/// Which transition an action list belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPhase {
    Occupied,
    Vacant,
}

impl ActionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionPhase::Occupied => "occupied",
            ActionPhase::Vacant => "vacant",
        }
    }
}

impl ActionToken {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionToken::LightsOn => "LightsOn",
            ActionToken::LightsOnIfDark => "LightsOnIfDark",
            ActionToken::SceneOn => "SceneOn",
            ActionToken::SceneOnIfDark => "SceneOnIfDark",
            ActionToken::AvOn => "AVOn",
            ActionToken::ExhaustFansOn => "ExhaustFansOn",
            ActionToken::LightsOff => "LightsOff",
            ActionToken::SceneOff => "SceneOff",
            ActionToken::AvOff => "AVOff",
            ActionToken::ExhaustFansOff => "ExhaustFansOff",
        }
    }

    /// Phase this token may be configured for
    pub fn phase(&self) -> ActionPhase {
        match self {
            ActionToken::LightsOn
            | ActionToken::LightsOnIfDark
            | ActionToken::SceneOn
            | ActionToken::SceneOnIfDark
            | ActionToken::AvOn
            | ActionToken::ExhaustFansOn => ActionPhase::Occupied,
            ActionToken::LightsOff
            | ActionToken::SceneOff
            | ActionToken::AvOff
            | ActionToken::ExhaustFansOff => ActionPhase::Vacant,
        }
    }

    /// Command sent to the discovered devices
    pub fn command(&self) -> &'static str {
        match self.phase() {
            ActionPhase::Occupied => "ON",
            ActionPhase::Vacant => "OFF",
        }
    }

    /// Only runs while the daylight indicator is OFF
    pub fn requires_darkness(&self) -> bool {
        matches!(self, ActionToken::LightsOnIfDark | ActionToken::SceneOnIfDark)
    }
}

impl fmt::Display for ActionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "LightsOn" => Ok(ActionToken::LightsOn),
            "LightsOnIfDark" => Ok(ActionToken::LightsOnIfDark),
            "SceneOn" => Ok(ActionToken::SceneOn),
            "SceneOnIfDark" => Ok(ActionToken::SceneOnIfDark),
            "AVOn" => Ok(ActionToken::AvOn),
            "ExhaustFansOn" => Ok(ActionToken::ExhaustFansOn),
            "LightsOff" => Ok(ActionToken::LightsOff),
            "SceneOff" => Ok(ActionToken::SceneOff),
            "AVOff" => Ok(ActionToken::AvOff),
            "ExhaustFansOff" => Ok(ActionToken::ExhaustFansOff),
            other => Err(other.to_string()),
        }
    }
}
