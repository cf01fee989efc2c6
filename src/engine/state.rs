use serde::Serialize;
use std::fmt;

use crate::error::EngineError;

/// Engine lifecycle: `Idle -> Running -> Paused <-> Running -> Stopped -> Idle`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }

    pub(crate) fn start(self) -> Result<Self, EngineError> {
        match self {
            Self::Idle | Self::Stopped => Ok(Self::Running),
            from => Err(EngineError::InvalidTransition {
                from,
                action: "start",
            }),
        }
    }

    pub(crate) fn pause(self) -> Result<Self, EngineError> {
        match self {
            Self::Running => Ok(Self::Paused),
            from => Err(EngineError::InvalidTransition {
                from,
                action: "pause",
            }),
        }
    }

    pub(crate) fn resume(self) -> Result<Self, EngineError> {
        match self {
            Self::Paused => Ok(Self::Running),
            from => Err(EngineError::InvalidTransition {
                from,
                action: "resume",
            }),
        }
    }

    pub(crate) fn stop(self) -> Result<Self, EngineError> {
        match self {
            Self::Running | Self::Paused => Ok(Self::Stopped),
            from => Err(EngineError::InvalidTransition {
                from,
                action: "stop",
            }),
        }
    }

    pub(crate) fn reset(self) -> Result<Self, EngineError> {
        match self {
            Self::Stopped | Self::Idle => Ok(Self::Idle),
            from => Err(EngineError::InvalidTransition {
                from,
                action: "reset",
            }),
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
