use thiserror::Error;

use crate::engine::EngineState;

/// Errors raised by the counting engine.
///
/// `InvalidDetection` is per detection and never aborts a frame.
/// `Configuration` is only produced at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid detection: {0}")]
    InvalidDetection(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: EngineState,
        action: &'static str,
    },
}
