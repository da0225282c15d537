use crate::state::StateSchemaError;
use std::fmt;

/// Fatal configuration errors, raised at Land-creation time, never at
/// message time (`spec.md` §7).
#[derive(Debug)]
pub enum LandError {
    InvalidStateSchema(StateSchemaError),
    InvalidLandType,
}

impl fmt::Display for LandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LandError::InvalidStateSchema(err) => write!(f, "invalid state schema: {err}"),
            LandError::InvalidLandType => write!(f, "land type must not be empty"),
        }
    }
}

impl std::error::Error for LandError {}

impl From<StateSchemaError> for LandError {
    fn from(value: StateSchemaError) -> Self {
        LandError::InvalidStateSchema(value)
    }
}

/// The error shape a handler hands back for an `Action`; delivered to the
/// caller as `actionResponse.error`.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub code: String,
    pub message: String,
}

impl HandlerError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for HandlerError {}
