//! Decoder error types.
//!
//! Every failure is deterministic given the inputs and the configuration, so
//! nothing here is retried. A failed decode call returns no partial output.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecoderError {
    /// Contradictory or missing inputs, detected before any stepping begins.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An auxiliary stack was popped while empty.
    #[error("{stack} stack underflow: pop on an empty stack")]
    Underflow { stack: &'static str },

    /// A width or shape that does not line up with what a component expects.
    #[error("shape mismatch in {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Failure reported by a recurrent cell or attention capability.
    #[error("capability failure: {0}")]
    Capability(String),
}

impl DecoderError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn check_width(what: &'static str, expected: usize, got: usize) -> Result<()> {
        if expected == got {
            Ok(())
        } else {
            Err(Self::ShapeMismatch {
                what,
                expected,
                got,
            })
        }
    }
}

pub type Result<T> = std::result::Result<T, DecoderError>;
