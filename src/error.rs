//! Unified error handling for the ride-tracker library.
//!
//! Invalid phase transitions are not errors (they are silently ignored by the
//! engine). This type covers the operations that can genuinely fail: building
//! a submission, decoding a snapshot, storage and network I/O.

use std::fmt;

use crate::RidePhase;

/// Unified error type for ride-tracker operations.
#[derive(Debug, Clone, PartialEq)]
pub enum RideError {
    /// Operation requires a different lifecycle phase
    InvalidPhase {
        operation: String,
        phase: RidePhase,
    },
    /// Checkout attempted without choosing a payment method
    MissingPaymentMethod,
    /// A ride value that is not a finite, non-negative number
    InvalidValue { value: f64 },
    /// Snapshot entry could not be decoded
    Snapshot { key: String, message: String },
    /// Persistence/storage error
    Persistence { message: String },
    /// HTTP/API error
    Http {
        message: String,
        status_code: Option<u16>,
    },
    /// Configuration error
    Config { message: String },
    /// Generic internal error
    Internal { message: String },
}

impl fmt::Display for RideError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RideError::InvalidPhase { operation, phase } => {
                write!(f, "Cannot {} while in phase {}", operation, phase.as_str())
            }
            RideError::MissingPaymentMethod => {
                write!(f, "A payment method must be selected before checkout")
            }
            RideError::InvalidValue { value } => {
                write!(f, "Invalid ride value: {}", value)
            }
            RideError::Snapshot { key, message } => {
                write!(f, "Snapshot entry '{}' is invalid: {}", key, message)
            }
            RideError::Persistence { message } => {
                write!(f, "Persistence error: {}", message)
            }
            RideError::Http {
                message,
                status_code,
            } => {
                if let Some(code) = status_code {
                    write!(f, "HTTP error ({}): {}", code, message)
                } else {
                    write!(f, "HTTP error: {}", message)
                }
            }
            RideError::Config { message } => {
                write!(f, "Configuration error: {}", message)
            }
            RideError::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for RideError {}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for RideError {
    fn from(e: rusqlite::Error) -> Self {
        RideError::Persistence {
            message: e.to_string(),
        }
    }
}

/// Result type alias for ride-tracker operations.
pub type Result<T> = std::result::Result<T, RideError>;

/// Extension trait for converting Option to RideError.
pub trait OptionExt<T> {
    /// Convert a missing snapshot entry into a snapshot error.
    fn ok_or_missing_key(self, key: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_missing_key(self, key: &str) -> Result<T> {
        self.ok_or_else(|| RideError::Snapshot {
            key: key.to_string(),
            message: "missing".to_string(),
        })
    }
}
