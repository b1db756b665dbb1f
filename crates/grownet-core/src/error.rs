//! Error types for the GrowNet engine

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, GrowNetError>;

/// Errors that can occur while building or ticking a region
#[derive(Error, Debug)]
pub enum GrowNetError {
    /// A layer or neuron index was out of range
    #[error("{what} index {index} out of range (len {len})")]
    BadIndex {
        /// What kind of index was out of range
        what: String,
        /// The offending index
        index: usize,
        /// Number of valid entries
        len: usize,
    },

    /// A shape did not match what the operation requires
    #[error("Shape error: {reason}")]
    BadShape {
        /// Reason for the shape mismatch
        reason: String,
    },

    /// An invalid configuration value was supplied
    #[error("Invalid configuration: {reason}")]
    BadConfig {
        /// Reason the configuration is invalid
        reason: String,
    },

    /// A tick referenced a port that was never bound
    #[error("Port {port:?} was never bound")]
    MissingPort {
        /// The unbound port name
        port: String,
    },
}

impl GrowNetError {
    /// Create a bad-index error
    pub fn bad_index(what: impl Into<String>, index: usize, len: usize) -> Self {
        Self::BadIndex {
            what: what.into(),
            index,
            len,
        }
    }

    /// Create a shape error
    pub fn bad_shape(reason: impl Into<String>) -> Self {
        Self::BadShape {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn bad_config(reason: impl Into<String>) -> Self {
        Self::BadConfig {
            reason: reason.into(),
        }
    }

    /// Create a missing-port error
    pub fn missing_port(port: impl Into<String>) -> Self {
        Self::MissingPort { port: port.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = GrowNetError::bad_index("layer", 3, 2);
        assert!(matches!(err, GrowNetError::BadIndex { .. }));

        let err = GrowNetError::bad_config("radius must be > 0");
        assert!(matches!(err, GrowNetError::BadConfig { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = GrowNetError::missing_port("pixels");
        let msg = format!("{}", err);
        assert!(msg.contains("\"pixels\""));
        assert!(msg.contains("never bound"));

        let err = GrowNetError::bad_index("layer", 5, 2);
        assert!(format!("{}", err).contains("layer index 5 out of range (len 2)"));
    }
}
