use crate::format::Format;

/// All errors that can occur within Stoat.
///
/// One enum across the workspace keeps propagation simple: shape and format
/// mismatches, residency violations, bad hyperparameters, use-before-setup,
/// and device failures each get their own variant so callers can tell them
/// apart.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two tensors (or a tensor and a declared format) disagree on shape.
    #[error("format mismatch: expected {expected}, got {got}")]
    FormatMismatch { expected: Format, got: Format },

    /// An operation combined a host-resident and a device-resident operand.
    #[error("residency mismatch: {op} requires all operands on the same side")]
    ResidencyMismatch { op: &'static str },

    /// An operation that only exists as a host routine was called on a
    /// device-resident tensor.
    #[error("{op} requires host residency")]
    HostOnly { op: &'static str },

    /// A layer or kernel hyperparameter is out of its valid range.
    #[error("invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),

    /// `(input - kernel) / stride + 1` did not come out whole.
    #[error(
        "kernel size {kernel} with stride {stride} does not tile an input side of {input}"
    )]
    NonIntegralOutput {
        input: usize,
        kernel: usize,
        stride: usize,
    },

    /// Operating on a network, layer, or tensor before its required setup.
    #[error("uninitialized: {0}")]
    Uninitialized(&'static str),

    /// Flat or row index out of range.
    #[error("index {index} out of range for {count} items")]
    IndexOutOfRange { index: usize, count: usize },

    /// Device selection, kernel launch, or synchronization failed. Fatal for
    /// the surrounding operation; never retried internally.
    #[error("device error: {0}")]
    Device(String),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }
}

/// Convenience Result type used throughout Stoat.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
