//! Unified error handling for FlexForge
//!
//! A single error type covers every layer of the crate. It implements
//! error categorization for:
//! - User errors (malformed descriptions, bad axes, bad configuration)
//! - Lifecycle errors (binding discipline violated)
//! - Backend errors (device memory, stream and channel failures)
//! - Internal errors (bugs, poisoned locks)

use std::fmt;

use crate::flex::FlexId;
use crate::tensor::{DType, TensorId};

/// Unified error type for FlexForge
#[derive(Debug, thiserror::Error)]
pub enum FlexForgeError {
    // ========== Description Errors ==========
    /// Shape and stride ranks disagree, or a view reaches outside its storage
    #[error("Malformed tensor description: {0}")]
    MalformedDescriptor(String),

    /// Axis list is not a permutation of the tensor's axes
    #[error("Invalid axes: {0}")]
    InvalidAxes(String),

    /// Slice expression does not apply to the destination
    #[error("Invalid item: {0}")]
    InvalidItem(String),

    /// Graph op is missing operands or metadata
    #[error("Invalid op: {0}")]
    InvalidOp(String),

    /// Shapes of two tensors are incompatible
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    /// Element types of two tensors are incompatible
    #[error("DType mismatch: expected {expected:?}, got {got:?}")]
    DTypeMismatch { expected: DType, got: DType },

    /// A scalar was required
    #[error("Not a scalar: value has shape {0:?}")]
    NotAScalar(Vec<usize>),

    // ========== Distribution Errors ==========
    /// Random fill requested with an unknown distribution tag
    #[error("Unsupported distribution: {0}")]
    UnsupportedDistribution(String),

    /// Random fill requested without one of its parameters
    #[error("Distribution '{distribution}' requires parameter '{param}'")]
    MissingDistributionParam {
        distribution: String,
        param: String,
    },

    // ========== Lifecycle Errors ==========
    /// Kernel executed (or parameter read) before `bind_buffers`
    #[error("Not bound: {0}")]
    NotBound(String),

    /// `bind_buffers` called a second time
    #[error("Already bound: {0}")]
    AlreadyBound(String),

    /// Flex kernel executed before `bind_flex_scales`
    #[error("Flex scale not bound for flex id {0}")]
    FlexScaleUnbound(FlexId),

    // ========== Backend Errors ==========
    /// Description resolved before the allocator produced storage for it
    #[error("Tensor not allocated: {0}")]
    TensorNotAllocated(TensorId),

    /// Device memory allocation failed
    #[error("Device memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Kernel launch was rejected
    #[error("Kernel launch failed: {0}")]
    KernelLaunchFailed(String),

    /// An operation issued on the stream failed; reported at the next barrier
    #[error("Stream operation failed: {0}")]
    StreamFailed(String),

    /// Peer endpoint of a channel has gone away
    #[error("Channel closed")]
    ChannelClosed,

    /// Flex id not registered with the flex manager
    #[error("Unknown flex id: {0}")]
    UnknownFlexId(FlexId),

    // ========== Configuration Errors ==========
    /// Invalid runtime configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    // ========== Internal Errors ==========
    /// Internal error (indicates a bug)
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Lock poisoned (a stream operation or kernel panicked while holding it)
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl FlexForgeError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            FlexForgeError::MalformedDescriptor(_)
            | FlexForgeError::InvalidAxes(_)
            | FlexForgeError::InvalidItem(_)
            | FlexForgeError::InvalidOp(_)
            | FlexForgeError::ShapeMismatch { .. }
            | FlexForgeError::DTypeMismatch { .. }
            | FlexForgeError::NotAScalar(_)
            | FlexForgeError::UnsupportedDistribution(_)
            | FlexForgeError::MissingDistributionParam { .. }
            | FlexForgeError::InvalidConfiguration(_) => ErrorCategory::User,

            FlexForgeError::NotBound(_)
            | FlexForgeError::AlreadyBound(_)
            | FlexForgeError::FlexScaleUnbound(_)
            | FlexForgeError::TensorNotAllocated(_) => ErrorCategory::Lifecycle,

            FlexForgeError::AllocationFailed(_)
            | FlexForgeError::KernelLaunchFailed(_)
            | FlexForgeError::StreamFailed(_)
            | FlexForgeError::ChannelClosed
            | FlexForgeError::UnknownFlexId(_)
            | FlexForgeError::IoError(_) => ErrorCategory::Backend,

            FlexForgeError::InternalError(_) | FlexForgeError::LockPoisoned(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Check if this is a user-facing error (actionable by users)
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// Check if the owning computation broke construct/bind/execute ordering
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Lifecycle)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
///
/// - User: fix the graph, description or configuration
/// - Lifecycle: the owning computation called kernel phases out of order
/// - Backend: device, stream or channel failure
/// - Internal: log and report as bug
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    User,
    Lifecycle,
    Backend,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Lifecycle => write!(f, "Lifecycle"),
            ErrorCategory::Backend => write!(f, "Backend"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for FlexForgeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        FlexForgeError::LockPoisoned(err.to_string())
    }
}

/// Result type used throughout FlexForge
pub type ForgeResult<T> = std::result::Result<T, FlexForgeError>;

/// Create an internal error with context
///
/// ```ignore
/// return Err(internal_error!("stream worker exited early"));
/// ```
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::FlexForgeError::InternalError($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::FlexForgeError::InternalError(format!($fmt, $($arg)*))
    };
}

/// Create a malformed-description error with context
#[macro_export]
macro_rules! malformed {
    ($msg:expr) => {
        $crate::error::FlexForgeError::MalformedDescriptor($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::FlexForgeError::MalformedDescriptor(format!($fmt, $($arg)*))
    };
}
