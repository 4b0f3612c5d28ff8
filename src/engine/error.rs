//! Error types for the task runtime and the compute backends.
//!
//! This module declares focused, composable error types used across the task
//! primitive, the worker bridge, and the GPU compute engine. Each error
//! carries enough context to make failures actionable while remaining small
//! and cheap to pass around or convert into the aggregate [`TaskError`].
//!
//! ## Goals
//! * **Specificity:** Each error type models a single failure mode (e.g. a
//!   missing GPU adapter, an unknown worker action, a violated size
//!   invariant).
//! * **Ergonomics:** All errors implement [`std::error::Error`] and
//!   [`fmt::Display`], and provide `From<T>` conversions into [`TaskError`].
//! * **Classification:** The runtime distinguishes three failure kinds:
//!   *faulted* (a real error), *canceled* (a cooperative cancellation
//!   signal), and *invariant violation* (caller misuse detected before any
//!   device work begins). The kind is carried structurally, never inferred
//!   from message text.
//!
//! ## Typical flow
//! Low-level backend operations return small, dedicated error types (e.g.
//! [`ComputeError`]). Orchestration code uses `?` to bubble failures into
//! [`TaskError`], which settles the owning task as either `Faulted` or
//! `Canceled` depending on whether the cause wraps a [`CancellationError`].
//!
//! ## Display vs. Debug
//! * [`fmt::Display`] is optimized for operator logs (short, imperative
//!   phrasing).
//! * [`fmt::Debug`] (derived) retains full structure for diagnostics.

use std::fmt;


/// The distinguishable cancellation cause.
///
/// Raised by cooperative poll points ([`throw_if_cancellation_requested`])
/// and by cancellation callbacks settling a pending operation. Any error
/// that wraps this type classifies the owning task as `Canceled` rather
/// than `Faulted`.
///
/// [`throw_if_cancellation_requested`]:
/// crate::engine::cancellation::CancellationToken::throw_if_cancellation_requested

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CancellationError;

impl fmt::Display for CancellationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation was canceled")
    }
}

impl std::error::Error for CancellationError {}

/// Returned when a caller-supplied value breaks a structural precondition.
///
/// ## Context
/// Raised synchronously, before any device or worker activity, wherever the
/// violation is detectable up front: a non-power-of-two element count for
/// multi-pass execution, a zero-sized output buffer, an empty racing set.
///
/// ## Fields
/// * `what` — the violated precondition, stable and matchable.
/// * `details` — the offending value, for logs.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// The violated precondition (e.g. `"array_length must be a power of two"`).
    pub what: &'static str,

    /// Offending value rendered for diagnostics.
    pub details: String,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invariant violated: {} ({})", self.what, self.details)
    }
}

impl std::error::Error for InvariantViolation {}

/// Failure modes of the GPU compute backend.
///
/// Every variant carries a backend-provided message; the variant itself
/// identifies the failing stage so callers can match on structure.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeError {
    /// No compatible GPU adapter was found.
    GpuUnavailable {
        /// Backend diagnostic.
        message: Box<str>,
    },

    /// Adapter was found but logical device creation failed.
    DeviceRequestFailed {
        /// Backend diagnostic.
        message: Box<str>,
    },

    /// Compute pipeline or bind group layout creation failed.
    PipelineCreationFailed {
        /// Backend diagnostic.
        message: Box<str>,
    },

    /// Mapping or reading the readback buffer failed.
    ReadbackFailed {
        /// Backend diagnostic.
        message: Box<str>,
    },

    /// Waiting on a submitted command buffer failed.
    PollFailed {
        /// Backend diagnostic.
        message: Box<str>,
    },

    /// The caller-supplied deserializer rejected the readback bytes.
    DeserializeFailed {
        /// Deserializer diagnostic.
        message: Box<str>,
    },
}

impl fmt::Display for ComputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeError::GpuUnavailable { message } => {
                write!(f, "no compatible gpu adapter: {message}")
            }
            ComputeError::DeviceRequestFailed { message } => {
                write!(f, "gpu device request failed: {message}")
            }
            ComputeError::PipelineCreationFailed { message } => {
                write!(f, "compute pipeline creation failed: {message}")
            }
            ComputeError::ReadbackFailed { message } => {
                write!(f, "readback buffer mapping failed: {message}")
            }
            ComputeError::PollFailed { message } => {
                write!(f, "gpu poll failed: {message}")
            }
            ComputeError::DeserializeFailed { message } => {
                write!(f, "result deserialization failed: {message}")
            }
        }
    }
}

impl std::error::Error for ComputeError {}

/// Failure modes of the worker bridge.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The dispatched action name is not present in the worker's registry.
    UnknownAction {
        /// The unmatched action name.
        name: String,
    },

    /// An action with this name is already registered.
    DuplicateAction {
        /// The colliding action name.
        name: String,
    },

    /// The channel to or from the worker is closed; the bridge is unusable.
    ChannelClosed,

    /// The worker-side handler reported an error.
    Remote {
        /// Handler-provided diagnostic.
        message: String,
    },

    /// The request or response envelope could not be serialized.
    Envelope {
        /// Serializer diagnostic.
        message: String,
    },
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::UnknownAction { name } => write!(f, "unknown worker action: {name}"),
            WorkerError::DuplicateAction { name } => {
                write!(f, "worker action already registered: {name}")
            }
            WorkerError::ChannelClosed => f.write_str("worker channel closed"),
            WorkerError::Remote { message } => write!(f, "worker-side failure: {message}"),
            WorkerError::Envelope { message } => {
                write!(f, "envelope serialization failed: {message}")
            }
        }
    }
}

impl std::error::Error for WorkerError {}

/// Returned when [`Task::result`](crate::engine::task::Task::result) is read
/// at the wrong time or on the wrong terminal state.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultAccessError {
    /// The task has not reached a terminal state yet.
    NotSettled,

    /// The task faulted; the captured cause is attached.
    Faulted(FaultCause),

    /// The task was canceled.
    Canceled,
}

impl fmt::Display for ResultAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultAccessError::NotSettled => f.write_str("task has not settled yet"),
            ResultAccessError::Faulted(cause) => write!(f, "task faulted: {cause}"),
            ResultAccessError::Canceled => f.write_str("task was canceled"),
        }
    }
}

impl std::error::Error for ResultAccessError {}

/// The structured cause behind a faulted task.
///
/// Keeps the originating subsystem matchable instead of erasing everything
/// into a string.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultCause {
    /// GPU compute backend failure.
    Compute(ComputeError),

    /// Worker bridge failure.
    Worker(WorkerError),

    /// A structural precondition was violated.
    Invariant(InvariantViolation),

    /// Any other failure, carried as text.
    Other(Box<str>),
}

impl fmt::Display for FaultCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultCause::Compute(e) => write!(f, "{e}"),
            FaultCause::Worker(e) => write!(f, "{e}"),
            FaultCause::Invariant(e) => write!(f, "{e}"),
            FaultCause::Other(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for FaultCause {}

/// Aggregate failure observed through a settled task.
///
/// ## Classification
/// * `Canceled` — the cause is (or wraps) a [`CancellationError`].
/// * `Faulted` — everything else.
///
/// Callers distinguish the two via [`TaskError::is_canceled`] or by
/// matching, never by inspecting message text.
///
/// ### Example
/// ```ignore
/// match task.join().await {
///     Ok(value) => { /* … */ }
///     Err(e) if e.is_canceled() => { /* cooperative stop, not a failure */ }
///     Err(e) => tracing::error!("compute failed: {e}"),
/// }
/// ```

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The operation observed a cancellation signal.
    Canceled(CancellationError),

    /// The operation failed for a non-cancellation reason.
    Faulted(FaultCause),
}

impl TaskError {
    /// Builds a faulted error from free-form text.
    pub fn other(message: impl Into<String>) -> Self {
        TaskError::Faulted(FaultCause::Other(message.into().into_boxed_str()))
    }

    /// Returns `true` when the failure kind is cancellation.
    #[inline]
    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskError::Canceled(_))
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Canceled(e) => write!(f, "{e}"),
            TaskError::Faulted(cause) => write!(f, "{cause}"),
        }
    }
}

impl std::error::Error for TaskError {}

impl From<CancellationError> for TaskError {
    fn from(e: CancellationError) -> Self {
        TaskError::Canceled(e)
    }
}

impl From<ComputeError> for TaskError {
    fn from(e: ComputeError) -> Self {
        TaskError::Faulted(FaultCause::Compute(e))
    }
}

impl From<WorkerError> for TaskError {
    fn from(e: WorkerError) -> Self {
        TaskError::Faulted(FaultCause::Worker(e))
    }
}

impl From<InvariantViolation> for TaskError {
    fn from(e: InvariantViolation) -> Self {
        TaskError::Faulted(FaultCause::Invariant(e))
    }
}

/// Convenience alias used by every settling operation in the crate.
pub type TaskResult<T> = Result<T, TaskError>;
