//! # Taskforge
//!
//! Asynchronous task/cancellation primitive combined with a heterogeneous
//! execution engine: units of work run either across a background worker
//! boundary (message-passing, no shared memory) or on a GPU compute
//! pipeline, including an iterative multi-pass GPU mode with explicit
//! buffer lifecycle management.
//!
//! ## Design Goals
//! - Terminal, observe-only task settlement
//! - Cooperative, advisory cancellation flowing top-down through every layer
//! - Explicit resource lifecycle (no GPU buffer outlives its request)
//! - Safe, explicit error classification (faulted vs. canceled vs. misuse)

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;
pub mod gpu;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Core task types

pub use engine::task::{
    Task,
    TaskCompletionSource,
    TaskStatus,
};

pub use engine::cancellation::{
    CancellationSource,
    CancellationToken,
};

pub use engine::combinators::{
    for_async,
    invoke,
    parallel_for,
    run,
    when_all,
    when_any,
};

pub use engine::scheduler::FrameScheduler;

pub use engine::worker::{
    ActionRegistry,
    WorkerBridge,
    WorkerValue,
};

pub use engine::error::{
    CancellationError,
    ComputeError,
    FaultCause,
    InvariantViolation,
    ResultAccessError,
    TaskError,
    TaskResult,
    WorkerError,
};

pub use gpu::{
    ArgValue,
    GpuComputeEngine,
    GpuComputeRequest,
    GpuContext,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude (Optional but recommended)
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used task and compute types.
///
/// Import with:
/// ```rust
/// use taskforge::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        when_all,
        when_any,
        CancellationSource,
        CancellationToken,
        FrameScheduler,
        GpuComputeEngine,
        GpuComputeRequest,
        GpuContext,
        Task,
        TaskCompletionSource,
        TaskError,
        TaskResult,
        TaskStatus,
        WorkerBridge,
    };
}
