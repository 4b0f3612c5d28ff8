//! # GPU Compute Backend
//!
//! This module implements the **GPU execution backend** for the task
//! engine, running submitted compute requests as **compute shaders** via
//! `wgpu` and settling the caller's task with the deserialized readback.
//!
//! ## Design goals
//!
//! * Execute data-parallel workloads efficiently on the GPU
//! * Guarantee buffer cleanup on every exit path
//! * Provide explicit, deterministic error propagation
//! * Honor cooperative cancellation at every suspension point
//! * Avoid hidden synchronization or implicit global state
//!
//! ---
//!
//! ## High-level execution model
//!
//! GPU execution proceeds in **four explicit stages**:
//!
//! 1. **Upload**
//!    * Request inputs are copied into storage buffers; uniform payloads
//!      (per-dispatch parameters, packed arguments) into uniform buffers.
//!
//! 2. **Dispatch**
//!    * A compute pipeline is selected or created based on:
//!       - shader source (placeholder already substituted)
//!       - entry point
//!       - binding layout signature
//!    * Single-pass mode submits once; multi-pass mode submits once per
//!      pass, rewriting a loop-parameter uniform between submissions.
//!
//! 3. **Synchronization**
//!    * GPU execution is explicitly synchronized using `wgpu::Device::poll`
//!      while mapping the readback buffer.
//!
//! 4. **Readback**
//!    * The result buffer is copied into a map-readable buffer, sliced into
//!      owned bytes, and handed to the caller-supplied deserializer.
//!
//! ---
//!
//! ## Module structure
//!
//! * [`context`] — GPU device and queue acquisition
//! * [`args`] — alignment-correct argument-buffer packing
//! * [`request`] — the compute-request value object and its builder
//! * `pipeline` — compute pipeline creation and caching (crate-internal)
//! * [`engine`] — single-pass and multi-pass execution orchestration
//!
//! ---
//!
//! ## Safety and correctness
//!
//! Correctness relies on the following invariants:
//!
//! * Buffer uploads happen-before the dispatch that reads them
//! * Multi-pass pass *k* happens-before pass *k + 1* (per-pass submission)
//! * Every buffer is destroyed on every exit path, tracked by drop guards
//! * GPU errors are never ignored or silently suppressed
//! * Buffers are exclusively owned by the executing request and never
//!   shared across concurrent requests

pub mod args;
pub mod context;
pub mod engine;
pub(crate) mod pipeline;
pub mod request;

pub use args::{pack_argument_bytes, pack_argument_floats, ArgValue};
pub use context::GpuContext;
pub use engine::GpuComputeEngine;
pub use request::{
    Deserializer, GpuComputeRequest, GpuComputeRequestBuilder, GpuInput,
    WORKGROUP_SIZE_PLACEHOLDER,
};
