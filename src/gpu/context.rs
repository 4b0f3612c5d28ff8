//! # GPU Context
//!
//! Minimal, centralized abstraction for initializing and owning the GPU
//! device state used by the compute engine.
//!
//! ## Purpose
//! [`GpuContext`] encapsulates the creation and lifetime of:
//! * a [`wgpu::Device`],
//! * a corresponding [`wgpu::Queue`],
//! * and a snapshot of the device [`wgpu::Limits`] used for workgroup and
//!   dispatch sizing.
//!
//! ## Design philosophy
//!
//! * **Single point of GPU initialization**
//!   - All GPU access flows from a single `GpuContext` instance, injected
//!     into the engine rather than held in a module-level global.
//! * **Backend-agnostic**
//!   - Uses `wgpu` to remain portable across Vulkan, Metal, DX12, and WebGPU.
//! * **Explicit failure handling**
//!   - Adapter absence and device-request failures surface as distinct
//!     [`ComputeError`] variants; nothing panics.
//!
//! ## Concurrency model
//!
//! `wgpu::Device` and `wgpu::Queue` are internally thread-safe and cheap to
//! clone. Higher-level ordering (upload happens-before dispatch, pass *k*
//! happens-before pass *k+1*) is enforced by the engine, not by GPU locks.
//!
//! ## Failure modes
//!
//! Initialization may fail due to a missing compatible adapter, driver or
//! backend errors, or platform limitations. Adapter absence is
//! [`ComputeError::GpuUnavailable`]; everything after adapter selection is
//! [`ComputeError::DeviceRequestFailed`].

use wgpu::Instance;

use crate::engine::cancellation::CancellationToken;
use crate::engine::error::{ComputeError, FaultCause, TaskError, TaskResult};


/// Owned GPU execution context.
///
/// ## Role
/// Owns the low-level GPU objects required to execute compute workloads and
/// serves as a shared handle for the engine; cloning shares the underlying
/// device and queue.

#[derive(Debug, Clone)]
pub struct GpuContext {
    /// Logical GPU device.
    pub device: wgpu::Device,

    /// Submission queue.
    pub queue: wgpu::Queue,

    limits: wgpu::Limits,
}

impl GpuContext {
    /// Acquires an adapter and device, polling `token` between the two
    /// suspension points.
    ///
    /// ## Behavior
    /// 1. Creates a default `wgpu::Instance`.
    /// 2. Requests a high-performance adapter.
    /// 3. Creates a logical device and submission queue.
    ///
    /// The configuration intentionally requests no optional GPU features,
    /// default resource limits, and no tracing or experimental features for
    /// maximum compatibility across platforms.
    ///
    /// ## Errors
    /// * `Canceled` if the token fires before or between acquisitions.
    /// * [`ComputeError::GpuUnavailable`] if no compatible adapter exists.
    /// * [`ComputeError::DeviceRequestFailed`] if device creation fails.
    pub async fn acquire(token: &CancellationToken) -> TaskResult<Self> {
        token.throw_if_cancellation_requested()?;

        let instance = Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| ComputeError::GpuUnavailable {
                message: format!("{e:?}").into(),
            })?;

        token.throw_if_cancellation_requested()?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("taskforge_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| ComputeError::DeviceRequestFailed {
                message: format!("{e:?}").into(),
            })?;

        let limits = device.limits();
        tracing::debug!(
            max_workgroup_x = limits.max_compute_workgroup_size_x,
            max_dispatch = limits.max_compute_workgroups_per_dimension,
            "gpu context acquired"
        );

        Ok(GpuContext {
            device,
            queue,
            limits,
        })
    }

    /// Blocking acquisition for startup paths outside a runtime.
    ///
    /// ## Errors
    /// Same as [`GpuContext::acquire`], minus the cancellation case.
    pub fn acquire_blocking() -> Result<Self, ComputeError> {
        match pollster::block_on(Self::acquire(&CancellationToken::none())) {
            Ok(context) => Ok(context),
            Err(TaskError::Faulted(FaultCause::Compute(e))) => Err(e),
            Err(e) => Err(ComputeError::GpuUnavailable {
                message: e.to_string().into(),
            }),
        }
    }

    /// Largest power-of-two workgroup width supported by the device, capped
    /// at `cap`. Always at least 1.
    pub fn workgroup_size(&self, cap: u32) -> u32 {
        let bound = self
            .limits
            .max_compute_workgroup_size_x
            .min(self.limits.max_compute_invocations_per_workgroup)
            .min(cap)
            .max(1);
        // Largest power of two <= bound.
        1 << (31 - bound.leading_zeros())
    }

    /// Per-dimension dispatch limit used to clamp workgroup counts.
    pub fn max_workgroups_per_dimension(&self) -> u32 {
        self.limits.max_compute_workgroups_per_dimension
    }
}
