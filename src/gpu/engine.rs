//! # GPU Compute Engine
//!
//! Executes [`GpuComputeRequest`]s against a [`GpuContext`], in one of two
//! modes:
//!
//! * **single-pass** — one dispatch, one submission, one readback;
//! * **multi-pass** — an iterative network of `stage * (stage + 1) / 2`
//!   dispatches over `log2(N)` stages (bitonic-style), rewriting a small
//!   loop-parameter uniform before every pass and submitting per pass so
//!   the uniform write for pass *k* completes before pass *k + 1* reads it.
//!
//! ## High-level execution flow
//!
//! For each submission:
//!
//! 1. Substitute the workgroup-size placeholder into the shader source.
//! 2. Upload each input into a storage buffer (read-only or read-write per
//!    its flag), bound at sequential indices.
//! 3. Build or reuse the pipeline for the request's binding shape.
//! 4. Dispatch `ceil(array_length / workgroup_x)` workgroups, clamped to
//!    the device's per-dimension limit.
//! 5. Copy the result into a dedicated map-readable buffer and submit.
//! 6. Destroy storage buffers as soon as the copy is enqueued; map the
//!    readback buffer; destroy uniforms and the readback buffer after the
//!    bytes are sliced out.
//! 7. Run the caller's deserializer over the owned bytes.
//!
//! ## Resource safety
//!
//! Every buffer the engine creates is tracked in a `BufferArena`; the
//! arena destroys whatever it still holds when dropped, so **no exit path
//! (success, fault, or cancellation) leaks a GPU buffer**. Explicit
//! `destroy_all` calls release buffers at the earliest provably-unused
//! point; the drop guard covers everything else.
//!
//! ## Cancellation
//!
//! The request token is polled before buffer setup, before each pass in
//! the multi-pass loop, and before mapping the readback buffer. Work
//! already submitted to the queue is not interrupted; cancellation
//! prevents new passes and new mappings.

use std::sync::{Arc, Mutex, MutexGuard};

use wgpu::util::DeviceExt;

use crate::engine::error::{ComputeError, InvariantViolation, TaskResult};
use crate::engine::task::Task;
use crate::gpu::context::GpuContext;
use crate::gpu::pipeline::{BindingLayout, PipelineCache};
use crate::gpu::request::{GpuComputeRequest, WORKGROUP_SIZE_PLACEHOLDER};


/// Default cap on the derived workgroup width.
const DEFAULT_WORKGROUP_CAP: u32 = 256;

/// Drop-guarded set of GPU buffers.
///
/// `wgpu::Buffer::destroy` is deferred by the backend until submitted work
/// using the buffer completes, so destroying immediately after a copy is
/// enqueued is safe on every backend.
struct BufferArena {
    buffers: Vec<wgpu::Buffer>,
}

impl BufferArena {
    fn new() -> Self {
        BufferArena {
            buffers: Vec::new(),
        }
    }

    /// Tracks `buffer` and hands back a working clone.
    fn track(&mut self, buffer: wgpu::Buffer) -> wgpu::Buffer {
        self.buffers.push(buffer.clone());
        buffer
    }

    /// Destroys every tracked buffer now.
    fn destroy_all(&mut self) {
        for buffer in self.buffers.drain(..) {
            buffer.destroy();
        }
    }

    /// Stops tracking without destroying; for buffers whose ownership moved
    /// into a consuming helper.
    fn forget(&mut self) {
        self.buffers.clear();
    }
}

impl Drop for BufferArena {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

/// Engine executing compute requests against one device.
///
/// Cloning shares the context and the pipeline cache.

#[derive(Clone)]
pub struct GpuComputeEngine {
    context: GpuContext,
    pipelines: Arc<Mutex<PipelineCache>>,
    workgroup_cap: u32,
}

impl GpuComputeEngine {
    /// Creates an engine over an acquired context.
    pub fn new(context: GpuContext) -> Self {
        GpuComputeEngine {
            context,
            pipelines: Arc::new(Mutex::new(PipelineCache::new())),
            workgroup_cap: DEFAULT_WORKGROUP_CAP,
        }
    }

    /// Overrides the default workgroup-width cap.
    pub fn with_workgroup_cap(mut self, cap: u32) -> Self {
        self.workgroup_cap = cap.max(1);
        self
    }

    /// The underlying context.
    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    fn pipelines(&self) -> MutexGuard<'_, PipelineCache> {
        self.pipelines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Submits a single-pass request; the returned task settles after
    /// readback and deserialization.
    pub fn submit<T>(&self, request: GpuComputeRequest<T>) -> Task<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let engine = self.clone();
        Task::spawn(async move { run_single_pass(engine, request).await })
    }

    /// Submits a multi-pass request.
    ///
    /// The power-of-two length invariant is checked synchronously, before
    /// any device buffer is created; a violation settles the returned task
    /// as `Faulted` with an [`InvariantViolation`] cause.
    pub fn submit_multi_pass<T>(&self, request: GpuComputeRequest<T>) -> Task<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        if let Err(violation) = request.validate_multi_pass() {
            return Task::faulted(violation.into());
        }
        let engine = self.clone();
        Task::spawn(async move { run_multi_pass(engine, request).await })
    }
}

fn create_storage_input(device: &wgpu::Device, data: &[u8]) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("taskforge_input"),
        contents: data,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
    })
}

/// Uniform contents are padded to at least 16 bytes so short payloads stay
/// bindable.
fn create_uniform(device: &wgpu::Device, data: &[u8]) -> wgpu::Buffer {
    let mut contents = data.to_vec();
    if contents.len() < 16 {
        contents.resize(16, 0);
    }
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("taskforge_uniform"),
        contents: &contents,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

fn create_readback(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("taskforge_readback"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn workgroup_count(context: &GpuContext, array_length: u32, workgroup_x: u32) -> u32 {
    array_length
        .div_ceil(workgroup_x.max(1))
        .clamp(1, context.max_workgroups_per_dimension())
}

fn encode_pass(
    device: &wgpu::Device,
    pipeline: &wgpu::ComputePipeline,
    bind_group: &wgpu::BindGroup,
    dims: [u32; 3],
) -> wgpu::CommandBuffer {
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("taskforge_compute_encoder"),
    });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("taskforge_compute_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(dims[0], dims[1], dims[2]);
    }
    encoder.finish()
}

/// Maps `buffer`, slices its contents into owned bytes, unmaps, and
/// destroys it. The buffer is destroyed on the error paths too.
async fn read_back(
    context: &GpuContext,
    buffer: wgpu::Buffer,
    submission: wgpu::SubmissionIndex,
) -> Result<Vec<u8>, ComputeError> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    buffer.slice(..).map_async(wgpu::MapMode::Read, move |outcome| {
        let _ = tx.send(outcome);
    });

    // Drive the device until the submission and the map request complete.
    if let Err(e) = context.device.poll(wgpu::PollType::Wait {
        submission_index: Some(submission),
        timeout: None,
    }) {
        buffer.destroy();
        return Err(ComputeError::PollFailed {
            message: format!("{e:?}").into(),
        });
    }

    match rx.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            buffer.destroy();
            return Err(ComputeError::ReadbackFailed {
                message: format!("{e:?}").into(),
            });
        }
        Err(_) => {
            buffer.destroy();
            return Err(ComputeError::ReadbackFailed {
                message: "map callback dropped before completion".into(),
            });
        }
    }

    let bytes = buffer.slice(..).get_mapped_range().to_vec();
    buffer.unmap();
    buffer.destroy();
    Ok(bytes)
}

async fn run_single_pass<T>(engine: GpuComputeEngine, request: GpuComputeRequest<T>) -> TaskResult<T>
where
    T: Clone + Send + Sync + 'static,
{
    let token = request.token.clone();
    token.throw_if_cancellation_requested()?;

    let device = &engine.context.device;
    let workgroup_x = engine.context.workgroup_size(engine.workgroup_cap);
    let shader = request
        .shader_code
        .replace(WORKGROUP_SIZE_PLACEHOLDER, &workgroup_x.to_string());

    let mut storage = BufferArena::new();
    let mut uniforms = BufferArena::new();
    let mut readback_arena = BufferArena::new();

    let input_buffers: Vec<wgpu::Buffer> = request
        .inputs
        .iter()
        .map(|input| storage.track(create_storage_input(device, &input.data)))
        .collect();
    let output = storage.track(device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("taskforge_output"),
        size: request.output_size_in_bytes,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    }));
    let params_buffer = request
        .compute_params
        .as_deref()
        .map(|bytes| uniforms.track(create_uniform(device, bytes)));
    let args_buffer = request
        .argument_data
        .as_deref()
        .map(|bytes| uniforms.track(create_uniform(device, bytes)));

    token.throw_if_cancellation_requested()?;

    let layout = BindingLayout {
        input_read_only: request.inputs.iter().map(|i| i.read_only).collect(),
        has_output: true,
        has_params: params_buffer.is_some(),
        has_args: args_buffer.is_some(),
    };
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let (pipeline, bgl) =
        engine
            .pipelines()
            .get_or_create(&engine.context, &shader, &request.shader_entry, &layout);
    if let Some(e) = device.pop_error_scope().await {
        return Err(ComputeError::PipelineCreationFailed {
            message: e.to_string().into(),
        }
        .into());
    }

    let mut entries: Vec<wgpu::BindGroupEntry> = Vec::with_capacity(layout.binding_count());
    let mut binding: u32 = 0;
    for buffer in &input_buffers {
        entries.push(wgpu::BindGroupEntry {
            binding,
            resource: buffer.as_entire_binding(),
        });
        binding += 1;
    }
    entries.push(wgpu::BindGroupEntry {
        binding,
        resource: output.as_entire_binding(),
    });
    binding += 1;
    for buffer in params_buffer.iter().chain(args_buffer.iter()) {
        entries.push(wgpu::BindGroupEntry {
            binding,
            resource: buffer.as_entire_binding(),
        });
        binding += 1;
    }

    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("taskforge_bind_group"),
        layout: &bgl,
        entries: &entries,
    });

    let dims = request.dimensions.unwrap_or([
        workgroup_count(&engine.context, request.array_length, workgroup_x),
        1,
        1,
    ]);
    tracing::debug!(
        entry = %request.shader_entry,
        elements = request.array_length,
        workgroup_x,
        groups = dims[0],
        "single-pass dispatch"
    );

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("taskforge_compute_encoder"),
    });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("taskforge_compute_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(dims[0], dims[1], dims[2]);
    }
    let readback = readback_arena.track(create_readback(device, request.output_size_in_bytes));
    encoder.copy_buffer_to_buffer(&output, 0, &readback, 0, request.output_size_in_bytes);
    let submission = engine.context.queue.submit(Some(encoder.finish()));

    // The copy is enqueued; nothing downstream reads these again.
    storage.destroy_all();
    uniforms.destroy_all();

    token.throw_if_cancellation_requested()?;

    let bytes = read_back(&engine.context, readback, submission).await?;
    readback_arena.forget();

    let value = (request.deserializer)(&bytes).map_err(|message| ComputeError::DeserializeFailed {
        message: message.into(),
    })?;
    Ok(value)
}

/// Loop parameters rewritten before every multi-pass dispatch.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct PassParams {
    stage: u32,
    step: u32,
    n: u32,
    _reserved: u32,
}

async fn run_multi_pass<T>(engine: GpuComputeEngine, request: GpuComputeRequest<T>) -> TaskResult<T>
where
    T: Clone + Send + Sync + 'static,
{
    let token = request.token.clone();
    token.throw_if_cancellation_requested()?;

    let n = request.array_length;
    let stages = n.trailing_zeros();

    let device = &engine.context.device;
    let queue = &engine.context.queue;
    let workgroup_x = engine.context.workgroup_size(engine.workgroup_cap);
    let shader = request
        .shader_code
        .replace(WORKGROUP_SIZE_PLACEHOLDER, &workgroup_x.to_string());

    let mut storage = BufferArena::new();
    let mut uniforms = BufferArena::new();
    let mut readback_arena = BufferArena::new();

    // The primary buffer is read and written across all passes and is the
    // source of the final readback copy.
    let primary_index = request
        .inputs
        .iter()
        .position(|input| !input.read_only)
        .ok_or_else(|| InvariantViolation {
            what: "multi-pass execution requires a read-write input",
            details: format!(
                "all {} inputs are read-only",
                request.inputs.len()
            ),
        })?;

    let input_buffers: Vec<wgpu::Buffer> = request
        .inputs
        .iter()
        .map(|input| storage.track(create_storage_input(device, &input.data)))
        .collect();
    let primary = input_buffers[primary_index].clone();

    let loop_params = uniforms.track(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("taskforge_loop_params"),
        contents: bytemuck::bytes_of(&PassParams {
            stage: 0,
            step: 0,
            n,
            _reserved: 0,
        }),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    }));
    let args_buffer = request
        .argument_data
        .as_deref()
        .map(|bytes| uniforms.track(create_uniform(device, bytes)));

    // The loop-parameter uniform occupies the parameter slot; there is no
    // separate output buffer, the primary input doubles as the output.
    let layout = BindingLayout {
        input_read_only: request.inputs.iter().map(|i| i.read_only).collect(),
        has_output: false,
        has_params: true,
        has_args: args_buffer.is_some(),
    };
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let (pipeline, bgl) =
        engine
            .pipelines()
            .get_or_create(&engine.context, &shader, &request.shader_entry, &layout);
    if let Some(e) = device.pop_error_scope().await {
        return Err(ComputeError::PipelineCreationFailed {
            message: e.to_string().into(),
        }
        .into());
    }

    let mut entries: Vec<wgpu::BindGroupEntry> = Vec::with_capacity(layout.binding_count());
    let mut binding: u32 = 0;
    for buffer in &input_buffers {
        entries.push(wgpu::BindGroupEntry {
            binding,
            resource: buffer.as_entire_binding(),
        });
        binding += 1;
    }
    entries.push(wgpu::BindGroupEntry {
        binding,
        resource: loop_params.as_entire_binding(),
    });
    binding += 1;
    if let Some(buffer) = &args_buffer {
        entries.push(wgpu::BindGroupEntry {
            binding,
            resource: buffer.as_entire_binding(),
        });
    }

    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("taskforge_bind_group"),
        layout: &bgl,
        entries: &entries,
    });

    let groups = workgroup_count(&engine.context, n, workgroup_x);
    tracing::debug!(
        entry = %request.shader_entry,
        elements = n,
        stages,
        groups,
        "multi-pass dispatch"
    );

    // One submission per pass: the uniform write for pass k lands on the
    // queue timeline before the dispatch of pass k, and before the write
    // for pass k+1.
    for stage in 1..=stages {
        for step in (1..=stage).rev() {
            token.throw_if_cancellation_requested()?;
            queue.write_buffer(
                &loop_params,
                0,
                bytemuck::bytes_of(&PassParams {
                    stage,
                    step,
                    n,
                    _reserved: 0,
                }),
            );
            let commands = encode_pass(device, &pipeline, &bind_group, [groups, 1, 1]);
            queue.submit(Some(commands));
        }
    }

    let readback = readback_arena.track(create_readback(device, request.output_size_in_bytes));
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("taskforge_readback_encoder"),
    });
    encoder.copy_buffer_to_buffer(&primary, 0, &readback, 0, request.output_size_in_bytes);
    let submission = queue.submit(Some(encoder.finish()));

    // Storage is provably unused once the copy is enqueued; uniforms and
    // the readback buffer go after mapping.
    storage.destroy_all();

    token.throw_if_cancellation_requested()?;

    let bytes = read_back(&engine.context, readback, submission).await?;
    readback_arena.forget();
    uniforms.destroy_all();

    let value = (request.deserializer)(&bytes).map_err(|message| ComputeError::DeserializeFailed {
        message: message.into(),
    })?;
    Ok(value)
}
