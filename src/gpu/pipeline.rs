//! # GPU Compute Pipeline Cache
//!
//! Creates, stores, and reuses `wgpu::ComputePipeline` objects and their
//! associated `BindGroupLayout`s.
//!
//! ## Purpose
//!
//! * each distinct (shader, entry point, binding layout) triple is compiled
//!   **at most once** per engine,
//! * pipelines are reused across submissions,
//! * bind group layouts remain stable and compatible with request shapes.
//!
//! The cache key hashes the substituted shader source, the entry point, and
//! the binding signature, so two requests with the same shader but a
//! different input count or read-only pattern compile separate pipelines.
//!
//! ---
//!
//! ## Binding model
//!
//! Pipelines created by this module follow a strict binding convention,
//! assigned in order within bind group 0:
//!
//! 1. one storage buffer per request input (read-only per its flag),
//! 2. one read-write storage buffer for the output, when present,
//! 3. one uniform buffer for per-dispatch parameters, when present
//!    (multi-pass execution binds its loop-parameter uniform in this slot),
//! 4. one uniform buffer for packed argument data, when present.
//!
//! ---
//!
//! ## Thread safety
//!
//! The cache is not thread-safe by itself; the engine wraps it in a mutex.

use std::collections::HashMap;

use crate::gpu::context::GpuContext;


#[inline]
pub(crate) fn hash_str(s: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut h);
    h.finish()
}

/// Binding shape of one request, independent of buffer contents.

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BindingLayout {
    /// Read-only flag per input, in binding order.
    pub input_read_only: Vec<bool>,

    /// Whether a dedicated read-write output buffer is bound.
    pub has_output: bool,

    /// Whether a per-dispatch parameter uniform is bound.
    pub has_params: bool,

    /// Whether a packed argument uniform is bound.
    pub has_args: bool,
}

impl BindingLayout {
    /// Total number of bind group entries.
    pub fn binding_count(&self) -> usize {
        self.input_read_only.len()
            + usize::from(self.has_output)
            + usize::from(self.has_params)
            + usize::from(self.has_args)
    }

    /// FNV-1a over the layout flags.
    fn signature(&self) -> u64 {
        let mut hash: u64 = 1469598103934665603;
        let mut mix = |bit: bool| {
            hash ^= u64::from(bit) + 2;
            hash = hash.wrapping_mul(1099511628211);
        };
        for &read_only in &self.input_read_only {
            mix(read_only);
        }
        mix(self.has_output);
        mix(self.has_params);
        mix(self.has_args);
        hash ^= self.input_read_only.len() as u64;
        hash.wrapping_mul(1099511628211)
    }
}

/// Cache of compute pipelines and their bind group layouts.
///
/// ## Design
/// * One pipeline per (shader, entry, layout) triple
/// * Pipelines are created lazily on first use
/// * Layouts are stored alongside pipelines to guarantee compatibility

#[derive(Debug, Default)]
pub(crate) struct PipelineCache {
    map: HashMap<(u64, u64, u64), (wgpu::ComputePipeline, wgpu::BindGroupLayout)>,
}

impl PipelineCache {
    /// Creates an empty pipeline cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieves an existing compute pipeline or creates a new one.
    ///
    /// `shader_wgsl` must be the **substituted** source (workgroup-size
    /// placeholder already resolved); the hash covers the final text.
    /// Returned handles are cheap clones of the cached objects.
    pub fn get_or_create(
        &mut self,
        context: &GpuContext,
        shader_wgsl: &str,
        entry_point: &str,
        layout: &BindingLayout,
    ) -> (wgpu::ComputePipeline, wgpu::BindGroupLayout) {
        let key = (hash_str(shader_wgsl), hash_str(entry_point), layout.signature());

        if !self.map.contains_key(&key) {
            tracing::debug!(
                entry = entry_point,
                bindings = layout.binding_count(),
                "compiling compute pipeline"
            );
            let created = create_pipeline(context, shader_wgsl, entry_point, layout);
            self.map.insert(key, created);
        }

        let (pipeline, bgl) = &self.map[&key];
        (pipeline.clone(), bgl.clone())
    }
}

/// Creates a compute pipeline and its bind group layout following the
/// module-level binding convention.
fn create_pipeline(
    context: &GpuContext,
    shader_wgsl: &str,
    entry_point: &str,
    layout: &BindingLayout,
) -> (wgpu::ComputePipeline, wgpu::BindGroupLayout) {
    let mut entries = Vec::with_capacity(layout.binding_count());
    let mut binding: u32 = 0;

    for &read_only in &layout.input_read_only {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
        binding += 1;
    }

    if layout.has_output {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
        binding += 1;
    }

    for _ in 0..usize::from(layout.has_params) + usize::from(layout.has_args) {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
        binding += 1;
    }

    let bgl = context
        .device
        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("taskforge_bgl"),
            entries: &entries,
        });

    let pipeline_layout = context
        .device
        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("taskforge_pipeline_layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

    let module = context
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("taskforge_shader"),
            source: wgpu::ShaderSource::Wgsl(shader_wgsl.into()),
        });

    let pipeline = context
        .device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("taskforge_compute_pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some(entry_point),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

    (pipeline, bgl)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_signatures_distinguish_shapes() {
        let a = BindingLayout {
            input_read_only: vec![true, false],
            has_output: true,
            has_params: true,
            has_args: false,
        };
        let b = BindingLayout {
            input_read_only: vec![false, true],
            has_output: true,
            has_params: true,
            has_args: false,
        };
        let c = BindingLayout {
            input_read_only: vec![true, false],
            has_output: true,
            has_params: false,
            has_args: true,
        };
        assert_ne!(a.signature(), b.signature());
        assert_ne!(a.signature(), c.signature());
        assert_eq!(a.signature(), a.clone().signature());
    }

    #[test]
    fn binding_count_covers_every_slot() {
        let layout = BindingLayout {
            input_read_only: vec![true, true, false],
            has_output: true,
            has_params: true,
            has_args: true,
        };
        assert_eq!(layout.binding_count(), 6);
    }
}
