//! # GPU Compute Request Model
//!
//! Value object describing one compute invocation: shader source, entry
//! point, input buffers, optional uniform payloads, output sizing, and the
//! deserializer that turns readback bytes into the caller's type.
//!
//! ## Workgroup-size placeholder
//!
//! Shader source carries [`WORKGROUP_SIZE_PLACEHOLDER`] where the workgroup
//! width goes; the engine substitutes the device-derived value before
//! compilation, so one shader text serves every device.
//!
//! ## Validation
//!
//! Structural preconditions are checked at build time
//! ([`GpuComputeRequestBuilder::build`]) where possible, and at submission
//! time for mode-specific rules (the multi-pass power-of-two length check,
//! [`GpuComputeRequest::validate_multi_pass`]), always before any device
//! buffer is created.

use std::sync::Arc;

use crate::engine::cancellation::CancellationToken;
use crate::engine::error::InvariantViolation;


/// Placeholder substituted with the derived workgroup width.
pub const WORKGROUP_SIZE_PLACEHOLDER: &str = "{{workgroup_size}}";

/// Converts readback bytes into the caller's result type.
pub type Deserializer<T> = Arc<dyn Fn(&[u8]) -> Result<T, String> + Send + Sync>;

/// One storage-buffer input.

#[derive(Debug, Clone)]
pub struct GpuInput {
    /// Raw bytes uploaded into the buffer.
    pub data: Vec<u8>,

    /// Binding mode: `true` binds read-only storage, `false` read-write.
    pub read_only: bool,
}

/// Complete description of one compute invocation.
///
/// Construct via [`GpuComputeRequest::builder`]. The request is a plain
/// value: it holds no device resources and can be built, inspected, and
/// dropped freely before submission.

#[derive(Clone)]
pub struct GpuComputeRequest<T> {
    /// WGSL source containing [`WORKGROUP_SIZE_PLACEHOLDER`].
    pub shader_code: String,

    /// Compute entry-point function name.
    pub shader_entry: String,

    /// Storage-buffer inputs, bound at sequential indices in order.
    pub inputs: Vec<GpuInput>,

    /// Optional uniform payload bound after the output buffer.
    pub compute_params: Option<Vec<u8>>,

    /// Optional packed argument uniform bound last.
    pub argument_data: Option<Vec<u8>>,

    /// Output storage buffer size in bytes.
    pub output_size_in_bytes: u64,

    /// Logical element count (not a byte count).
    pub array_length: u32,

    /// Optional explicit dispatch dimensions; `None` derives a 1D dispatch
    /// from `array_length`.
    pub dimensions: Option<[u32; 3]>,

    /// Converts readback bytes into `T`.
    pub deserializer: Deserializer<T>,

    /// Cooperative cancellation signal polled between engine steps.
    pub token: CancellationToken,
}

impl<T> GpuComputeRequest<T> {
    /// Starts a builder for the given shader and deserializer.
    pub fn builder(
        shader_code: impl Into<String>,
        shader_entry: impl Into<String>,
        deserializer: Deserializer<T>,
    ) -> GpuComputeRequestBuilder<T> {
        GpuComputeRequestBuilder {
            shader_code: shader_code.into(),
            shader_entry: shader_entry.into(),
            inputs: Vec::new(),
            compute_params: None,
            argument_data: None,
            output_size_in_bytes: 0,
            array_length: 0,
            dimensions: None,
            deserializer,
            token: CancellationToken::none(),
        }
    }

    /// Mode-specific precondition for multi-pass execution.
    ///
    /// ## Errors
    /// [`InvariantViolation`] when `array_length` is not a power of two.
    /// The iterative pass network only terminates correctly on
    /// power-of-two sizes; a violation must fail loudly, never be rounded.
    pub fn validate_multi_pass(&self) -> Result<(), InvariantViolation> {
        if !self.array_length.is_power_of_two() {
            return Err(InvariantViolation {
                what: "array_length must be a power of two for multi-pass execution",
                details: format!("array_length = {}", self.array_length),
            });
        }
        Ok(())
    }
}

/// Builder enforcing structural preconditions before a request exists.

#[derive(Clone)]
pub struct GpuComputeRequestBuilder<T> {
    shader_code: String,
    shader_entry: String,
    inputs: Vec<GpuInput>,
    compute_params: Option<Vec<u8>>,
    argument_data: Option<Vec<u8>>,
    output_size_in_bytes: u64,
    array_length: u32,
    dimensions: Option<[u32; 3]>,
    deserializer: Deserializer<T>,
    token: CancellationToken,
}

impl<T> GpuComputeRequestBuilder<T> {
    /// Appends a storage-buffer input; binding order follows call order.
    pub fn input(mut self, data: Vec<u8>, read_only: bool) -> Self {
        self.inputs.push(GpuInput { data, read_only });
        self
    }

    /// Sets the per-dispatch uniform payload.
    pub fn compute_params(mut self, bytes: Vec<u8>) -> Self {
        self.compute_params = Some(bytes);
        self
    }

    /// Sets the packed argument uniform
    /// (see [`pack_argument_bytes`](crate::gpu::args::pack_argument_bytes)).
    pub fn argument_data(mut self, bytes: Vec<u8>) -> Self {
        self.argument_data = Some(bytes);
        self
    }

    /// Sets the output buffer size in bytes.
    pub fn output_size_in_bytes(mut self, size: u64) -> Self {
        self.output_size_in_bytes = size;
        self
    }

    /// Sets the logical element count.
    pub fn array_length(mut self, length: u32) -> Self {
        self.array_length = length;
        self
    }

    /// Overrides the derived 1D dispatch with explicit dimensions.
    pub fn dimensions(mut self, dims: [u32; 3]) -> Self {
        self.dimensions = Some(dims);
        self
    }

    /// Attaches a cancellation token.
    pub fn token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Finalizes the request.
    ///
    /// ## Errors
    /// [`InvariantViolation`] when:
    /// * `output_size_in_bytes` is zero,
    /// * `array_length` is zero,
    /// * the entry-point name is empty.
    pub fn build(self) -> Result<GpuComputeRequest<T>, InvariantViolation> {
        if self.output_size_in_bytes == 0 {
            return Err(InvariantViolation {
                what: "output_size_in_bytes must be non-zero",
                details: "requested a zero-byte output buffer".to_string(),
            });
        }
        if self.array_length == 0 {
            return Err(InvariantViolation {
                what: "array_length must be non-zero",
                details: "requested a dispatch over zero elements".to_string(),
            });
        }
        if self.shader_entry.is_empty() {
            return Err(InvariantViolation {
                what: "shader_entry must be non-empty",
                details: "no compute entry point named".to_string(),
            });
        }

        Ok(GpuComputeRequest {
            shader_code: self.shader_code,
            shader_entry: self.shader_entry,
            inputs: self.inputs,
            compute_params: self.compute_params,
            argument_data: self.argument_data,
            output_size_in_bytes: self.output_size_in_bytes,
            array_length: self.array_length,
            dimensions: self.dimensions,
            deserializer: self.deserializer,
            token: self.token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passthrough() -> Deserializer<Vec<u8>> {
        Arc::new(|bytes| Ok(bytes.to_vec()))
    }

    #[test]
    fn builder_rejects_zero_sized_output() {
        let request = GpuComputeRequest::builder("@compute fn main() {}", "main", passthrough())
            .array_length(4)
            .build();
        assert!(request.is_err());
    }

    #[test]
    fn builder_rejects_zero_array_length() {
        let request = GpuComputeRequest::builder("@compute fn main() {}", "main", passthrough())
            .output_size_in_bytes(16)
            .build();
        assert!(request.is_err());
    }

    #[test]
    fn multi_pass_requires_a_power_of_two_length() {
        let request = GpuComputeRequest::builder("@compute fn main() {}", "main", passthrough())
            .output_size_in_bytes(400)
            .array_length(100)
            .build()
            .unwrap();
        assert!(request.validate_multi_pass().is_err());

        let request = GpuComputeRequest::builder("@compute fn main() {}", "main", passthrough())
            .output_size_in_bytes(512)
            .array_length(128)
            .build()
            .unwrap();
        assert!(request.validate_multi_pass().is_ok());
    }
}
