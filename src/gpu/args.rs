//! # GPU Argument-Buffer Packer
//!
//! Schema-driven packer producing uniform-buffer bytes with the alignment
//! GPU uniform blocks require.
//!
//! ## Layout rules
//!
//! The packer walks the ordered schema with a running offset measured in
//! 4-byte float units:
//!
//! * scalars (`int`, `uint`, `float`) align to 1 float,
//! * `vec2` aligns to 2 floats,
//! * `vec3`, `vec4` and all matrices align to 4 floats (16 bytes),
//! * `vec3` is padded **after** writing up to 4 floats,
//! * matrices are padded after writing up to the next 4-float boundary
//!   (`mat3` occupies 12 floats),
//! * the total buffer length is rounded up to a 4-float multiple.
//!
//! Layout is deterministic and order-dependent: field order in the schema
//! *is* the layout order, and must match the shader-side struct
//! declaration. The packer, not the caller, owns alignment correctness;
//! a misaligned uniform silently corrupts shader reads.
//!
//! Integer fields are stored as raw bit patterns inside the float buffer;
//! the shader reads them back with a bitcast.

use crate::engine::error::InvariantViolation;


/// One typed field value in an argument schema.

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// 32-bit signed integer, bit-cast into the float buffer.
    Int(i32),
    /// 32-bit unsigned integer, bit-cast into the float buffer.
    Uint(u32),
    /// 32-bit float.
    Float(f32),
    /// Two-component vector.
    Vec2([f32; 2]),
    /// Three-component vector; occupies 4 floats in the packed layout.
    Vec3([f32; 3]),
    /// Four-component vector.
    Vec4([f32; 4]),
    /// Column-major 2x2 matrix.
    Mat2([f32; 4]),
    /// Column-major 3x3 matrix; occupies 12 floats in the packed layout.
    Mat3([f32; 9]),
    /// Column-major 4x4 matrix.
    Mat4([f32; 16]),
}

impl ArgValue {
    /// Alignment of this field, in float units.
    fn alignment_in_floats(&self) -> usize {
        match self {
            ArgValue::Int(_) | ArgValue::Uint(_) | ArgValue::Float(_) => 1,
            ArgValue::Vec2(_) => 2,
            _ => 4,
        }
    }

    /// Appends the raw component values, without padding.
    fn write_into(&self, out: &mut Vec<f32>) {
        match self {
            ArgValue::Int(v) => out.push(f32::from_bits(*v as u32)),
            ArgValue::Uint(v) => out.push(f32::from_bits(*v)),
            ArgValue::Float(v) => out.push(*v),
            ArgValue::Vec2(v) => out.extend_from_slice(v),
            ArgValue::Vec3(v) => out.extend_from_slice(v),
            ArgValue::Vec4(v) => out.extend_from_slice(v),
            ArgValue::Mat2(v) => out.extend_from_slice(v),
            ArgValue::Mat3(v) => out.extend_from_slice(v),
            ArgValue::Mat4(v) => out.extend_from_slice(v),
        }
    }

    /// Whether the field is padded up to a 4-float boundary after writing.
    fn pads_after(&self) -> bool {
        matches!(
            self,
            ArgValue::Vec3(_) | ArgValue::Mat2(_) | ArgValue::Mat3(_) | ArgValue::Mat4(_)
        )
    }
}

fn pad_to(out: &mut Vec<f32>, multiple: usize) {
    while out.len() % multiple != 0 {
        out.push(0.0);
    }
}

/// Packs an ordered field schema into float units.
///
/// Pure and deterministic: the same schema always yields the same layout.
/// Field names are carried for diagnostics only; they never affect layout.
///
/// ## Errors
/// An empty schema is an [`InvariantViolation`]: a zero-length uniform
/// buffer cannot be bound.
pub fn pack_argument_floats(
    fields: &[(&str, ArgValue)],
) -> Result<Vec<f32>, InvariantViolation> {
    if fields.is_empty() {
        return Err(InvariantViolation {
            what: "argument schema must not be empty",
            details: "received zero fields".to_string(),
        });
    }

    let mut out: Vec<f32> = Vec::new();
    for (name, value) in fields {
        pad_to(&mut out, value.alignment_in_floats());
        tracing::trace!(field = *name, offset = out.len(), "packing argument field");
        value.write_into(&mut out);
        if value.pads_after() {
            pad_to(&mut out, 4);
        }
    }
    pad_to(&mut out, 4);
    Ok(out)
}

/// Packs an ordered field schema into uniform-buffer bytes.
///
/// The byte length is always a 16-byte multiple.
pub fn pack_argument_bytes(
    fields: &[(&str, ArgValue)],
) -> Result<Vec<u8>, InvariantViolation> {
    let floats = pack_argument_floats(fields)?;
    Ok(bytemuck::cast_slice(&floats).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_is_padded_to_four_floats() {
        let packed =
            pack_argument_floats(&[("a", ArgValue::Vec3([1.0, 2.0, 3.0]))]).unwrap();
        assert_eq!(packed, vec![1.0, 2.0, 3.0, 0.0]);
    }

    #[test]
    fn scalar_after_vec3_starts_a_new_block() {
        let packed = pack_argument_floats(&[
            ("a", ArgValue::Vec3([1.0, 2.0, 3.0])),
            ("b", ArgValue::Float(4.0)),
        ])
        .unwrap();
        // a occupies [0..4), b lands at 4, total rounded to the next
        // 16-byte multiple.
        assert_eq!(packed, vec![1.0, 2.0, 3.0, 0.0, 4.0, 0.0, 0.0, 0.0]);
        assert_eq!((packed.len() * 4) % 16, 0);
    }

    #[test]
    fn vec2_aligns_to_two_floats() {
        let packed = pack_argument_floats(&[
            ("a", ArgValue::Float(1.0)),
            ("b", ArgValue::Vec2([2.0, 3.0])),
        ])
        .unwrap();
        assert_eq!(packed, vec![1.0, 0.0, 2.0, 3.0]);
    }

    #[test]
    fn vec4_after_scalar_skips_to_a_sixteen_byte_boundary() {
        let packed = pack_argument_floats(&[
            ("a", ArgValue::Float(1.0)),
            ("b", ArgValue::Vec4([2.0, 3.0, 4.0, 5.0])),
        ])
        .unwrap();
        assert_eq!(packed, vec![1.0, 0.0, 0.0, 0.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn mat3_occupies_twelve_floats() {
        let m = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let packed = pack_argument_floats(&[
            ("m", ArgValue::Mat3(m)),
            ("tail", ArgValue::Float(10.0)),
        ])
        .unwrap();
        assert_eq!(packed.len(), 16);
        assert_eq!(&packed[..9], &m);
        assert_eq!(packed[9..12], [0.0, 0.0, 0.0]);
        assert_eq!(packed[12], 10.0);
    }

    #[test]
    fn integers_round_trip_through_bit_patterns() {
        let packed = pack_argument_floats(&[
            ("count", ArgValue::Uint(7)),
            ("offset", ArgValue::Int(-3)),
        ])
        .unwrap();
        assert_eq!(packed[0].to_bits(), 7);
        assert_eq!(packed[1].to_bits() as i32, -3);
    }

    #[test]
    fn byte_length_is_always_a_sixteen_byte_multiple() {
        let schemas: Vec<Vec<(&str, ArgValue)>> = vec![
            vec![("a", ArgValue::Float(1.0))],
            vec![("a", ArgValue::Vec2([1.0, 2.0])), ("b", ArgValue::Float(3.0))],
            vec![
                ("a", ArgValue::Mat4([0.5; 16])),
                ("b", ArgValue::Vec3([1.0, 2.0, 3.0])),
                ("c", ArgValue::Int(9)),
            ],
        ];
        for schema in &schemas {
            let bytes = pack_argument_bytes(schema).unwrap();
            assert_eq!(bytes.len() % 16, 0);
            assert!(bytes.len() >= 16);
        }
    }

    #[test]
    fn empty_schema_is_rejected() {
        assert!(pack_argument_floats(&[]).is_err());
    }
}
