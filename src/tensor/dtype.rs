//! Element types and their little-endian encodings.

use half::f16;
use serde::{Deserialize, Serialize};

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F64,
    F32,
    F16,
    I32,
    I16,
    I8,
    U8,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            DType::F64 => 8,
            DType::F32 | DType::I32 => 4,
            DType::F16 | DType::I16 => 2,
            DType::I8 | DType::U8 => 1,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F64 | DType::F32 | DType::F16)
    }

    /// Smallest and largest representable value, as f64.
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            DType::F64 => (f64::MIN, f64::MAX),
            DType::F32 => (f32::MIN as f64, f32::MAX as f64),
            DType::F16 => (f16::MIN.to_f64(), f16::MAX.to_f64()),
            DType::I32 => (i32::MIN as f64, i32::MAX as f64),
            DType::I16 => (i16::MIN as f64, i16::MAX as f64),
            DType::I8 => (i8::MIN as f64, i8::MAX as f64),
            DType::U8 => (u8::MIN as f64, u8::MAX as f64),
        }
    }

    /// Short name used in kernel names.
    pub fn name(&self) -> &'static str {
        match self {
            DType::F64 => "f64",
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::I32 => "i32",
            DType::I16 => "i16",
            DType::I8 => "i8",
            DType::U8 => "u8",
        }
    }

    /// Decode one element from `bytes` (exactly `self.size()` long).
    pub fn decode(&self, bytes: &[u8]) -> f64 {
        match self {
            DType::F64 => f64::from_le_bytes(bytes[..8].try_into().unwrap_or([0; 8])),
            DType::F32 => f32::from_le_bytes(bytes[..4].try_into().unwrap_or([0; 4])) as f64,
            DType::F16 => f16::from_le_bytes([bytes[0], bytes[1]]).to_f64(),
            DType::I32 => i32::from_le_bytes(bytes[..4].try_into().unwrap_or([0; 4])) as f64,
            DType::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            DType::I8 => bytes[0] as i8 as f64,
            DType::U8 => bytes[0] as f64,
        }
    }

    /// Encode `value` into `out` (exactly `self.size()` long).
    ///
    /// Integer targets truncate toward zero and saturate at the type bounds;
    /// NaN encodes as zero.
    pub fn encode(&self, value: f64, out: &mut [u8]) {
        match self {
            DType::F64 => out[..8].copy_from_slice(&value.to_le_bytes()),
            DType::F32 => out[..4].copy_from_slice(&(value as f32).to_le_bytes()),
            DType::F16 => out[..2].copy_from_slice(&f16::from_f64(value).to_le_bytes()),
            DType::I32 => out[..4].copy_from_slice(&(value as i32).to_le_bytes()),
            DType::I16 => out[..2].copy_from_slice(&(value as i16).to_le_bytes()),
            DType::I8 => out[0] = (value as i8) as u8,
            DType::U8 => out[0] = value as u8,
        }
    }

    /// Round-trip `value` through this type's storage.
    pub fn cast(&self, value: f64) -> f64 {
        let mut buf = [0u8; 8];
        self.encode(value, &mut buf);
        self.decode(&buf)
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
