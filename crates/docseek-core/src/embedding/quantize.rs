//! Lightweight vector quantization for cached embeddings.
//!
//! | precision | stored as | transform                          |
//! |-----------|-----------|------------------------------------|
//! | `fp32`    | `f32`     | none                               |
//! | `fp16`    | `f32`     | rounded to 4 decimal places        |
//! | `int8`    | `i8`      | `round(x · 127)` clamped to ±127   |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const INT8_SCALE: f32 = 127.0;

/// Storage precision of a cached vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Fp32,
    Fp16,
    Int8,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Fp32 => "fp32",
            Precision::Fp16 => "fp16",
            Precision::Int8 => "int8",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fp32" => Ok(Precision::Fp32),
            "fp16" => Ok(Precision::Fp16),
            "int8" => Ok(Precision::Int8),
            other => anyhow::bail!("unknown precision '{other}' (expected fp32, fp16 or int8)"),
        }
    }
}

/// A vector in its stored precision.
///
/// Serializes as `{"precision": "...", "vector": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "precision", content = "vector", rename_all = "lowercase")]
pub enum QuantizedVector {
    Fp32(Vec<f32>),
    Fp16(Vec<f32>),
    Int8(Vec<i8>),
}

impl QuantizedVector {
    pub fn quantize(vector: &[f32], precision: Precision) -> Self {
        match precision {
            Precision::Fp32 => QuantizedVector::Fp32(vector.to_vec()),
            Precision::Fp16 => QuantizedVector::Fp16(
                vector
                    .iter()
                    .map(|&x| ((x as f64 * 1e4).round() / 1e4) as f32)
                    .collect(),
            ),
            Precision::Int8 => QuantizedVector::Int8(
                vector
                    .iter()
                    .map(|&x| (x * INT8_SCALE).round().clamp(-INT8_SCALE, INT8_SCALE) as i8)
                    .collect(),
            ),
        }
    }

    pub fn dequantize(&self) -> Vec<f32> {
        match self {
            QuantizedVector::Fp32(v) | QuantizedVector::Fp16(v) => v.clone(),
            QuantizedVector::Int8(v) => v.iter().map(|&x| x as f32 / INT8_SCALE).collect(),
        }
    }

    pub fn precision(&self) -> Precision {
        match self {
            QuantizedVector::Fp32(_) => Precision::Fp32,
            QuantizedVector::Fp16(_) => Precision::Fp16,
            QuantizedVector::Int8(_) => Precision::Int8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            QuantizedVector::Fp32(v) | QuantizedVector::Fp16(v) => v.len(),
            QuantizedVector::Int8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_precision() {
        assert_eq!(" INT8 ".parse::<Precision>().unwrap(), Precision::Int8);
        assert_eq!("fp16".parse::<Precision>().unwrap(), Precision::Fp16);
        assert!("bf16".parse::<Precision>().is_err());
        assert_eq!(Precision::default().to_string(), "fp32");
    }

    #[test]
    fn test_fp32_is_lossless() {
        let v = vec![0.123_456_7, -0.5];
        assert_eq!(QuantizedVector::quantize(&v, Precision::Fp32).dequantize(), v);
    }

    #[test]
    fn test_fp16_rounds_to_four_decimals() {
        let q = QuantizedVector::quantize(&[0.123_456, -0.987_66], Precision::Fp16);
        let d = q.dequantize();
        assert!((d[0] - 0.1235).abs() < 1e-7);
        assert!((d[1] + 0.9877).abs() < 1e-7);
    }

    #[test]
    fn test_int8_scales_and_clamps() {
        let q = QuantizedVector::quantize(&[1.0, -1.0, 0.5, 2.0, -3.0], Precision::Int8);
        assert_eq!(q, QuantizedVector::Int8(vec![127, -127, 64, 127, -127]));
        let d = q.dequantize();
        assert!((d[0] - 1.0).abs() < 1e-6);
        assert!((d[2] - 64.0 / 127.0).abs() < 1e-6);
    }

    #[test]
    fn test_int8_error_is_bounded() {
        let v: Vec<f32> = (0..50).map(|i| (i as f32 / 25.0) - 1.0).collect();
        let d = QuantizedVector::quantize(&v, Precision::Int8).dequantize();
        for (a, b) in v.iter().zip(&d) {
            assert!((a - b).abs() <= 0.5 / 127.0 + 1e-6);
        }
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_string(&QuantizedVector::Fp32(vec![1.0])).unwrap();
        assert_eq!(json, r#"{"precision":"fp32","vector":[1.0]}"#);
        let back: QuantizedVector = serde_json::from_str(&json).unwrap();
        assert_eq!(back.precision(), Precision::Fp32);
        assert_eq!(back.len(), 1);
    }
}
