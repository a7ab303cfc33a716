#![forbid(unsafe_code)]

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Element types an operator input or output may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    #[serde(rename = "float32", alias = "f32")]
    F32,
    #[serde(rename = "float64", alias = "f64")]
    F64,
    #[serde(rename = "int32", alias = "i32")]
    I32,
    #[serde(rename = "int64", alias = "i64")]
    I64,
}

impl DType {
    #[must_use]
    pub const fn all() -> &'static [DType] {
        &[DType::F32, DType::F64, DType::I32, DType::I64]
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::F32 => "float32",
            Self::F64 => "float64",
            Self::I32 => "int32",
            Self::I64 => "int64",
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "f32" | "float32" => Some(Self::F32),
            "f64" | "float64" => Some(Self::F64),
            "i32" | "int32" => Some(Self::I32),
            "i64" | "int64" => Some(Self::I64),
            _ => None,
        }
    }

    #[must_use]
    pub const fn item_size(self) -> usize {
        match self {
            Self::F32 | Self::I32 => 4,
            Self::F64 | Self::I64 => 8,
        }
    }

    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::I32 | Self::I64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rust scalar types backing a [`DType`].
///
/// `from_f64` follows `as` cast semantics: floats round to nearest, integers
/// truncate toward zero and saturate at the type bounds, NaN becomes zero.
pub trait Element: Copy + PartialOrd + fmt::Debug + Send + Sync + 'static {
    const DTYPE: DType;

    fn zero() -> Self;
    fn one() -> Self;
    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
    /// Addition used by elementwise sums. Integer types wrap on overflow.
    fn accumulate(self, rhs: Self) -> Self;
    fn wrap(values: Vec<Self>) -> BufferData;
    fn view(data: &BufferData) -> Option<&[Self]>;
    fn view_mut(data: &mut BufferData) -> Option<&mut [Self]>;
    fn write_le(self, out: &mut Vec<u8>);
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident, $zero:expr, $one:expr, |$lhs:ident, $rhs:ident| $add:expr) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$variant;

            fn zero() -> Self {
                $zero
            }

            fn one() -> Self {
                $one
            }

            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn accumulate(self, rhs: Self) -> Self {
                let ($lhs, $rhs) = (self, rhs);
                $add
            }

            fn wrap(values: Vec<Self>) -> BufferData {
                BufferData::$variant(values)
            }

            fn view(data: &BufferData) -> Option<&[Self]> {
                match data {
                    BufferData::$variant(values) => Some(values.as_slice()),
                    _ => None,
                }
            }

            fn view_mut(data: &mut BufferData) -> Option<&mut [Self]> {
                match data {
                    BufferData::$variant(values) => Some(values.as_mut_slice()),
                    _ => None,
                }
            }

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }
    };
}

impl_element!(f32, F32, 0.0, 1.0, |lhs, rhs| lhs + rhs);
impl_element!(f64, F64, 0.0, 1.0, |lhs, rhs| lhs + rhs);
impl_element!(i32, I32, 0, 1, |lhs, rhs| lhs.wrapping_add(rhs));
impl_element!(i64, I64, 0, 1, |lhs, rhs| lhs.wrapping_add(rhs));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    NonPositiveDim { axis: usize },
    NumelOverflow { shape: Vec<usize> },
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveDim { axis } => {
                write!(f, "shape dimension at axis {axis} must be positive")
            }
            Self::NumelOverflow { shape } => {
                write!(f, "element count overflows usize for shape {shape:?}")
            }
        }
    }
}

impl std::error::Error for DescriptorError {}

/// Shape, element type and symbolic name of one operator operand or result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorDescriptor {
    shape: Vec<usize>,
    dtype: DType,
    name: String,
}

impl TensorDescriptor {
    pub fn new(
        shape: Vec<usize>,
        dtype: DType,
        name: impl Into<String>,
    ) -> Result<Self, DescriptorError> {
        if let Some(axis) = shape.iter().position(|&dim| dim == 0) {
            return Err(DescriptorError::NonPositiveDim { axis });
        }
        checked_numel(&shape).ok_or_else(|| DescriptorError::NumelOverflow {
            shape: shape.clone(),
        })?;
        Ok(Self {
            shape,
            dtype,
            name: name.into(),
        })
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    #[must_use]
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    #[must_use]
    pub fn strides(&self) -> Vec<usize> {
        contiguous_strides(&self.shape)
    }

    /// Shape and dtype equality. Names are labels and do not take part.
    #[must_use]
    pub fn same_signature(&self, other: &TensorDescriptor) -> bool {
        self.shape == other.shape && self.dtype == other.dtype
    }

    #[must_use]
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            shape: self.shape.clone(),
            dtype: self.dtype,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn fingerprint64(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.shape.hash(&mut hasher);
        self.dtype.hash(&mut hasher);
        self.name.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for TensorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}:{}", self.name, self.shape, self.dtype)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BufferData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
}

impl BufferData {
    #[must_use]
    pub fn zeros(dtype: DType, len: usize) -> Self {
        Self::filled(dtype, len, 0.0)
    }

    #[must_use]
    pub fn filled(dtype: DType, len: usize, value: f64) -> Self {
        match dtype {
            DType::F32 => filled_vec::<f32>(len, value),
            DType::F64 => filled_vec::<f64>(len, value),
            DType::I32 => filled_vec::<i32>(len, value),
            DType::I64 => filled_vec::<i64>(len, value),
        }
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
            Self::I32(_) => DType::I32,
            Self::I64(_) => DType::I64,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::F32(values) => values.len(),
            Self::F64(values) => values.len(),
            Self::I32(values) => values.len(),
            Self::I64(values) => values.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn value_f64(&self, idx: usize) -> Option<f64> {
        match self {
            Self::F32(values) => values.get(idx).map(|v| v.to_f64()),
            Self::F64(values) => values.get(idx).copied(),
            Self::I32(values) => values.get(idx).map(|v| v.to_f64()),
            Self::I64(values) => values.get(idx).map(|v| v.to_f64()),
        }
    }
}

fn filled_vec<T: Element>(len: usize, value: f64) -> BufferData {
    T::wrap(vec![T::from_f64(value); len])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    LengthMismatch { expected: usize, actual: usize },
    DTypeMismatch { expected: DType, actual: DType },
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LengthMismatch { expected, actual } => write!(
                f,
                "buffer length mismatch: shape needs {expected} elements, got {actual}"
            ),
            Self::DTypeMismatch { expected, actual } => {
                write!(f, "buffer dtype mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for BufferError {}

/// Host-resident, row-major numeric array. Used for oracle inputs and outputs
/// and as staging for device transfers.
#[derive(Debug, Clone, PartialEq)]
pub struct HostBuffer {
    shape: Vec<usize>,
    data: BufferData,
}

impl HostBuffer {
    #[must_use]
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        Self::full(shape, dtype, 0.0)
    }

    #[must_use]
    pub fn full(shape: &[usize], dtype: DType, value: f64) -> Self {
        let numel = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: BufferData::filled(dtype, numel, value),
        }
    }

    #[must_use]
    pub fn for_descriptor(desc: &TensorDescriptor) -> Self {
        Self::zeros(desc.shape(), desc.dtype())
    }

    pub fn from_vec<T: Element>(shape: Vec<usize>, values: Vec<T>) -> Result<Self, BufferError> {
        Self::from_data(shape, T::wrap(values))
    }

    pub fn from_data(shape: Vec<usize>, data: BufferData) -> Result<Self, BufferError> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(BufferError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Builds a 1/0 buffer of `dtype` from a boolean mask.
    pub fn from_mask(shape: Vec<usize>, dtype: DType, mask: &[bool]) -> Result<Self, BufferError> {
        let data = match dtype {
            DType::F32 => mask_vec::<f32>(mask),
            DType::F64 => mask_vec::<f64>(mask),
            DType::I32 => mask_vec::<i32>(mask),
            DType::I64 => mask_vec::<i64>(mask),
        };
        Self::from_data(shape, data)
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    #[must_use]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn data(&self) -> &BufferData {
        &self.data
    }

    #[must_use]
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        T::view(&self.data)
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> Option<&mut [T]> {
        T::view_mut(&mut self.data)
    }

    pub fn typed<T: Element>(&self) -> Result<&[T], BufferError> {
        T::view(&self.data).ok_or(BufferError::DTypeMismatch {
            expected: T::DTYPE,
            actual: self.dtype(),
        })
    }

    #[must_use]
    pub fn value_f64(&self, flat: usize) -> Option<f64> {
        self.data.value_f64(flat)
    }

    #[must_use]
    pub fn to_f64_vec(&self) -> Vec<f64> {
        (0..self.numel())
            .filter_map(|idx| self.data.value_f64(idx))
            .collect()
    }

    /// Shape and dtype agree with `desc`.
    #[must_use]
    pub fn matches(&self, desc: &TensorDescriptor) -> bool {
        self.shape == desc.shape() && self.dtype() == desc.dtype()
    }

    #[must_use]
    pub fn unravel_index(&self, flat: usize) -> Vec<usize> {
        let mut rem = flat;
        contiguous_strides(&self.shape)
            .into_iter()
            .zip(self.shape.iter().copied())
            .map(|(stride, dim)| {
                let idx = (rem / stride) % dim;
                rem %= stride;
                idx
            })
            .collect()
    }

    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.numel() * self.dtype().item_size());
        match &self.data {
            BufferData::F32(values) => values.iter().for_each(|v| v.write_le(&mut out)),
            BufferData::F64(values) => values.iter().for_each(|v| v.write_le(&mut out)),
            BufferData::I32(values) => values.iter().for_each(|v| v.write_le(&mut out)),
            BufferData::I64(values) => values.iter().for_each(|v| v.write_le(&mut out)),
        }
        out
    }
}

fn mask_vec<T: Element>(mask: &[bool]) -> BufferData {
    T::wrap(
        mask.iter()
            .map(|&hit| if hit { T::one() } else { T::zero() })
            .collect(),
    )
}

fn checked_numel(shape: &[usize]) -> Option<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

#[must_use]
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    if shape.is_empty() {
        return Vec::new();
    }

    let mut strides = vec![1; shape.len()];
    let mut running = 1usize;
    for idx in (0..shape.len()).rev() {
        strides[idx] = running;
        running = running.saturating_mul(shape[idx]);
    }
    strides
}

#[cfg(test)]
#[allow(clippy::approx_constant)]
mod tests {
    use proptest::prelude::*;

    use super::{
        BufferError, DType, DescriptorError, Element, HostBuffer, TensorDescriptor,
        contiguous_strides,
    };

    #[test]
    fn descriptor_rejects_zero_dimension() {
        let err = TensorDescriptor::new(vec![3, 0, 4], DType::F32, "A")
            .expect_err("zero-sized axis must be rejected");
        assert_eq!(err, DescriptorError::NonPositiveDim { axis: 1 });
    }

    #[test]
    fn descriptor_rejects_overflowing_shape() {
        let err = TensorDescriptor::new(vec![usize::MAX, 2], DType::I64, "huge")
            .expect_err("overflowing element count must be rejected");
        assert!(matches!(err, DescriptorError::NumelOverflow { .. }));
    }

    #[test]
    fn rank_zero_descriptor_is_a_scalar() {
        let desc = TensorDescriptor::new(Vec::new(), DType::F64, "s").expect("scalar descriptor");
        assert_eq!(desc.numel(), 1);
        assert!(desc.strides().is_empty());
    }

    #[test]
    fn signature_ignores_name() {
        let a = TensorDescriptor::new(vec![3, 5, 4], DType::F32, "data0").expect("a");
        let b = TensorDescriptor::new(vec![3, 5, 4], DType::F32, "data1").expect("b");
        let c = TensorDescriptor::new(vec![3, 5, 4], DType::I32, "data0").expect("c");
        assert!(a.same_signature(&b));
        assert!(!a.same_signature(&c));
        assert_ne!(a.fingerprint64(), b.fingerprint64());
    }

    #[test]
    fn dtype_parses_short_and_long_names() {
        assert_eq!(DType::parse("float32"), Some(DType::F32));
        assert_eq!(DType::parse("I32"), Some(DType::I32));
        assert_eq!(DType::parse("int64"), Some(DType::I64));
        assert_eq!(DType::parse("bfloat16"), None);
        assert_eq!(DType::F64.to_string(), "float64");
    }

    #[test]
    fn full_truncates_fill_value_for_integer_dtypes() {
        let buffer = HostBuffer::full(&[10], DType::I32, 7.9);
        assert_eq!(buffer.as_slice::<i32>(), Some(&[7; 10][..]));

        let pi = HostBuffer::full(&[2], DType::I32, 3.14);
        assert_eq!(pi.as_slice::<i32>(), Some(&[3, 3][..]));
    }

    #[test]
    fn integer_cast_saturates_and_maps_nan_to_zero() {
        assert_eq!(i32::from_f64(1e12), i32::MAX);
        assert_eq!(i32::from_f64(-1e12), i32::MIN);
        assert_eq!(i64::from_f64(f64::NAN), 0);
        assert_eq!(i32::from_f64(-2.7), -2);
    }

    #[test]
    fn integer_accumulate_wraps() {
        assert_eq!(i32::MAX.accumulate(1), i32::MIN);
        assert_eq!(1.5f32.accumulate(2.0), 3.5);
    }

    #[test]
    fn from_vec_checks_length() {
        let err = HostBuffer::from_vec(vec![2, 2], vec![1.0f32, 2.0, 3.0])
            .expect_err("short data must be rejected");
        assert_eq!(
            err,
            BufferError::LengthMismatch {
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn from_mask_writes_ones_and_zeros() {
        let buffer = HostBuffer::from_mask(vec![4], DType::F32, &[true, false, false, true])
            .expect("mask buffer");
        assert_eq!(buffer.as_slice::<f32>(), Some(&[1.0, 0.0, 0.0, 1.0][..]));
    }

    #[test]
    fn typed_view_reports_dtype_mismatch() {
        let buffer = HostBuffer::zeros(&[3], DType::I64);
        let err = buffer.typed::<f32>().expect_err("wrong element type");
        assert_eq!(
            err,
            BufferError::DTypeMismatch {
                expected: DType::F32,
                actual: DType::I64
            }
        );
    }

    #[test]
    fn unravel_index_follows_row_major_order() {
        let buffer = HostBuffer::zeros(&[3, 4, 5], DType::F32);
        assert_eq!(buffer.unravel_index(0), vec![0, 0, 0]);
        assert_eq!(buffer.unravel_index(23), vec![1, 0, 3]);
        assert_eq!(buffer.unravel_index(59), vec![2, 3, 4]);
    }

    #[test]
    fn le_bytes_cover_every_element() {
        let buffer = HostBuffer::from_vec(vec![2], vec![1i32, -1]).expect("buffer");
        assert_eq!(
            buffer.to_le_bytes(),
            vec![1, 0, 0, 0, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn buffer_matches_descriptor_signature() {
        let desc = TensorDescriptor::new(vec![7], DType::I32, "x").expect("desc");
        assert!(HostBuffer::for_descriptor(&desc).matches(&desc));
        assert!(!HostBuffer::zeros(&[7], DType::F32).matches(&desc));
        assert!(!HostBuffer::zeros(&[1, 7], DType::I32).matches(&desc));
    }

    proptest! {
        #[test]
        fn prop_strides_end_in_one_and_multiply_out(shape in prop::collection::vec(1usize..=6, 1..=4)) {
            let strides = contiguous_strides(&shape);
            prop_assert_eq!(strides.last().copied(), Some(1));
            prop_assert_eq!(strides[0] * shape[0], shape.iter().product::<usize>());
        }

        #[test]
        fn prop_unravel_stays_in_bounds(
            shape in prop::collection::vec(1usize..=5, 1..=4),
            pick in 0usize..1_000,
        ) {
            let buffer = HostBuffer::zeros(&shape, DType::F64);
            let flat = pick % buffer.numel();
            let multi = buffer.unravel_index(flat);
            prop_assert_eq!(multi.len(), shape.len());
            let strides = contiguous_strides(&shape);
            let mut back = 0usize;
            for ((idx, dim), stride) in multi.iter().zip(&shape).zip(&strides) {
                prop_assert!(idx < dim);
                back += idx * stride;
            }
            prop_assert_eq!(back, flat);
        }

        #[test]
        fn prop_full_holds_cast_value(
            shape in prop::collection::vec(1usize..=4, 0..=3),
            value in -1_000.0f64..1_000.0,
        ) {
            for &dtype in DType::all() {
                let buffer = HostBuffer::full(&shape, dtype, value);
                prop_assert_eq!(buffer.numel(), shape.iter().product::<usize>());
                let expected = match dtype {
                    DType::F32 => f64::from(value as f32),
                    DType::F64 => value,
                    DType::I32 => f64::from(value as i32),
                    DType::I64 => (value as i64) as f64,
                };
                prop_assert!(buffer.to_f64_vec().iter().all(|v| *v == expected));
            }
        }
    }
}
