#![forbid(unsafe_code)]

use std::fmt;

use ndarray::{ArrayD, IxDyn, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tc_core::{BufferError, DType, Element, HostBuffer, TensorDescriptor};
use tc_op::{OperatorNode, OperatorParams, Relation};

#[derive(Debug, Clone, PartialEq)]
pub enum OracleError {
    InputCount {
        expected: usize,
        actual: usize,
    },
    InputMismatch {
        index: usize,
        expected: TensorDescriptor,
        actual_shape: Vec<usize>,
        actual_dtype: DType,
    },
    InvalidRange {
        low: f64,
        high: f64,
    },
    Shape(String),
    Buffer(BufferError),
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputCount { expected, actual } => {
                write!(f, "oracle expects {expected} input(s), got {actual}")
            }
            Self::InputMismatch {
                index,
                expected,
                actual_shape,
                actual_dtype,
            } => write!(
                f,
                "oracle input {index} is {actual_shape:?}:{actual_dtype}, operator declares {expected}"
            ),
            Self::InvalidRange { low, high } => {
                write!(f, "uniform range [{low}, {high}) is empty or its width is not finite")
            }
            Self::Shape(message) => write!(f, "oracle shape error: {message}"),
            Self::Buffer(error) => write!(f, "oracle buffer error: {error}"),
        }
    }
}

impl std::error::Error for OracleError {}

impl From<BufferError> for OracleError {
    fn from(value: BufferError) -> Self {
        Self::Buffer(value)
    }
}

impl From<ndarray::ShapeError> for OracleError {
    fn from(value: ndarray::ShapeError) -> Self {
        Self::Shape(value.to_string())
    }
}

fn to_array<T: Element>(buffer: &HostBuffer) -> Result<ArrayD<T>, OracleError> {
    let values = buffer.typed::<T>()?.to_vec();
    Ok(ArrayD::from_shape_vec(IxDyn(buffer.shape()), values)?)
}

fn into_buffer<T: Element>(array: &ArrayD<T>) -> Result<HostBuffer, OracleError> {
    let values: Vec<T> = array.iter().copied().collect();
    Ok(HostBuffer::from_vec(array.shape().to_vec(), values)?)
}

fn sum_reference<T: Element>(inputs: &[HostBuffer]) -> Result<HostBuffer, OracleError> {
    let Some((first, rest)) = inputs.split_first() else {
        return Err(OracleError::InputCount {
            expected: 1,
            actual: 0,
        });
    };
    let mut acc = to_array::<T>(first)?;
    for operand in rest {
        let operand = to_array::<T>(operand)?;
        Zip::from(&mut acc)
            .and(&operand)
            .for_each(|slot, &value| *slot = slot.accumulate(value));
    }
    into_buffer(&acc)
}

fn fill_reference<T: Element>(shape: &[usize], value: f64) -> Result<HostBuffer, OracleError> {
    into_buffer(&ArrayD::from_elem(IxDyn(shape), T::from_f64(value)))
}

fn compare_reference<T: Element, U: Element>(
    relation: Relation,
    lhs: &HostBuffer,
    rhs: &HostBuffer,
) -> Result<HostBuffer, OracleError> {
    let lhs = to_array::<T>(lhs)?;
    let rhs = to_array::<T>(rhs)?;
    let mask = Zip::from(&lhs).and(&rhs).map_collect(|&left, &right| {
        if relation.holds(left, right) {
            U::one()
        } else {
            U::zero()
        }
    });
    into_buffer(&mask)
}

fn compare_into<T: Element>(
    relation: Relation,
    out_dtype: DType,
    lhs: &HostBuffer,
    rhs: &HostBuffer,
) -> Result<HostBuffer, OracleError> {
    match out_dtype {
        DType::F32 => compare_reference::<T, f32>(relation, lhs, rhs),
        DType::F64 => compare_reference::<T, f64>(relation, lhs, rhs),
        DType::I32 => compare_reference::<T, i32>(relation, lhs, rhs),
        DType::I64 => compare_reference::<T, i64>(relation, lhs, rhs),
    }
}

/// Expected output of `node` for `inputs`, computed with `ndarray` and
/// without touching any compiled path.
pub fn reference_output(
    node: &OperatorNode,
    inputs: &[HostBuffer],
) -> Result<HostBuffer, OracleError> {
    let declared = node.inputs();
    if declared.len() != inputs.len() {
        return Err(OracleError::InputCount {
            expected: declared.len(),
            actual: inputs.len(),
        });
    }
    for (index, (desc, buffer)) in declared.iter().zip(inputs).enumerate() {
        if !buffer.matches(desc) {
            return Err(OracleError::InputMismatch {
                index,
                expected: desc.clone(),
                actual_shape: buffer.shape().to_vec(),
                actual_dtype: buffer.dtype(),
            });
        }
    }

    let output = node.output();
    match node.params() {
        OperatorParams::Sum { .. } => match output.dtype() {
            DType::F32 => sum_reference::<f32>(inputs),
            DType::F64 => sum_reference::<f64>(inputs),
            DType::I32 => sum_reference::<i32>(inputs),
            DType::I64 => sum_reference::<i64>(inputs),
        },
        OperatorParams::Full { fill_value, .. } | OperatorParams::FullLike { fill_value, .. } => {
            match output.dtype() {
                DType::F32 => fill_reference::<f32>(output.shape(), *fill_value),
                DType::F64 => fill_reference::<f64>(output.shape(), *fill_value),
                DType::I32 => fill_reference::<i32>(output.shape(), *fill_value),
                DType::I64 => fill_reference::<i64>(output.shape(), *fill_value),
            }
        }
        OperatorParams::Compare {
            relation,
            out_dtype,
        } => {
            let (lhs, rhs) = (&inputs[0], &inputs[1]);
            match lhs.dtype() {
                DType::F32 => compare_into::<f32>(*relation, *out_dtype, lhs, rhs),
                DType::F64 => compare_into::<f64>(*relation, *out_dtype, lhs, rhs),
                DType::I32 => compare_into::<i32>(*relation, *out_dtype, lhs, rhs),
                DType::I64 => compare_into::<i64>(*relation, *out_dtype, lhs, rhs),
            }
        }
    }
}

fn stream_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64 + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15)
}

fn uniform_buffer<T: Element>(
    desc: &TensorDescriptor,
    rng: &mut StdRng,
    low: f64,
    high: f64,
) -> Result<HostBuffer, OracleError> {
    let values: Vec<T> = (0..desc.numel())
        .map(|_| T::from_f64(rng.gen_range(low..high)))
        .collect();
    Ok(HostBuffer::from_vec(desc.shape().to_vec(), values)?)
}

/// Deterministic uniform `[low, high)` data for each descriptor.
///
/// Samples are drawn as `f64` and cast to the descriptor dtype, so integer
/// inputs are truncated toward zero. Descriptor `i` draws from its own
/// stream seeded from `(seed, i)`.
pub fn uniform_inputs(
    descriptors: &[TensorDescriptor],
    low: f64,
    high: f64,
    seed: u64,
) -> Result<Vec<HostBuffer>, OracleError> {
    // The sampler scales by `high - low`, which must not overflow either.
    if !(low.is_finite() && high.is_finite() && low < high && (high - low).is_finite()) {
        return Err(OracleError::InvalidRange { low, high });
    }
    descriptors
        .iter()
        .enumerate()
        .map(|(index, desc)| {
            let mut rng = StdRng::seed_from_u64(stream_seed(seed, index));
            match desc.dtype() {
                DType::F32 => uniform_buffer::<f32>(desc, &mut rng, low, high),
                DType::F64 => uniform_buffer::<f64>(desc, &mut rng, low, high),
                DType::I32 => uniform_buffer::<i32>(desc, &mut rng, low, high),
                DType::I64 => uniform_buffer::<i64>(desc, &mut rng, low, high),
            }
        })
        .collect()
}
