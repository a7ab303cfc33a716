#![forbid(unsafe_code)]

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tc_core::{DType, DescriptorError, TensorDescriptor};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Less,
    Greater,
}

impl Relation {
    #[must_use]
    pub fn holds<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            Self::Less => lhs < rhs,
            Self::Greater => lhs > rhs,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Less => "less",
            Self::Greater => "greater",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Sum,
    Full,
    FullLike,
    Compare,
}

impl OperatorKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sum => "elemwise_sum",
            Self::Full => "full",
            Self::FullLike => "full_like",
            Self::Compare => "compare",
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters of one operator; exactly one variant is active.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorParams {
    /// Elementwise sum over `operand_count` same-typed operands.
    Sum { operand_count: usize },
    Full {
        shape: Vec<usize>,
        dtype: DType,
        fill_value: f64,
    },
    FullLike {
        fill_value: f64,
        source: TensorDescriptor,
    },
    Compare { relation: Relation, out_dtype: DType },
}

impl OperatorParams {
    #[must_use]
    pub fn kind(&self) -> OperatorKind {
        match self {
            Self::Sum { .. } => OperatorKind::Sum,
            Self::Full { .. } => OperatorKind::Full,
            Self::FullLike { .. } => OperatorKind::FullLike,
            Self::Compare { .. } => OperatorKind::Compare,
        }
    }

    #[must_use]
    pub fn fill_value(&self) -> Option<f64> {
        match self {
            Self::Full { fill_value, .. } | Self::FullLike { fill_value, .. } => Some(*fill_value),
            Self::Sum { .. } | Self::Compare { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    ZeroOperands,
    OperandCountMismatch {
        kind: OperatorKind,
        expected: usize,
        actual: usize,
    },
    OperandShapeMismatch {
        index: usize,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    OperandDTypeMismatch {
        index: usize,
        expected: DType,
        actual: DType,
    },
    SourceMismatch {
        expected: TensorDescriptor,
        actual: TensorDescriptor,
    },
    NonFiniteFill {
        dtype: DType,
        value: f64,
    },
    InvalidShape(DescriptorError),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroOperands => write!(f, "elemwise_sum requires at least one operand"),
            Self::OperandCountMismatch {
                kind,
                expected,
                actual,
            } => write!(
                f,
                "{kind} expects {expected} operand(s), {actual} were supplied"
            ),
            Self::OperandShapeMismatch {
                index,
                expected,
                actual,
            } => write!(
                f,
                "operand {index} shape {actual:?} does not match operand 0 shape {expected:?}"
            ),
            Self::OperandDTypeMismatch {
                index,
                expected,
                actual,
            } => write!(
                f,
                "operand {index} dtype {actual} does not match operand 0 dtype {expected}"
            ),
            Self::SourceMismatch { expected, actual } => write!(
                f,
                "full_like input {actual} does not match its source descriptor {expected}"
            ),
            Self::NonFiniteFill { dtype, value } => {
                write!(f, "fill value {value} cannot be represented in {dtype}")
            }
            Self::InvalidShape(error) => write!(f, "invalid operator shape: {error}"),
        }
    }
}

impl std::error::Error for ConfigurationError {}

impl From<DescriptorError> for ConfigurationError {
    fn from(value: DescriptorError) -> Self {
        Self::InvalidShape(value)
    }
}

/// An operator bound to concrete operand descriptors.
///
/// The harness only passes nodes around; compilers read the accessors to
/// lower them.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorNode {
    id: u64,
    params: OperatorParams,
    inputs: Vec<TensorDescriptor>,
    output: TensorDescriptor,
}

impl OperatorNode {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> OperatorKind {
        self.params.kind()
    }

    #[must_use]
    pub fn params(&self) -> &OperatorParams {
        &self.params
    }

    /// Operand descriptors in binding order.
    #[must_use]
    pub fn inputs(&self) -> &[TensorDescriptor] {
        &self.inputs
    }

    #[must_use]
    pub fn output(&self) -> &TensorDescriptor {
        &self.output
    }

    /// Inputs followed by the output, the parameter order of a compiled artifact.
    #[must_use]
    pub fn io_descriptors(&self) -> Vec<TensorDescriptor> {
        let mut io = self.inputs.clone();
        io.push(self.output.clone());
        io
    }
}

pub fn build_operator(
    params: OperatorParams,
    inputs: &[TensorDescriptor],
) -> Result<OperatorNode, ConfigurationError> {
    let output = match &params {
        OperatorParams::Sum { operand_count } => {
            if *operand_count == 0 {
                return Err(ConfigurationError::ZeroOperands);
            }
            expect_operands(OperatorKind::Sum, *operand_count, inputs)?;
            ensure_uniform_operands(inputs)?;
            inputs[0].renamed("elemwise_sum_out")
        }
        OperatorParams::Full {
            shape,
            dtype,
            fill_value,
        } => {
            expect_operands(OperatorKind::Full, 0, inputs)?;
            ensure_representable(*dtype, *fill_value)?;
            TensorDescriptor::new(shape.clone(), *dtype, "full_out")?
        }
        OperatorParams::FullLike { fill_value, source } => {
            expect_operands(OperatorKind::FullLike, 1, inputs)?;
            if !inputs[0].same_signature(source) {
                return Err(ConfigurationError::SourceMismatch {
                    expected: source.clone(),
                    actual: inputs[0].clone(),
                });
            }
            ensure_representable(source.dtype(), *fill_value)?;
            source.renamed("full_like_out")
        }
        OperatorParams::Compare {
            relation,
            out_dtype,
        } => {
            expect_operands(OperatorKind::Compare, 2, inputs)?;
            ensure_uniform_operands(inputs)?;
            TensorDescriptor::new(
                inputs[0].shape().to_vec(),
                *out_dtype,
                format!("{}_out", relation.name()),
            )?
        }
    };

    Ok(OperatorNode {
        id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
        params,
        inputs: inputs.to_vec(),
        output,
    })
}

pub fn elemwise_sum(
    inputs: &[TensorDescriptor],
    operand_count: usize,
) -> Result<OperatorNode, ConfigurationError> {
    build_operator(OperatorParams::Sum { operand_count }, inputs)
}

pub fn full(
    shape: &[usize],
    dtype: DType,
    fill_value: f64,
) -> Result<OperatorNode, ConfigurationError> {
    build_operator(
        OperatorParams::Full {
            shape: shape.to_vec(),
            dtype,
            fill_value,
        },
        &[],
    )
}

pub fn full_like(
    source: &TensorDescriptor,
    fill_value: f64,
) -> Result<OperatorNode, ConfigurationError> {
    build_operator(
        OperatorParams::FullLike {
            fill_value,
            source: source.clone(),
        },
        std::slice::from_ref(source),
    )
}

pub fn compare(
    relation: Relation,
    lhs: &TensorDescriptor,
    rhs: &TensorDescriptor,
    out_dtype: DType,
) -> Result<OperatorNode, ConfigurationError> {
    build_operator(
        OperatorParams::Compare {
            relation,
            out_dtype,
        },
        &[lhs.clone(), rhs.clone()],
    )
}

fn expect_operands(
    kind: OperatorKind,
    expected: usize,
    inputs: &[TensorDescriptor],
) -> Result<(), ConfigurationError> {
    if inputs.len() != expected {
        return Err(ConfigurationError::OperandCountMismatch {
            kind,
            expected,
            actual: inputs.len(),
        });
    }
    Ok(())
}

fn ensure_uniform_operands(inputs: &[TensorDescriptor]) -> Result<(), ConfigurationError> {
    let Some((first, rest)) = inputs.split_first() else {
        return Err(ConfigurationError::ZeroOperands);
    };
    for (offset, operand) in rest.iter().enumerate() {
        let index = offset + 1;
        if operand.shape() != first.shape() {
            return Err(ConfigurationError::OperandShapeMismatch {
                index,
                expected: first.shape().to_vec(),
                actual: operand.shape().to_vec(),
            });
        }
        if operand.dtype() != first.dtype() {
            return Err(ConfigurationError::OperandDTypeMismatch {
                index,
                expected: first.dtype(),
                actual: operand.dtype(),
            });
        }
    }
    Ok(())
}

fn ensure_representable(dtype: DType, value: f64) -> Result<(), ConfigurationError> {
    if dtype.is_integer() && !value.is_finite() {
        return Err(ConfigurationError::NonFiniteFill { dtype, value });
    }
    Ok(())
}
