use std::fmt;

use serde::{Deserialize, Serialize};
use tc_core::{DType, HostBuffer};

pub const DEFAULT_RTOL: f64 = 1e-5;
/// Mismatch samples kept in a [`ValueMismatch`].
pub const MAX_MISMATCH_SAMPLES: usize = 16;

/// Relative tolerance with a floor on the magnitude it scales, so that an
/// expected zero still admits a deviation of `rtol * floor`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub rtol: f64,
    pub floor: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            rtol: DEFAULT_RTOL,
            floor: f64::EPSILON,
        }
    }
}

impl Tolerance {
    #[must_use]
    pub fn with_rtol(rtol: f64) -> Self {
        Self {
            rtol,
            ..Self::default()
        }
    }

    /// `|actual - expected| <= rtol * max(|expected|, floor)`. NaN only
    /// matches NaN.
    #[must_use]
    pub fn allows(&self, actual: f64, expected: f64) -> bool {
        if actual.is_nan() || expected.is_nan() {
            return actual.is_nan() && expected.is_nan();
        }
        if actual == expected {
            return true;
        }
        (actual - expected).abs() <= self.rtol * expected.abs().max(self.floor)
    }

    /// Integer form of [`Tolerance::allows`]. The difference is taken exactly,
    /// so `int64` deviations beyond 2^53 are still seen.
    #[must_use]
    pub fn allows_integer(&self, actual: i64, expected: i64) -> bool {
        let diff = exact_diff(actual, expected);
        diff == 0 || (diff as f64) <= self.rtol * (expected.unsigned_abs() as f64).max(self.floor)
    }

    fn integer_deviation(&self, actual: i64, expected: i64) -> (f64, f64) {
        let abs = exact_diff(actual, expected) as f64;
        (abs, abs / (expected.unsigned_abs() as f64).max(self.floor))
    }

    fn deviation(&self, actual: f64, expected: f64) -> (f64, f64) {
        if (actual.is_nan() && expected.is_nan()) || actual == expected {
            return (0.0, 0.0);
        }
        if actual.is_nan() || expected.is_nan() {
            return (f64::INFINITY, f64::INFINITY);
        }
        let abs = (actual - expected).abs();
        (abs, abs / expected.abs().max(self.floor))
    }
}

fn exact_diff(actual: i64, expected: i64) -> u128 {
    (i128::from(actual) - i128::from(expected)).unsigned_abs()
}

/// One offending element. Values are widened to `f64` for reporting only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    pub flat_index: usize,
    pub index: Vec<usize>,
    pub actual: f64,
    pub expected: f64,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} (flat {}): actual={} expected={}",
            self.index, self.flat_index, self.actual, self.expected
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonSummary {
    pub numel: usize,
    pub dtype: DType,
    pub max_abs_error: f64,
    pub max_rel_error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueMismatch {
    pub rtol: f64,
    pub numel: usize,
    pub mismatched: usize,
    pub max_abs_error: f64,
    pub max_rel_error: f64,
    pub first: Mismatch,
    pub samples: Vec<Mismatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToleranceViolation {
    ShapeMismatch {
        actual: Vec<usize>,
        expected: Vec<usize>,
    },
    DTypeMismatch {
        actual: DType,
        expected: DType,
    },
    Values(ValueMismatch),
}

impl ToleranceViolation {
    /// Offending indices reported by the violation, first mismatch first.
    #[must_use]
    pub fn offending_indices(&self) -> Vec<Vec<usize>> {
        match self {
            Self::Values(values) => values.samples.iter().map(|m| m.index.clone()).collect(),
            Self::ShapeMismatch { .. } | Self::DTypeMismatch { .. } => Vec::new(),
        }
    }
}

impl fmt::Display for ToleranceViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeMismatch { actual, expected } => {
                write!(f, "shape mismatch: actual={actual:?} expected={expected:?}")
            }
            Self::DTypeMismatch { actual, expected } => {
                write!(f, "dtype mismatch: actual={actual} expected={expected}")
            }
            Self::Values(values) => write!(
                f,
                "{} of {} element(s) exceed rtol={}: max_abs_error={} max_rel_error={}, first at {}",
                values.mismatched,
                values.numel,
                values.rtol,
                values.max_abs_error,
                values.max_rel_error,
                values.first
            ),
        }
    }
}

impl std::error::Error for ToleranceViolation {}

/// Elementwise check of `actual` against `expected`.
///
/// Every element is visited so the violation reports the full mismatch
/// count and the worst deviations, not only the first offender.
pub fn compare(
    actual: &HostBuffer,
    expected: &HostBuffer,
    tolerance: &Tolerance,
) -> Result<ComparisonSummary, ToleranceViolation> {
    if actual.shape() != expected.shape() {
        return Err(ToleranceViolation::ShapeMismatch {
            actual: actual.shape().to_vec(),
            expected: expected.shape().to_vec(),
        });
    }
    if actual.dtype() != expected.dtype() {
        return Err(ToleranceViolation::DTypeMismatch {
            actual: actual.dtype(),
            expected: expected.dtype(),
        });
    }

    let numel = expected.numel();
    let mut max_abs_error = 0.0_f64;
    let mut max_rel_error = 0.0_f64;
    let mut mismatched = 0usize;
    let mut samples = Vec::new();

    for flat_index in 0..numel {
        let Some(element) = check_element(actual, expected, flat_index, tolerance) else {
            continue;
        };
        max_abs_error = max_abs_error.max(element.abs);
        max_rel_error = max_rel_error.max(element.rel);
        if element.allowed {
            continue;
        }
        mismatched += 1;
        if samples.len() < MAX_MISMATCH_SAMPLES {
            samples.push(Mismatch {
                flat_index,
                index: expected.unravel_index(flat_index),
                actual: element.actual,
                expected: element.expected,
            });
        }
    }

    match samples.first() {
        None => Ok(ComparisonSummary {
            numel,
            dtype: expected.dtype(),
            max_abs_error,
            max_rel_error,
        }),
        Some(first) => Err(ToleranceViolation::Values(ValueMismatch {
            rtol: tolerance.rtol,
            numel,
            mismatched,
            max_abs_error,
            max_rel_error,
            first: first.clone(),
            samples,
        })),
    }
}

struct ElementCheck {
    actual: f64,
    expected: f64,
    abs: f64,
    rel: f64,
    allowed: bool,
}

/// Integer dtypes are checked on their typed values; floats through `f64`.
fn check_element(
    actual: &HostBuffer,
    expected: &HostBuffer,
    flat_index: usize,
    tolerance: &Tolerance,
) -> Option<ElementCheck> {
    if let (Some(got), Some(want)) = (
        integer_value(actual, flat_index),
        integer_value(expected, flat_index),
    ) {
        let (abs, rel) = tolerance.integer_deviation(got, want);
        return Some(ElementCheck {
            actual: got as f64,
            expected: want as f64,
            abs,
            rel,
            allowed: tolerance.allows_integer(got, want),
        });
    }
    let got = actual.value_f64(flat_index)?;
    let want = expected.value_f64(flat_index)?;
    let (abs, rel) = tolerance.deviation(got, want);
    Some(ElementCheck {
        actual: got,
        expected: want,
        abs,
        rel,
        allowed: tolerance.allows(got, want),
    })
}

fn integer_value(buffer: &HostBuffer, flat_index: usize) -> Option<i64> {
    match buffer.dtype() {
        DType::I32 => buffer
            .as_slice::<i32>()?
            .get(flat_index)
            .map(|value| i64::from(*value)),
        DType::I64 => buffer.as_slice::<i64>()?.get(flat_index).copied(),
        DType::F32 | DType::F64 => None,
    }
}
