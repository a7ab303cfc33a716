#![forbid(unsafe_code)]

mod comparator;
mod driver;
mod logging;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tc_core::{DType, HostBuffer, TensorDescriptor};
use tc_device::{DeviceId, default_candidates};
use tc_op::{Relation, compare as compare_op, elemwise_sum, full, full_like};
use tc_oracle::uniform_inputs;

pub use comparator::{
    ComparisonSummary, DEFAULT_RTOL, MAX_MISMATCH_SAMPLES, Mismatch, Tolerance,
    ToleranceViolation, ValueMismatch, compare,
};
pub use driver::{
    DeviceFailure, DeviceOutcome, DeviceReport, DeviceState, Harness, Scenario, ScenarioCheck,
    ScenarioReport, VerificationError,
};
pub use logging::{LOG_SCHEMA_VERSION, SUITE_ID, StructuredCaseLog, buffer_digest, sha256_hex};

const MAX_FIXTURE_BYTES: u64 = 1_048_576;

pub const DEFAULT_SEED: u64 = 0x5eed;
/// Operand shape used by the elementwise-sum scenarios.
pub const SUM_SHAPE: [usize; 3] = [3, 5, 4];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    EmptyDeviceList {
        key: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
            Self::EmptyDeviceList { key } => write!(f, "{key} names no devices"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    /// Candidate devices, attempted in this order.
    pub devices: Vec<DeviceId>,
    pub tolerance: Tolerance,
    pub seed: u64,
    pub input_low: f64,
    pub input_high: f64,
    pub fixture_root: PathBuf,
    /// Catalog the scenarios were loaded from. `None` means the built-in
    /// defaults.
    pub catalog: Option<PathBuf>,
    /// Accelerator targets are lowered on the host instead of being skipped.
    pub emulate_accelerators: bool,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            devices: default_candidates(),
            tolerance: Tolerance::default(),
            seed: DEFAULT_SEED,
            input_low: 0.0,
            input_high: 10.0,
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
            catalog: None,
            emulate_accelerators: false,
        }
    }

    /// Defaults overridden by `TC_DEVICES`, `TC_RTOL` and `TC_SEED`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default_paths();
        if let Some(raw) = lookup("TC_DEVICES") {
            config.devices = parse_devices("TC_DEVICES", &raw)?;
        }
        if let Some(raw) = lookup("TC_RTOL") {
            config.tolerance.rtol = parse_rtol("TC_RTOL", &raw)?;
        }
        if let Some(raw) = lookup("TC_SEED") {
            config.seed = parse_seed("TC_SEED", &raw)?;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_devices<I, D>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<DeviceId>,
    {
        self.devices = devices.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    #[must_use]
    pub fn with_catalog(mut self, catalog: impl Into<PathBuf>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    #[must_use]
    pub fn with_accelerator_emulation(mut self, enabled: bool) -> Self {
        self.emulate_accelerators = enabled;
        self
    }

    /// `run_conformance_matrix` invocation that reruns `scenario_id` on
    /// `device` under this configuration.
    #[must_use]
    pub fn replay_command(&self, device: &DeviceId, scenario_id: &str, seed: u64) -> String {
        let mut args = vec![
            "--devices".to_string(),
            shell_quote(device.as_str()),
            "--seed".to_string(),
            seed.to_string(),
            "--rtol".to_string(),
            self.tolerance.rtol.to_string(),
        ];
        if let Some(catalog) = &self.catalog {
            args.push("--fixture".to_string());
            args.push(shell_quote(&catalog.display().to_string()));
        }
        if self.emulate_accelerators {
            args.push("--emulate-accelerators".to_string());
        }
        args.push("--scenario".to_string());
        args.push(shell_quote(scenario_id));
        format!(
            "cargo run -p tc-conformance --bin run_conformance_matrix -- {}",
            args.join(" ")
        )
    }
}

/// Single-quotes `raw` unless every character is shell-safe.
fn shell_quote(raw: &str) -> String {
    let safe = !raw.is_empty()
        && raw
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "/._-+:=,@%".contains(ch));
    if safe {
        raw.to_string()
    } else {
        format!("'{}'", raw.replace('\'', r"'\''"))
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

pub fn parse_devices(key: &'static str, raw: &str) -> Result<Vec<DeviceId>, ConfigError> {
    let devices: Vec<DeviceId> = raw
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(DeviceId::new)
        .collect();
    if devices.is_empty() {
        return Err(ConfigError::EmptyDeviceList { key });
    }
    Ok(devices)
}

pub fn parse_rtol(key: &'static str, raw: &str) -> Result<f64, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    let rtol: f64 = raw
        .trim()
        .parse()
        .map_err(|_| invalid("expected a number"))?;
    if !rtol.is_finite() || rtol < 0.0 {
        return Err(invalid("must be finite and non-negative"));
    }
    Ok(rtol)
}

/// Accepts decimal or `0x`-prefixed hex.
pub fn parse_seed(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    let trimmed = raw.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse(),
    };
    parsed.map_err(|error| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        reason: error.to_string(),
    })
}

/// `3x5x4`, or `scalar` for rank 0. Scenario ids stay shell-safe.
fn shape_label(shape: &[usize]) -> String {
    if shape.is_empty() {
        return "scalar".to_string();
    }
    shape
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join("x")
}

fn placeholders(
    count: usize,
    shape: &[usize],
    dtype: DType,
) -> Result<Vec<TensorDescriptor>, VerificationError> {
    (0..count)
        .map(|idx| {
            TensorDescriptor::new(shape.to_vec(), dtype, format!("data{idx}"))
                .map_err(|error| VerificationError::Configuration(error.into()))
        })
        .collect()
}

/// `num_args` operands of `shape` filled with seeded uniform data.
pub fn sum_scenario(
    config: &HarnessConfig,
    shape: &[usize],
    num_args: usize,
    dtype: DType,
) -> Result<Scenario, VerificationError> {
    let descs = placeholders(num_args, shape, dtype)?;
    let node = elemwise_sum(&descs, num_args)?;
    let inputs = uniform_inputs(&descs, config.input_low, config.input_high, config.seed)?;
    let check = ScenarioCheck::new("elemwise_sum", node, inputs)?;
    Ok(Scenario::new(
        format!("elemwise_sum/{num_args}/{}/{dtype}", shape_label(shape)),
        config.seed,
        vec![check],
    ))
}

/// FULL_LIKE over a zero source followed by FULL, both with `fill_value`.
pub fn full_scenario(
    config: &HarnessConfig,
    shape: &[usize],
    dtype: DType,
    fill_value: f64,
) -> Result<Scenario, VerificationError> {
    let source = TensorDescriptor::new(shape.to_vec(), dtype, "A")
        .map_err(|error| VerificationError::Configuration(error.into()))?;
    let like = ScenarioCheck::new(
        "full_like",
        full_like(&source, fill_value)?,
        vec![HostBuffer::for_descriptor(&source)],
    )?;
    let filled = ScenarioCheck::new("full", full(shape, dtype, fill_value)?, Vec::new())?;
    Ok(Scenario::new(
        format!("full/{}/{dtype}/{fill_value}", shape_label(shape)),
        config.seed,
        vec![like, filled],
    ))
}

/// FULL_LIKE alone. The source is bound with seeded data, which the
/// operator must ignore.
pub fn full_like_scenario(
    config: &HarnessConfig,
    source: &TensorDescriptor,
    fill_value: f64,
) -> Result<Scenario, VerificationError> {
    let node = full_like(source, fill_value)?;
    let inputs = uniform_inputs(
        std::slice::from_ref(source),
        config.input_low,
        config.input_high,
        config.seed,
    )?;
    let check = ScenarioCheck::new("full_like", node, inputs)?;
    Ok(Scenario::new(
        format!(
            "full_like/{}/{}/{fill_value}",
            shape_label(source.shape()),
            source.dtype()
        ),
        config.seed,
        vec![check],
    ))
}

pub fn compare_scenario(
    config: &HarnessConfig,
    shape: &[usize],
    dtype: DType,
    relation: Relation,
    out_dtype: DType,
) -> Result<Scenario, VerificationError> {
    let descs = placeholders(2, shape, dtype)?;
    let node = compare_op(relation, &descs[0], &descs[1], out_dtype)?;
    let inputs = uniform_inputs(&descs, config.input_low, config.input_high, config.seed)?;
    let check = ScenarioCheck::new(relation.name(), node, inputs)?;
    Ok(Scenario::new(
        format!(
            "{}/{}/{dtype}/{out_dtype}",
            relation.name(),
            shape_label(shape)
        ),
        config.seed,
        vec![check],
    ))
}

/// Elementwise sum of `num_args` operands of shape `(3, 5, 4)` on every
/// configured device.
pub fn verify_elemwise_sum(
    harness: &Harness<'_>,
    num_args: usize,
    dtype: DType,
) -> Result<ScenarioReport, VerificationError> {
    verify_elemwise_sum_with_shape(harness, &SUM_SHAPE, num_args, dtype)
}

pub fn verify_elemwise_sum_with_shape(
    harness: &Harness<'_>,
    shape: &[usize],
    num_args: usize,
    dtype: DType,
) -> Result<ScenarioReport, VerificationError> {
    harness.verify(&sum_scenario(harness.config(), shape, num_args, dtype)?)
}

pub fn verify_full(
    harness: &Harness<'_>,
    shape: &[usize],
    dtype: DType,
    fill_value: f64,
) -> Result<ScenarioReport, VerificationError> {
    harness.verify(&full_scenario(harness.config(), shape, dtype, fill_value)?)
}

pub fn verify_full_like(
    harness: &Harness<'_>,
    source: &TensorDescriptor,
    fill_value: f64,
) -> Result<ScenarioReport, VerificationError> {
    harness.verify(&full_like_scenario(harness.config(), source, fill_value)?)
}

pub fn verify_compare(
    harness: &Harness<'_>,
    shape: &[usize],
    dtype: DType,
    relation: Relation,
    out_dtype: DType,
) -> Result<ScenarioReport, VerificationError> {
    harness.verify(&compare_scenario(
        harness.config(),
        shape,
        dtype,
        relation,
        out_dtype,
    )?)
}

fn default_sum_shape() -> Vec<usize> {
    SUM_SHAPE.to_vec()
}

/// Serializable scenario description, as stored in fixture catalogs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScenarioSpec {
    ElemwiseSum {
        num_args: usize,
        dtype: DType,
        #[serde(default = "default_sum_shape")]
        shape: Vec<usize>,
    },
    Full {
        shape: Vec<usize>,
        dtype: DType,
        fill_value: f64,
    },
    FullLike {
        shape: Vec<usize>,
        dtype: DType,
        fill_value: f64,
    },
    Compare {
        shape: Vec<usize>,
        dtype: DType,
        relation: Relation,
        out_dtype: DType,
    },
}

impl ScenarioSpec {
    pub fn build(&self, config: &HarnessConfig) -> Result<Scenario, VerificationError> {
        match self {
            Self::ElemwiseSum {
                num_args,
                dtype,
                shape,
            } => sum_scenario(config, shape, *num_args, *dtype),
            Self::Full {
                shape,
                dtype,
                fill_value,
            } => full_scenario(config, shape, *dtype, *fill_value),
            Self::FullLike {
                shape,
                dtype,
                fill_value,
            } => {
                let source = TensorDescriptor::new(shape.clone(), *dtype, "A")
                    .map_err(|error| VerificationError::Configuration(error.into()))?;
                full_like_scenario(config, &source, *fill_value)
            }
            Self::Compare {
                shape,
                dtype,
                relation,
                out_dtype,
            } => compare_scenario(config, shape, *dtype, *relation, *out_dtype),
        }
    }
}

/// The scenarios the harness runs when no catalog is given.
#[must_use]
pub fn default_scenarios() -> Vec<ScenarioSpec> {
    let mut specs = vec![
        ScenarioSpec::ElemwiseSum {
            num_args: 1,
            dtype: DType::F32,
            shape: default_sum_shape(),
        },
        ScenarioSpec::ElemwiseSum {
            num_args: 5,
            dtype: DType::F32,
            shape: default_sum_shape(),
        },
        ScenarioSpec::ElemwiseSum {
            num_args: 4,
            dtype: DType::I32,
            shape: default_sum_shape(),
        },
        ScenarioSpec::Full {
            shape: vec![3, 4, 5],
            dtype: DType::F32,
            fill_value: 3.14,
        },
        ScenarioSpec::Full {
            shape: vec![10],
            dtype: DType::I32,
            fill_value: 7.0,
        },
    ];
    for relation in [Relation::Less, Relation::Greater] {
        for dtype in [DType::F32, DType::I32] {
            specs.push(ScenarioSpec::Compare {
                shape: vec![3, 5, 4],
                dtype,
                relation,
                out_dtype: DType::F32,
            });
        }
    }
    specs
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioCatalog {
    pub scenarios: Vec<ScenarioSpec>,
}

pub fn load_scenario_catalog(path: &Path) -> Result<Vec<ScenarioSpec>, String> {
    let catalog: ScenarioCatalog = load_fixture(path)?;
    Ok(catalog.scenarios)
}

fn load_fixture<T>(path: &Path) -> Result<T, String>
where
    T: for<'de> Deserialize<'de>,
{
    let metadata = fs::metadata(path).map_err(|error| {
        format!(
            "failed reading fixture metadata {}: {error}",
            path.display()
        )
    })?;
    let size = metadata.len();
    if size > MAX_FIXTURE_BYTES {
        return Err(format!(
            "fixture {} exceeds max bytes: actual={size} max={MAX_FIXTURE_BYTES}",
            path.display()
        ));
    }

    let raw = fs::read_to_string(path)
        .map_err(|error| format!("failed reading fixture {}: {error}", path.display()))?;
    serde_json::from_str::<T>(&raw)
        .map_err(|error| format!("failed parsing fixture {}: {error}", path.display()))
}

/// Runs every scenario in order. Device failures stay inside the returned
/// reports; configuration and precondition errors stop the run.
pub fn run_catalog(
    harness: &Harness<'_>,
    specs: &[ScenarioSpec],
) -> Result<Vec<ScenarioReport>, VerificationError> {
    specs
        .iter()
        .map(|spec| Ok(harness.run_scenario(&spec.build(harness.config())?)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixSummary {
    pub output_path: PathBuf,
    pub scenarios_total: usize,
    pub scenarios_passed: usize,
    pub log_entries: usize,
    pub failed_entries: usize,
    pub skipped_entries: usize,
}

/// Runs `specs` and writes one structured log line per scenario and device.
pub fn emit_conformance_matrix(
    harness: &Harness<'_>,
    specs: &[ScenarioSpec],
    output_path: &Path,
) -> Result<MatrixSummary, String> {
    let reports = run_catalog(harness, specs).map_err(|error| error.to_string())?;
    let logs: Vec<&StructuredCaseLog> = reports.iter().flat_map(ScenarioReport::logs).collect();

    let mut lines = String::new();
    for entry in &logs {
        lines.push_str(&entry.to_json_line()?);
        lines.push('\n');
    }

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(|error| {
            format!(
                "failed to create conformance output dir {}: {error}",
                parent.display()
            )
        })?;
    }
    fs::write(output_path, lines).map_err(|error| {
        format!(
            "failed to write conformance log {}: {error}",
            output_path.display()
        )
    })?;

    let (scenarios_total, scenarios_passed) =
        summarize_passes(reports.iter().map(ScenarioReport::passed));
    Ok(MatrixSummary {
        output_path: output_path.to_path_buf(),
        scenarios_total,
        scenarios_passed,
        log_entries: logs.len(),
        failed_entries: logs.iter().filter(|entry| entry.outcome == "fail").count(),
        skipped_entries: logs.iter().filter(|entry| entry.outcome == "skip").count(),
    })
}

fn summarize_passes<I>(iter: I) -> (usize, usize)
where
    I: Iterator<Item = bool>,
{
    let mut total = 0usize;
    let mut passed = 0usize;
    for is_passed in iter {
        total += 1;
        if is_passed {
            passed += 1;
        }
    }
    (total, passed)
}
