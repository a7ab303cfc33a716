use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Value, json};
use tc_core::HostBuffer;
use tc_device::{DeviceContext, DeviceId, TargetDescriptor, TargetResolver};
use tc_op::{ConfigurationError, OperatorNode};
use tc_oracle::{OracleError, reference_output};
use tc_runtime::{
    BuildError, Compiler, DeviceRuntime, EvidenceKind, EvidenceLedger, ExecuteError,
    RuntimeExecutionError, build, execute,
};

use crate::HarnessConfig;
use crate::comparator::{ComparisonSummary, ToleranceViolation, compare};
use crate::logging::{StructuredCaseLog, buffer_digest};

/// One operator check inside a scenario: the node, its bound inputs and the
/// oracle output they must reproduce.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioCheck {
    label: String,
    node: OperatorNode,
    inputs: Vec<HostBuffer>,
    expected: HostBuffer,
}

impl ScenarioCheck {
    /// Binds `inputs` to `node` and computes the expected output.
    ///
    /// Inputs that disagree with the node's descriptors are a precondition
    /// failure for the whole scenario.
    pub fn new(
        label: impl Into<String>,
        node: OperatorNode,
        inputs: Vec<HostBuffer>,
    ) -> Result<Self, VerificationError> {
        let label = label.into();
        let expected = reference_output(&node, &inputs).map_err(|error| match error {
            OracleError::InputCount { .. } | OracleError::InputMismatch { .. } => {
                VerificationError::Precondition {
                    check: label.clone(),
                    detail: error.to_string(),
                }
            }
            other => VerificationError::Oracle(other),
        })?;
        Ok(Self {
            label,
            node,
            inputs,
            expected,
        })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn node(&self) -> &OperatorNode {
        &self.node
    }

    #[must_use]
    pub fn inputs(&self) -> &[HostBuffer] {
        &self.inputs
    }

    #[must_use]
    pub fn expected(&self) -> &HostBuffer {
        &self.expected
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    name: String,
    seed: u64,
    checks: Vec<ScenarioCheck>,
}

impl Scenario {
    #[must_use]
    pub fn new(name: impl Into<String>, seed: u64, checks: Vec<ScenarioCheck>) -> Self {
        Self {
            name: name.into(),
            seed,
            checks,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn checks(&self) -> &[ScenarioCheck] {
        &self.checks
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Init,
    Build,
    Execute,
    Compare,
    Done,
    Skipped,
    Failed,
}

/// Why an attempted device failed. Each variant names the check it stopped at.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceFailure {
    Build {
        check: String,
        error: BuildError,
    },
    Execute {
        check: String,
        error: RuntimeExecutionError,
    },
    Tolerance {
        check: String,
        violation: ToleranceViolation,
    },
}

impl DeviceFailure {
    #[must_use]
    pub fn check(&self) -> &str {
        match self {
            Self::Build { check, .. } | Self::Execute { check, .. } | Self::Tolerance { check, .. } => {
                check
            }
        }
    }

    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Build { .. } => "build_error",
            Self::Execute { .. } => "runtime_execution_error",
            Self::Tolerance { .. } => "tolerance_violation",
        }
    }

    fn forensic_value(&self) -> Value {
        match self {
            Self::Tolerance { check, violation } => json!({
                "check": check,
                "violation": violation,
            }),
            Self::Build { check, .. } | Self::Execute { check, .. } => json!({
                "check": check,
                "message": self.to_string(),
            }),
        }
    }
}

impl fmt::Display for DeviceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build { check, error } => write!(f, "{check}: build failed: {error}"),
            Self::Execute { check, error } => write!(f, "{check}: execution failed: {error}"),
            Self::Tolerance { check, violation } => {
                write!(f, "{check}: output mismatch: {violation}")
            }
        }
    }
}

impl std::error::Error for DeviceFailure {}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceOutcome {
    Passed,
    Skipped { reason: String },
    Failed(DeviceFailure),
}

impl DeviceOutcome {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Passed => "pass",
            Self::Skipped { .. } => "skip",
            Self::Failed(_) => "fail",
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub device: DeviceId,
    pub outcome: DeviceOutcome,
    pub trace: Vec<DeviceState>,
    pub comparisons: Vec<ComparisonSummary>,
    pub log: StructuredCaseLog,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioReport {
    pub scenario: String,
    pub devices: Vec<DeviceReport>,
    pub evidence: EvidenceLedger,
}

impl ScenarioReport {
    /// No attempted device failed. Skipped devices do not count either way.
    #[must_use]
    pub fn passed(&self) -> bool {
        !self.devices.iter().any(|report| report.outcome.is_failed())
    }

    #[must_use]
    pub fn attempted(&self) -> usize {
        self.devices
            .iter()
            .filter(|report| !report.outcome.is_skipped())
            .count()
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.devices
            .iter()
            .filter(|report| report.outcome.is_skipped())
            .count()
    }

    /// First failed device in candidate order.
    #[must_use]
    pub fn first_failure(&self) -> Option<&DeviceReport> {
        self.devices.iter().find(|report| report.outcome.is_failed())
    }

    #[must_use]
    pub fn device(&self, device: &str) -> Option<&DeviceReport> {
        self.devices
            .iter()
            .find(|report| report.device.as_str() == device)
    }

    pub fn logs(&self) -> impl Iterator<Item = &StructuredCaseLog> {
        self.devices.iter().map(|report| &report.log)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerificationError {
    Configuration(ConfigurationError),
    Precondition {
        check: String,
        detail: String,
    },
    Oracle(OracleError),
    DeviceFailed {
        scenario: String,
        device: DeviceId,
        failure: DeviceFailure,
        report: Box<ScenarioReport>,
    },
}

impl VerificationError {
    /// The full report when the scenario ran to completion.
    #[must_use]
    pub fn report(&self) -> Option<&ScenarioReport> {
        match self {
            Self::DeviceFailed { report, .. } => Some(report.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(error) => write!(f, "configuration error: {error}"),
            Self::Precondition { check, detail } => {
                write!(f, "precondition violated in {check}: {detail}")
            }
            Self::Oracle(error) => write!(f, "reference oracle failed: {error}"),
            Self::DeviceFailed {
                scenario,
                device,
                failure,
                ..
            } => write!(f, "scenario {scenario} failed on {device}: {failure}"),
        }
    }
}

impl std::error::Error for VerificationError {}

impl From<ConfigurationError> for VerificationError {
    fn from(value: ConfigurationError) -> Self {
        Self::Configuration(value)
    }
}

impl From<OracleError> for VerificationError {
    fn from(value: OracleError) -> Self {
        Self::Oracle(value)
    }
}

/// Runs scenarios against a resolver, compiler and runtime.
pub struct Harness<'a> {
    resolver: &'a dyn TargetResolver,
    compiler: &'a dyn Compiler,
    runtime: &'a dyn DeviceRuntime,
    config: HarnessConfig,
}

impl fmt::Debug for Harness<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harness")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'a> Harness<'a> {
    #[must_use]
    pub fn new(
        resolver: &'a dyn TargetResolver,
        compiler: &'a dyn Compiler,
        runtime: &'a dyn DeviceRuntime,
        config: HarnessConfig,
    ) -> Self {
        Self {
            resolver,
            compiler,
            runtime,
            config,
        }
    }

    /// Harness over a single backend that plays all three roles.
    #[must_use]
    pub fn with_backend<B>(backend: &'a B, config: HarnessConfig) -> Self
    where
        B: TargetResolver + Compiler + DeviceRuntime,
    {
        Self::new(backend, backend, backend, config)
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Attempts every configured device in order. Every device failure is
    /// recorded in the report; none stops the remaining devices.
    #[must_use]
    pub fn run_scenario(&self, scenario: &Scenario) -> ScenarioReport {
        let mut evidence = EvidenceLedger::new();
        let devices = self
            .config
            .devices
            .iter()
            .map(|device| self.run_device(scenario, device, &mut evidence))
            .collect();
        ScenarioReport {
            scenario: scenario.name().to_string(),
            devices,
            evidence,
        }
    }

    /// Runs `scenario` and turns the first failed device into an error.
    pub fn verify(&self, scenario: &Scenario) -> Result<ScenarioReport, VerificationError> {
        let report = self.run_scenario(scenario);
        let failed = report.devices.iter().find_map(|device| match &device.outcome {
            DeviceOutcome::Failed(failure) => Some((device.device.clone(), failure.clone())),
            DeviceOutcome::Passed | DeviceOutcome::Skipped { .. } => None,
        });
        let Some((device, failure)) = failed else {
            return Ok(report);
        };
        Err(VerificationError::DeviceFailed {
            scenario: report.scenario.clone(),
            device,
            failure,
            report: Box::new(report),
        })
    }

    fn run_device(
        &self,
        scenario: &Scenario,
        device: &DeviceId,
        evidence: &mut EvidenceLedger,
    ) -> DeviceReport {
        let started = Instant::now();
        let mut trace = vec![DeviceState::Init];
        let mut comparisons = Vec::new();
        let mut output_digests = Vec::new();

        let resolution = self.resolver.resolve_target(device);
        evidence.record(
            EvidenceKind::Resolve,
            format!("{device}: available={}", resolution.available),
        );

        let outcome = if resolution.available {
            let context = DeviceContext::primary(device.clone());
            match self.attempt(
                scenario,
                &resolution.target,
                &context,
                &mut trace,
                &mut comparisons,
                &mut output_digests,
                evidence,
            ) {
                Ok(()) => {
                    trace.push(DeviceState::Done);
                    DeviceOutcome::Passed
                }
                Err(failure) => {
                    trace.push(DeviceState::Failed);
                    DeviceOutcome::Failed(failure)
                }
            }
        } else {
            trace.push(DeviceState::Skipped);
            evidence.record(
                EvidenceKind::Skip,
                format!("{}: skip {device}, device is not enabled", scenario.name()),
            );
            DeviceOutcome::Skipped {
                reason: format!("device {device} is not enabled"),
            }
        };

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let log = self.device_log(
            scenario,
            device,
            &outcome,
            &trace,
            &comparisons,
            output_digests,
            duration_ms,
        );
        DeviceReport {
            device: device.clone(),
            outcome,
            trace,
            comparisons,
            log,
        }
    }

    /// BUILD, EXECUTE and COMPARE for every check on one available device.
    /// The first failure ends this device's branch only.
    #[allow(clippy::too_many_arguments)]
    fn attempt(
        &self,
        scenario: &Scenario,
        target: &TargetDescriptor,
        context: &DeviceContext,
        trace: &mut Vec<DeviceState>,
        comparisons: &mut Vec<ComparisonSummary>,
        output_digests: &mut Vec<String>,
        evidence: &mut EvidenceLedger,
    ) -> Result<(), DeviceFailure> {
        let device = context.device_id();
        for check in scenario.checks() {
            let label = check.label();

            trace.push(DeviceState::Build);
            let artifact = match build(self.compiler, check.node(), target, label, false) {
                Ok(artifact) => artifact,
                Err(error) => {
                    evidence.record(EvidenceKind::Build, format!("{device}/{label}: {error}"));
                    return Err(DeviceFailure::Build {
                        check: label.to_string(),
                        error,
                    });
                }
            };
            evidence.record(
                EvidenceKind::Build,
                format!("{device}/{label}: built {}", artifact.name()),
            );

            trace.push(DeviceState::Execute);
            let output = match execute(self.runtime, &artifact, context, check.inputs()) {
                Ok(output) => output,
                Err(ExecuteError::Runtime(error)) => {
                    evidence.record(EvidenceKind::Execute, format!("{device}/{label}: {error}"));
                    return Err(DeviceFailure::Execute {
                        check: label.to_string(),
                        error,
                    });
                }
                // Inputs already match the node, so the artifact disagrees with it.
                Err(drift) => {
                    let error = signature_drift(check.node(), &drift);
                    evidence.record(EvidenceKind::Build, format!("{device}/{label}: {error}"));
                    return Err(DeviceFailure::Build {
                        check: label.to_string(),
                        error,
                    });
                }
            };
            drop(artifact);
            output_digests.push(buffer_digest(&output));
            evidence.record(
                EvidenceKind::Execute,
                format!("{device}/{label}: {} element(s)", output.numel()),
            );

            trace.push(DeviceState::Compare);
            match compare(&output, check.expected(), &self.config.tolerance) {
                Ok(summary) => {
                    evidence.record(
                        EvidenceKind::Compare,
                        format!(
                            "{device}/{label}: ok, max_abs_error={}",
                            summary.max_abs_error
                        ),
                    );
                    comparisons.push(summary);
                }
                Err(violation) => {
                    evidence.record(
                        EvidenceKind::Compare,
                        format!("{device}/{label}: {violation}"),
                    );
                    return Err(DeviceFailure::Tolerance {
                        check: label.to_string(),
                        violation,
                    });
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn device_log(
        &self,
        scenario: &Scenario,
        device: &DeviceId,
        outcome: &DeviceOutcome,
        trace: &[DeviceState],
        comparisons: &[ComparisonSummary],
        output_digests: Vec<String>,
        duration_ms: u64,
    ) -> StructuredCaseLog {
        let reason_code = match outcome {
            DeviceOutcome::Passed => "parity_ok",
            DeviceOutcome::Skipped { .. } => "device_unavailable",
            DeviceOutcome::Failed(failure) => failure.reason_code(),
        };
        let input_digests = scenario
            .checks()
            .iter()
            .flat_map(|check| check.inputs().iter().map(buffer_digest))
            .collect();

        let mut extra_fields = BTreeMap::new();
        extra_fields.insert("trace".to_string(), json!(trace));
        extra_fields.insert("comparisons".to_string(), json!(comparisons));
        extra_fields.insert(
            "checks".to_string(),
            json!(
                scenario
                    .checks()
                    .iter()
                    .map(ScenarioCheck::label)
                    .collect::<Vec<_>>()
            ),
        );
        extra_fields.insert("rtol".to_string(), json!(self.config.tolerance.rtol));
        match outcome {
            DeviceOutcome::Skipped { reason } => {
                extra_fields.insert("skip_reason".to_string(), json!(reason));
            }
            DeviceOutcome::Failed(failure) => {
                extra_fields.insert("failure".to_string(), failure.forensic_value());
            }
            DeviceOutcome::Passed => {}
        }

        StructuredCaseLog::new(
            scenario.name(),
            device.as_str(),
            scenario.seed(),
            self.config
                .replay_command(device, scenario.name(), scenario.seed()),
            outcome.label(),
            reason_code,
        )
        .with_digests(input_digests, output_digests)
        .with_duration_ms(duration_ms)
        .with_artifact_refs(
            self.config
                .catalog
                .iter()
                .map(|catalog| catalog.display().to_string())
                .collect(),
        )
        .with_extra_fields(extra_fields)
    }
}

/// Restates an input-binding rejection as the artifact-vs-node mismatch it is.
fn signature_drift(node: &OperatorNode, error: &ExecuteError) -> BuildError {
    let declared = node.io_descriptors();
    match error {
        ExecuteError::InputCount { expected, .. } => BuildError::ArityMismatch {
            expected: declared.len(),
            actual: expected + 1,
        },
        ExecuteError::Precondition {
            position, expected, ..
        } => BuildError::SignatureMismatch {
            position: *position,
            expected: declared
                .get(*position)
                .map_or_else(String::new, ToString::to_string),
            actual: expected.to_string(),
        },
        ExecuteError::Runtime(error) => BuildError::Backend(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use tc_core::{DType, TensorDescriptor};
    use tc_op::elemwise_sum;
    use tc_runtime::{BuildError, ExecuteError};

    use super::signature_drift;

    #[test]
    fn binding_rejections_become_build_failures() {
        let desc = TensorDescriptor::new(vec![2], DType::F32, "data0").expect("descriptor");
        let node = elemwise_sum(&[desc.clone(), desc.renamed("data1")], 2).expect("node");
        let wide = TensorDescriptor::new(vec![2], DType::F64, "data0").expect("descriptor");

        let err = signature_drift(
            &node,
            &ExecuteError::Precondition {
                position: 0,
                expected: wide,
                actual_shape: vec![2],
                actual_dtype: DType::F32,
            },
        );
        assert_eq!(
            err,
            BuildError::SignatureMismatch {
                position: 0,
                expected: "data0[2]:float32".to_string(),
                actual: "data0[2]:float64".to_string(),
            }
        );

        let err = signature_drift(
            &node,
            &ExecuteError::InputCount {
                expected: 3,
                actual: 2,
            },
        );
        assert_eq!(
            err,
            BuildError::ArityMismatch {
                expected: 3,
                actual: 4
            }
        );
    }
}
