#![forbid(unsafe_code)]

use std::fmt;

use tc_core::{BufferError, DType, HostBuffer, TensorDescriptor};
use tc_device::{DeviceContext, DeviceError, DeviceId, TargetDescriptor};
use tc_op::{OperatorKind, OperatorNode};

#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    target: TargetDescriptor,
    outputs: Vec<OperatorNode>,
    optimize: bool,
}

impl Schedule {
    #[must_use]
    pub fn new(target: TargetDescriptor, outputs: Vec<OperatorNode>, optimize: bool) -> Self {
        Self {
            target,
            outputs,
            optimize,
        }
    }

    #[must_use]
    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    #[must_use]
    pub fn outputs(&self) -> &[OperatorNode] {
        &self.outputs
    }

    #[must_use]
    pub fn optimize(&self) -> bool {
        self.optimize
    }
}

/// Device-resident array bound to one device context.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceBuffer {
    context: DeviceContext,
    storage: HostBuffer,
}

impl DeviceBuffer {
    #[must_use]
    pub fn new(context: DeviceContext, storage: HostBuffer) -> Self {
        Self { context, storage }
    }

    #[must_use]
    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    #[must_use]
    pub fn storage(&self) -> &HostBuffer {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut HostBuffer {
        &mut self.storage
    }

    #[must_use]
    pub fn into_storage(self) -> HostBuffer {
        self.storage
    }
}

/// Lowered code of one artifact. `args` holds the inputs in declaration
/// order followed by the pre-allocated output.
pub trait KernelProgram: fmt::Debug + Send + Sync {
    fn launch(&self, args: &mut [DeviceBuffer]) -> Result<(), RuntimeExecutionError>;
}

#[derive(Debug)]
pub struct ExecutableArtifact {
    name: String,
    target: TargetDescriptor,
    params: Vec<TensorDescriptor>,
    program: Box<dyn KernelProgram>,
}

impl ExecutableArtifact {
    /// `params` lists the inputs followed by the output; it cannot be empty.
    pub fn new(
        name: impl Into<String>,
        target: TargetDescriptor,
        params: Vec<TensorDescriptor>,
        program: Box<dyn KernelProgram>,
    ) -> Result<Self, BuildError> {
        if params.is_empty() {
            return Err(BuildError::ArityMismatch {
                expected: 1,
                actual: 0,
            });
        }
        Ok(Self {
            name: name.into(),
            target,
            params,
            program,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    #[must_use]
    pub fn params(&self) -> &[TensorDescriptor] {
        &self.params
    }

    #[must_use]
    pub fn input_params(&self) -> &[TensorDescriptor] {
        &self.params[..self.params.len() - 1]
    }

    #[must_use]
    pub fn output_param(&self) -> &TensorDescriptor {
        &self.params[self.params.len() - 1]
    }

    #[must_use]
    pub fn program(&self) -> &dyn KernelProgram {
        self.program.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    NoLowering {
        target: String,
        kind: OperatorKind,
    },
    EmptySchedule,
    MultipleOutputs {
        count: usize,
    },
    ArityMismatch {
        expected: usize,
        actual: usize,
    },
    SignatureMismatch {
        position: usize,
        expected: String,
        actual: String,
    },
    TargetMismatch {
        scheduled: String,
        requested: String,
    },
    Backend(String),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoLowering { target, kind } => {
                write!(f, "no lowering of {kind} for target {target}")
            }
            Self::EmptySchedule => write!(f, "schedule has no outputs to compile"),
            Self::MultipleOutputs { count } => {
                write!(f, "schedule has {count} outputs, expected exactly one")
            }
            Self::ArityMismatch { expected, actual } => write!(
                f,
                "artifact signature expects {expected} parameter(s), got {actual}"
            ),
            Self::SignatureMismatch {
                position,
                expected,
                actual,
            } => write!(
                f,
                "artifact parameter {position} is {actual}, operator declares {expected}"
            ),
            Self::TargetMismatch {
                scheduled,
                requested,
            } => write!(
                f,
                "schedule was synthesized for {scheduled} but compiled for {requested}"
            ),
            Self::Backend(message) => write!(f, "backend build failure: {message}"),
        }
    }
}

impl std::error::Error for BuildError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeExecutionError {
    ArgumentCount { expected: usize, actual: usize },
    Device(DeviceError),
    Buffer(BufferError),
    UnsupportedDType { dtype: DType },
    Launch(String),
}

impl fmt::Display for RuntimeExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArgumentCount { expected, actual } => write!(
                f,
                "artifact launched with {actual} buffer(s), expected {expected}"
            ),
            Self::Device(error) => write!(f, "device placement failure: {error}"),
            Self::Buffer(error) => write!(f, "buffer failure: {error}"),
            Self::UnsupportedDType { dtype } => {
                write!(f, "runtime cannot allocate {dtype} buffers")
            }
            Self::Launch(message) => write!(f, "kernel launch failed: {message}"),
        }
    }
}

impl std::error::Error for RuntimeExecutionError {}

impl From<DeviceError> for RuntimeExecutionError {
    fn from(value: DeviceError) -> Self {
        Self::Device(value)
    }
}

impl From<BufferError> for RuntimeExecutionError {
    fn from(value: BufferError) -> Self {
        Self::Buffer(value)
    }
}

/// Failure of [`execute`]. `Precondition` and `InputCount` are caller bugs
/// and must not be treated as device failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteError {
    InputCount {
        expected: usize,
        actual: usize,
    },
    Precondition {
        position: usize,
        expected: TensorDescriptor,
        actual_shape: Vec<usize>,
        actual_dtype: DType,
    },
    Runtime(RuntimeExecutionError),
}

impl fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputCount { expected, actual } => write!(
                f,
                "artifact declares {expected} input(s), {actual} buffer(s) were bound"
            ),
            Self::Precondition {
                position,
                expected,
                actual_shape,
                actual_dtype,
            } => write!(
                f,
                "input {position} is {actual_shape:?}:{actual_dtype}, artifact declares {expected}"
            ),
            Self::Runtime(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for ExecuteError {}

impl From<RuntimeExecutionError> for ExecuteError {
    fn from(value: RuntimeExecutionError) -> Self {
        Self::Runtime(value)
    }
}

/// Compiler collaborator: schedule synthesis and lowering to an artifact.
pub trait Compiler {
    fn synthesize_schedule(
        &self,
        target: &TargetDescriptor,
        outputs: &[OperatorNode],
        optimize: bool,
    ) -> Result<Schedule, BuildError>;

    fn compile(
        &self,
        schedule: &Schedule,
        io_descriptors: &[TensorDescriptor],
        device: &DeviceId,
        name: &str,
    ) -> Result<ExecutableArtifact, BuildError>;
}

impl<T: Compiler + ?Sized> Compiler for &T {
    fn synthesize_schedule(
        &self,
        target: &TargetDescriptor,
        outputs: &[OperatorNode],
        optimize: bool,
    ) -> Result<Schedule, BuildError> {
        (**self).synthesize_schedule(target, outputs, optimize)
    }

    fn compile(
        &self,
        schedule: &Schedule,
        io_descriptors: &[TensorDescriptor],
        device: &DeviceId,
        name: &str,
    ) -> Result<ExecutableArtifact, BuildError> {
        (**self).compile(schedule, io_descriptors, device, name)
    }
}

/// Device runtime collaborator. Calls may block until the device finishes.
pub trait DeviceRuntime {
    fn allocate_device_buffer(
        &self,
        desc: &TensorDescriptor,
        context: &DeviceContext,
    ) -> Result<DeviceBuffer, RuntimeExecutionError>;

    fn copy_from_host(
        &self,
        buffer: &mut DeviceBuffer,
        host: &HostBuffer,
    ) -> Result<(), RuntimeExecutionError>;

    fn invoke(
        &self,
        artifact: &ExecutableArtifact,
        buffers: &mut [DeviceBuffer],
    ) -> Result<(), RuntimeExecutionError>;

    fn read_back(&self, buffer: &DeviceBuffer) -> Result<HostBuffer, RuntimeExecutionError>;
}

impl<T: DeviceRuntime + ?Sized> DeviceRuntime for &T {
    fn allocate_device_buffer(
        &self,
        desc: &TensorDescriptor,
        context: &DeviceContext,
    ) -> Result<DeviceBuffer, RuntimeExecutionError> {
        (**self).allocate_device_buffer(desc, context)
    }

    fn copy_from_host(
        &self,
        buffer: &mut DeviceBuffer,
        host: &HostBuffer,
    ) -> Result<(), RuntimeExecutionError> {
        (**self).copy_from_host(buffer, host)
    }

    fn invoke(
        &self,
        artifact: &ExecutableArtifact,
        buffers: &mut [DeviceBuffer],
    ) -> Result<(), RuntimeExecutionError> {
        (**self).invoke(artifact, buffers)
    }

    fn read_back(&self, buffer: &DeviceBuffer) -> Result<HostBuffer, RuntimeExecutionError> {
        (**self).read_back(buffer)
    }
}

/// Positional shape and dtype agreement between `declared` and `actual`.
pub fn check_signature(
    declared: &[TensorDescriptor],
    actual: &[TensorDescriptor],
) -> Result<(), BuildError> {
    if declared.len() != actual.len() {
        return Err(BuildError::ArityMismatch {
            expected: declared.len(),
            actual: actual.len(),
        });
    }
    for (position, (expected, actual)) in declared.iter().zip(actual).enumerate() {
        if !expected.same_signature(actual) {
            return Err(BuildError::SignatureMismatch {
                position,
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
    }
    Ok(())
}

/// Schedules `node` for `target` and compiles it under `name`.
///
/// The artifact signature must be the node inputs followed by its output;
/// an artifact that declares anything else is rejected as a build failure.
pub fn build<C: Compiler + ?Sized>(
    compiler: &C,
    node: &OperatorNode,
    target: &TargetDescriptor,
    name: &str,
    optimize: bool,
) -> Result<ExecutableArtifact, BuildError> {
    let declared = node.io_descriptors();
    let schedule = compiler.synthesize_schedule(target, std::slice::from_ref(node), optimize)?;
    let artifact = compiler.compile(&schedule, &declared, target.device_id(), name)?;
    check_signature(&declared, artifact.params())?;
    Ok(artifact)
}

/// Runs `artifact` once on fresh device buffers and returns the output.
///
/// Inputs are bound in the artifact's declaration order and the output
/// buffer is appended last. All device buffers are released on return.
pub fn execute<R: DeviceRuntime + ?Sized>(
    runtime: &R,
    artifact: &ExecutableArtifact,
    context: &DeviceContext,
    inputs: &[HostBuffer],
) -> Result<HostBuffer, ExecuteError> {
    let declared = artifact.input_params();
    if inputs.len() != declared.len() {
        return Err(ExecuteError::InputCount {
            expected: declared.len(),
            actual: inputs.len(),
        });
    }
    for (position, (host, desc)) in inputs.iter().zip(declared).enumerate() {
        if !host.matches(desc) {
            return Err(ExecuteError::Precondition {
                position,
                expected: desc.clone(),
                actual_shape: host.shape().to_vec(),
                actual_dtype: host.dtype(),
            });
        }
    }

    let mut buffers = Vec::with_capacity(artifact.params().len());
    for (host, desc) in inputs.iter().zip(declared) {
        let mut buffer = runtime.allocate_device_buffer(desc, context)?;
        runtime.copy_from_host(&mut buffer, host)?;
        buffers.push(buffer);
    }
    buffers.push(runtime.allocate_device_buffer(artifact.output_param(), context)?);

    runtime.invoke(artifact, &mut buffers)?;

    let output = &buffers[buffers.len() - 1];
    Ok(runtime.read_back(output)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceKind {
    Resolve,
    Skip,
    Build,
    Execute,
    Compare,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceEntry {
    pub ts_unix_ms: u64,
    pub kind: EvidenceKind,
    pub summary: String,
}

/// Append-only record of what happened during one scenario.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvidenceLedger {
    entries: Vec<EvidenceEntry>,
}

impl EvidenceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: EvidenceKind, summary: impl Into<String>) {
        self.entries.push(EvidenceEntry {
            ts_unix_ms: now_unix_ms(),
            kind,
            summary: summary.into(),
        });
    }

    #[must_use]
    pub fn entries(&self) -> &[EvidenceEntry] {
        &self.entries
    }

    pub fn of_kind(&self, kind: EvidenceKind) -> impl Iterator<Item = &EvidenceEntry> {
        self.entries.iter().filter(move |entry| entry.kind == kind)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Milliseconds since the Unix epoch, saturating at `u64::MAX` and `0` for
/// clocks set before the epoch. Shared by evidence entries and case logs.
#[must_use]
pub fn now_unix_ms() -> u64 {
    let now = std::time::SystemTime::now();
    now.duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |duration| {
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tc_core::{DType, HostBuffer, TensorDescriptor};
    use tc_device::{DeviceContext, DeviceGuard, DeviceId, TargetDescriptor};
    use tc_op::{OperatorNode, elemwise_sum};

    use super::{
        BuildError, Compiler, DeviceBuffer, DeviceRuntime, EvidenceKind, EvidenceLedger,
        ExecutableArtifact, ExecuteError, KernelProgram, RuntimeExecutionError, Schedule, build,
        check_signature, execute, now_unix_ms,
    };

    /// Writes `args[0] - args[1]` into the output so binding order is observable.
    #[derive(Debug)]
    struct SubtractProgram {
        guard: DeviceGuard,
    }

    impl KernelProgram for SubtractProgram {
        fn launch(&self, args: &mut [DeviceBuffer]) -> Result<(), RuntimeExecutionError> {
            if args.len() != 3 {
                return Err(RuntimeExecutionError::ArgumentCount {
                    expected: 3,
                    actual: args.len(),
                });
            }
            for arg in args.iter() {
                self.guard.ensure_context(arg.context())?;
            }
            let lhs = args[0].storage().typed::<f32>()?.to_vec();
            let rhs = args[1].storage().typed::<f32>()?.to_vec();
            let out = args[2]
                .storage_mut()
                .as_mut_slice::<f32>()
                .ok_or_else(|| RuntimeExecutionError::Launch("output dtype".to_string()))?;
            for ((slot, l), r) in out.iter_mut().zip(lhs).zip(rhs) {
                *slot = l - r;
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingRuntime {
        allocations: Mutex<Vec<String>>,
    }

    impl DeviceRuntime for RecordingRuntime {
        fn allocate_device_buffer(
            &self,
            desc: &TensorDescriptor,
            context: &DeviceContext,
        ) -> Result<DeviceBuffer, RuntimeExecutionError> {
            self.allocations
                .lock()
                .expect("allocation log lock")
                .push(desc.name().to_string());
            Ok(DeviceBuffer::new(
                context.clone(),
                HostBuffer::for_descriptor(desc),
            ))
        }

        fn copy_from_host(
            &self,
            buffer: &mut DeviceBuffer,
            host: &HostBuffer,
        ) -> Result<(), RuntimeExecutionError> {
            *buffer.storage_mut() = host.clone();
            Ok(())
        }

        fn invoke(
            &self,
            artifact: &ExecutableArtifact,
            buffers: &mut [DeviceBuffer],
        ) -> Result<(), RuntimeExecutionError> {
            artifact.program().launch(buffers)
        }

        fn read_back(&self, buffer: &DeviceBuffer) -> Result<HostBuffer, RuntimeExecutionError> {
            Ok(buffer.storage().clone())
        }
    }

    fn desc(name: &str) -> TensorDescriptor {
        TensorDescriptor::new(vec![3], DType::F32, name).expect("descriptor")
    }

    fn subtract_artifact(device: &str) -> ExecutableArtifact {
        let target = TargetDescriptor::new(DeviceId::new(device));
        let guard = DeviceGuard::new(DeviceContext::primary(DeviceId::new(device)));
        ExecutableArtifact::new(
            "subtract",
            target,
            vec![desc("a"), desc("b"), desc("out")],
            Box::new(SubtractProgram { guard }),
        )
        .expect("artifact")
    }

    #[test]
    fn execute_binds_inputs_in_order_then_output() {
        let runtime = RecordingRuntime::default();
        let artifact = subtract_artifact("llvm");
        let a = HostBuffer::from_vec(vec![3], vec![10.0f32, 20.0, 30.0]).expect("a");
        let b = HostBuffer::from_vec(vec![3], vec![1.0f32, 2.0, 3.0]).expect("b");

        let out = execute(
            &runtime,
            &artifact,
            &DeviceContext::primary(DeviceId::new("llvm")),
            &[a, b],
        )
        .expect("execution should succeed");

        assert_eq!(out.as_slice::<f32>(), Some(&[9.0, 18.0, 27.0][..]));
        assert_eq!(
            *runtime.allocations.lock().expect("lock"),
            vec!["a".to_string(), "b".to_string(), "out".to_string()]
        );
    }

    #[test]
    fn execute_rejects_wrong_input_signature_before_allocating() {
        let runtime = RecordingRuntime::default();
        let artifact = subtract_artifact("llvm");
        let a = HostBuffer::zeros(&[3], DType::F32);
        let b = HostBuffer::zeros(&[3], DType::I32);

        let err = execute(
            &runtime,
            &artifact,
            &DeviceContext::primary(DeviceId::new("llvm")),
            &[a, b],
        )
        .expect_err("dtype mismatch is a precondition failure");
        assert!(matches!(err, ExecuteError::Precondition { position: 1, .. }));
        assert!(runtime.allocations.lock().expect("lock").is_empty());
    }

    #[test]
    fn execute_rejects_wrong_input_count() {
        let runtime = RecordingRuntime::default();
        let artifact = subtract_artifact("llvm");
        let err = execute(
            &runtime,
            &artifact,
            &DeviceContext::primary(DeviceId::new("llvm")),
            &[HostBuffer::zeros(&[3], DType::F32)],
        )
        .expect_err("missing input must fail");
        assert_eq!(
            err,
            ExecuteError::InputCount {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn execute_surfaces_launch_failures_as_runtime_errors() {
        let runtime = RecordingRuntime::default();
        let artifact = subtract_artifact("cuda");
        let inputs = [
            HostBuffer::zeros(&[3], DType::F32),
            HostBuffer::zeros(&[3], DType::F32),
        ];
        let err = execute(
            &runtime,
            &artifact,
            &DeviceContext::primary(DeviceId::new("llvm")),
            &inputs,
        )
        .expect_err("buffers on the wrong device must fail the launch");
        assert!(matches!(
            err,
            ExecuteError::Runtime(RuntimeExecutionError::Device(_))
        ));
    }

    #[test]
    fn artifact_requires_an_output_parameter() {
        #[derive(Debug)]
        struct Noop;
        impl KernelProgram for Noop {
            fn launch(&self, _args: &mut [DeviceBuffer]) -> Result<(), RuntimeExecutionError> {
                Ok(())
            }
        }

        let err = ExecutableArtifact::new(
            "empty",
            TargetDescriptor::new(DeviceId::new("llvm")),
            Vec::new(),
            Box::new(Noop),
        )
        .expect_err("empty signature must fail");
        assert!(matches!(err, BuildError::ArityMismatch { .. }));
    }

    struct ScheduleOnly;

    impl Compiler for ScheduleOnly {
        fn synthesize_schedule(
            &self,
            target: &TargetDescriptor,
            outputs: &[OperatorNode],
            optimize: bool,
        ) -> Result<Schedule, BuildError> {
            Ok(Schedule::new(target.clone(), outputs.to_vec(), optimize))
        }

        fn compile(
            &self,
            schedule: &Schedule,
            io_descriptors: &[TensorDescriptor],
            device: &DeviceId,
            name: &str,
        ) -> Result<ExecutableArtifact, BuildError> {
            Err(BuildError::Backend(format!(
                "{name}: {} params for {device}, optimize={}",
                io_descriptors.len(),
                schedule.optimize()
            )))
        }
    }

    #[test]
    fn build_passes_node_signature_to_compile() {
        let inputs = vec![desc("data0"), desc("data1")];
        let node = elemwise_sum(&inputs, 2).expect("node");
        let target = TargetDescriptor::new(DeviceId::new("opencl"));
        let err = build(&ScheduleOnly, &node, &target, "elemwise_sum", false)
            .expect_err("stub compiler always fails");
        assert_eq!(
            err,
            BuildError::Backend("elemwise_sum: 3 params for opencl, optimize=false".to_string())
        );
    }

    /// Compiles every node into the float32 subtract artifact, whatever the
    /// node declares.
    struct FixedSignature;

    impl Compiler for FixedSignature {
        fn synthesize_schedule(
            &self,
            target: &TargetDescriptor,
            outputs: &[OperatorNode],
            optimize: bool,
        ) -> Result<Schedule, BuildError> {
            Ok(Schedule::new(target.clone(), outputs.to_vec(), optimize))
        }

        fn compile(
            &self,
            _schedule: &Schedule,
            _io_descriptors: &[TensorDescriptor],
            device: &DeviceId,
            _name: &str,
        ) -> Result<ExecutableArtifact, BuildError> {
            Ok(subtract_artifact(device.as_str()))
        }
    }

    #[test]
    fn build_rejects_artifact_whose_signature_drifts_from_the_node() {
        let target = TargetDescriptor::new(DeviceId::new("cuda"));

        let matching = elemwise_sum(&[desc("data0"), desc("data1")], 2).expect("node");
        let artifact =
            build(&FixedSignature, &matching, &target, "elemwise_sum", false).expect("same signature");
        assert_eq!(artifact.params().len(), 3);

        let wide = TensorDescriptor::new(vec![3], DType::F64, "data0").expect("descriptor");
        let drifted = elemwise_sum(&[wide.clone(), wide.renamed("data1")], 2).expect("node");
        let err = build(&FixedSignature, &drifted, &target, "elemwise_sum", false)
            .expect_err("float32 artifact for a float64 node");
        assert!(matches!(err, BuildError::SignatureMismatch { position: 0, .. }));

        let single = elemwise_sum(&[desc("data0")], 1).expect("node");
        let err = build(&FixedSignature, &single, &target, "elemwise_sum", false)
            .expect_err("three params for a two-param node");
        assert_eq!(
            err,
            BuildError::ArityMismatch {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn signature_check_ignores_names() {
        let declared = [desc("data0"), desc("out")];
        assert_eq!(check_signature(&declared, &[desc("a"), desc("b")]), Ok(()));
    }

    #[test]
    fn ledger_filters_by_kind() {
        let mut ledger = EvidenceLedger::new();
        ledger.record(EvidenceKind::Resolve, "llvm available");
        ledger.record(EvidenceKind::Skip, "cuda unavailable");
        ledger.record(EvidenceKind::Skip, "metal unavailable");

        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.of_kind(EvidenceKind::Skip).count(), 2);
        assert!(ledger.entries()[0].summary.contains("llvm"));
    }

    #[test]
    fn ledger_timestamps_share_the_exported_clock() {
        let before = now_unix_ms();
        let mut ledger = EvidenceLedger::new();
        ledger.record(EvidenceKind::Build, "llvm/full: built full");
        let after = now_unix_ms();

        let stamp = ledger.entries()[0].ts_unix_ms;
        assert!(before <= stamp && stamp <= after);
    }
}
