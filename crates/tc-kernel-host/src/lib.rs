#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use tc_core::{BufferError, DType, Element, HostBuffer, TensorDescriptor};
use tc_device::{
    DeviceContext, DeviceGuard, DeviceId, Resolution, TargetDescriptor, TargetResolver,
};
use tc_op::{OperatorNode, OperatorParams, Relation};
use tc_runtime::{
    BuildError, Compiler, DeviceBuffer, DeviceRuntime, ExecutableArtifact, KernelProgram,
    RuntimeExecutionError, Schedule, check_signature,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    NoOperands,
    ArgumentCount {
        expected: usize,
        actual: usize,
    },
    LengthMismatch {
        operand: usize,
        expected: usize,
        actual: usize,
    },
    OutputDType {
        expected: DType,
        actual: DType,
    },
    Buffer(BufferError),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoOperands => write!(f, "kernel launched without operands"),
            Self::ArgumentCount { expected, actual } => {
                write!(f, "kernel expects {expected} argument(s), got {actual}")
            }
            Self::LengthMismatch {
                operand,
                expected,
                actual,
            } => write!(
                f,
                "operand {operand} length mismatch: expected={expected}, actual={actual}"
            ),
            Self::OutputDType { expected, actual } => {
                write!(f, "output dtype mismatch: expected={expected}, actual={actual}")
            }
            Self::Buffer(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for KernelError {}

impl From<BufferError> for KernelError {
    fn from(value: BufferError) -> Self {
        Self::Buffer(value)
    }
}

impl From<KernelError> for RuntimeExecutionError {
    fn from(value: KernelError) -> Self {
        match value {
            KernelError::ArgumentCount { expected, actual } => {
                Self::ArgumentCount { expected, actual }
            }
            KernelError::Buffer(error) => Self::Buffer(error),
            other => Self::Launch(other.to_string()),
        }
    }
}

fn ensure_len(operand: usize, expected: usize, actual: usize) -> Result<(), KernelError> {
    if expected != actual {
        return Err(KernelError::LengthMismatch {
            operand,
            expected,
            actual,
        });
    }
    Ok(())
}

/// `out[i] = operands[0][i] + ... + operands[n-1][i]`, summed left to right.
pub fn elemwise_sum_contiguous<T: Element>(
    operands: &[&[T]],
    out: &mut [T],
) -> Result<(), KernelError> {
    let Some((first, rest)) = operands.split_first() else {
        return Err(KernelError::NoOperands);
    };
    ensure_len(0, out.len(), first.len())?;
    for (offset, operand) in rest.iter().enumerate() {
        ensure_len(offset + 1, out.len(), operand.len())?;
    }

    out.copy_from_slice(first);
    for operand in rest {
        for (slot, value) in out.iter_mut().zip(operand.iter()) {
            *slot = slot.accumulate(*value);
        }
    }
    Ok(())
}

pub fn fill_contiguous<T: Element>(out: &mut [T], value: f64) {
    out.fill(T::from_f64(value));
}

/// Writes one where `relation` holds for the pair and zero elsewhere.
pub fn compare_contiguous<T: Element, U: Element>(
    relation: Relation,
    lhs: &[T],
    rhs: &[T],
    out: &mut [U],
) -> Result<(), KernelError> {
    ensure_len(0, out.len(), lhs.len())?;
    ensure_len(1, out.len(), rhs.len())?;
    for ((slot, left), right) in out.iter_mut().zip(lhs).zip(rhs) {
        *slot = if relation.holds(*left, *right) {
            U::one()
        } else {
            U::zero()
        };
    }
    Ok(())
}

fn typed_out<T: Element>(out: &mut HostBuffer) -> Result<&mut [T], KernelError> {
    let actual = out.dtype();
    out.as_mut_slice::<T>().ok_or(KernelError::OutputDType {
        expected: T::DTYPE,
        actual,
    })
}

fn sum_typed<T: Element>(inputs: &[DeviceBuffer], out: &mut HostBuffer) -> Result<(), KernelError> {
    let operands = inputs
        .iter()
        .map(|buffer| buffer.storage().typed::<T>())
        .collect::<Result<Vec<_>, _>>()?;
    elemwise_sum_contiguous(&operands, typed_out::<T>(out)?)
}

fn fill_typed<T: Element>(out: &mut HostBuffer, value: f64) -> Result<(), KernelError> {
    fill_contiguous(typed_out::<T>(out)?, value);
    Ok(())
}

fn compare_typed<T: Element>(
    relation: Relation,
    lhs: &HostBuffer,
    rhs: &HostBuffer,
    out: &mut HostBuffer,
) -> Result<(), KernelError> {
    let lhs = lhs.typed::<T>()?;
    let rhs = rhs.typed::<T>()?;
    match out.dtype() {
        DType::F32 => compare_contiguous(relation, lhs, rhs, typed_out::<f32>(out)?),
        DType::F64 => compare_contiguous(relation, lhs, rhs, typed_out::<f64>(out)?),
        DType::I32 => compare_contiguous(relation, lhs, rhs, typed_out::<i32>(out)?),
        DType::I64 => compare_contiguous(relation, lhs, rhs, typed_out::<i64>(out)?),
    }
}

/// Lowered form of one operator on the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostProgram {
    ElemwiseSum { operands: usize },
    Fill { value: f64 },
    Compare { relation: Relation },
}

impl HostProgram {
    #[must_use]
    pub fn lower(params: &OperatorParams) -> Self {
        match params {
            OperatorParams::Sum { operand_count } => Self::ElemwiseSum {
                operands: *operand_count,
            },
            OperatorParams::Full { fill_value, .. } | OperatorParams::FullLike { fill_value, .. } => {
                Self::Fill { value: *fill_value }
            }
            OperatorParams::Compare { relation, .. } => Self::Compare {
                relation: *relation,
            },
        }
    }

    fn run(&self, args: &mut [DeviceBuffer]) -> Result<(), KernelError> {
        let Some((out, inputs)) = args.split_last_mut() else {
            return Err(KernelError::ArgumentCount {
                expected: 1,
                actual: 0,
            });
        };
        let out = out.storage_mut();
        match self {
            Self::ElemwiseSum { operands } => {
                if inputs.len() != *operands {
                    return Err(KernelError::ArgumentCount {
                        expected: operands + 1,
                        actual: inputs.len() + 1,
                    });
                }
                let Some(first) = inputs.first() else {
                    return Err(KernelError::NoOperands);
                };
                match first.storage().dtype() {
                    DType::F32 => sum_typed::<f32>(inputs, out),
                    DType::F64 => sum_typed::<f64>(inputs, out),
                    DType::I32 => sum_typed::<i32>(inputs, out),
                    DType::I64 => sum_typed::<i64>(inputs, out),
                }
            }
            // FULL_LIKE binds its source as an input; only the output is written.
            Self::Fill { value } => match out.dtype() {
                DType::F32 => fill_typed::<f32>(out, *value),
                DType::F64 => fill_typed::<f64>(out, *value),
                DType::I32 => fill_typed::<i32>(out, *value),
                DType::I64 => fill_typed::<i64>(out, *value),
            },
            Self::Compare { relation } => {
                let [lhs, rhs] = inputs else {
                    return Err(KernelError::ArgumentCount {
                        expected: 3,
                        actual: inputs.len() + 1,
                    });
                };
                let (lhs, rhs) = (lhs.storage(), rhs.storage());
                match lhs.dtype() {
                    DType::F32 => compare_typed::<f32>(*relation, lhs, rhs, out),
                    DType::F64 => compare_typed::<f64>(*relation, lhs, rhs, out),
                    DType::I32 => compare_typed::<i32>(*relation, lhs, rhs, out),
                    DType::I64 => compare_typed::<i64>(*relation, lhs, rhs, out),
                }
            }
        }
    }
}

/// A [`HostProgram`] pinned to the device it was compiled for.
#[derive(Debug)]
pub struct HostKernel {
    program: HostProgram,
    guard: DeviceGuard,
}

impl HostKernel {
    #[must_use]
    pub fn new(program: HostProgram, context: DeviceContext) -> Self {
        Self {
            program,
            guard: DeviceGuard::new(context),
        }
    }

    #[must_use]
    pub fn program(&self) -> &HostProgram {
        &self.program
    }
}

impl KernelProgram for HostKernel {
    fn launch(&self, args: &mut [DeviceBuffer]) -> Result<(), RuntimeExecutionError> {
        for arg in args.iter() {
            self.guard.ensure_context(arg.context())?;
        }
        self.program.run(args)?;
        Ok(())
    }
}

/// In-process backend that resolves, compiles and runs operators on the host.
///
/// Only host target kinds have a lowering. With accelerator emulation enabled
/// every available device runs the host kernels, which lets a full device
/// matrix be exercised without hardware.
#[derive(Debug)]
pub struct HostBackend {
    available: BTreeSet<DeviceId>,
    emulate_accelerators: bool,
    launches: AtomicUsize,
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::with_devices(["llvm"])
    }
}

impl HostBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_devices<I, D>(devices: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<DeviceId>,
    {
        Self {
            available: devices.into_iter().map(Into::into).collect(),
            emulate_accelerators: false,
            launches: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_accelerator_emulation(mut self, enabled: bool) -> Self {
        self.emulate_accelerators = enabled;
        self
    }

    #[must_use]
    pub fn is_available(&self, device: &DeviceId) -> bool {
        self.available.contains(device)
    }

    #[must_use]
    pub fn can_lower(&self, target: &TargetDescriptor) -> bool {
        target.kind().is_host() || self.emulate_accelerators
    }

    /// Number of kernel launches issued through [`DeviceRuntime::invoke`].
    #[must_use]
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::Relaxed)
    }
}

impl TargetResolver for HostBackend {
    fn resolve_target(&self, device: &DeviceId) -> Resolution {
        Resolution {
            available: self.is_available(device),
            target: TargetDescriptor::new(device.clone()),
        }
    }
}

impl Compiler for HostBackend {
    fn synthesize_schedule(
        &self,
        target: &TargetDescriptor,
        outputs: &[OperatorNode],
        optimize: bool,
    ) -> Result<Schedule, BuildError> {
        if outputs.is_empty() {
            return Err(BuildError::EmptySchedule);
        }
        Ok(Schedule::new(target.clone(), outputs.to_vec(), optimize))
    }

    fn compile(
        &self,
        schedule: &Schedule,
        io_descriptors: &[TensorDescriptor],
        device: &DeviceId,
        name: &str,
    ) -> Result<ExecutableArtifact, BuildError> {
        let node = match schedule.outputs() {
            [node] => node,
            [] => return Err(BuildError::EmptySchedule),
            many => return Err(BuildError::MultipleOutputs { count: many.len() }),
        };
        let target = schedule.target();
        if target.device_id() != device {
            return Err(BuildError::TargetMismatch {
                scheduled: target.device_id().to_string(),
                requested: device.to_string(),
            });
        }
        if !self.can_lower(target) {
            return Err(BuildError::NoLowering {
                target: device.to_string(),
                kind: node.kind(),
            });
        }

        check_signature(&node.io_descriptors(), io_descriptors)?;

        let kernel = HostKernel::new(
            HostProgram::lower(node.params()),
            DeviceContext::primary(device.clone()),
        );
        ExecutableArtifact::new(
            name,
            target.clone(),
            io_descriptors.to_vec(),
            Box::new(kernel),
        )
    }
}

impl DeviceRuntime for HostBackend {
    fn allocate_device_buffer(
        &self,
        desc: &TensorDescriptor,
        context: &DeviceContext,
    ) -> Result<DeviceBuffer, RuntimeExecutionError> {
        if !self.is_available(context.device_id()) {
            return Err(RuntimeExecutionError::Launch(format!(
                "device {context} is not attached"
            )));
        }
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
        let slot = buffer.storage();
        if slot.dtype() != host.dtype() {
            return Err(BufferError::DTypeMismatch {
                expected: slot.dtype(),
                actual: host.dtype(),
            }
            .into());
        }
        if slot.shape() != host.shape() {
            return Err(BufferError::LengthMismatch {
                expected: slot.numel(),
                actual: host.numel(),
            }
            .into());
        }
        *buffer.storage_mut() = host.clone();
        Ok(())
    }

    fn invoke(
        &self,
        artifact: &ExecutableArtifact,
        buffers: &mut [DeviceBuffer],
    ) -> Result<(), RuntimeExecutionError> {
        if buffers.len() != artifact.params().len() {
            return Err(RuntimeExecutionError::ArgumentCount {
                expected: artifact.params().len(),
                actual: buffers.len(),
            });
        }
        self.launches.fetch_add(1, Ordering::Relaxed);
        artifact.program().launch(buffers)
    }

    fn read_back(&self, buffer: &DeviceBuffer) -> Result<HostBuffer, RuntimeExecutionError> {
        Ok(buffer.storage().clone())
    }
}

#[cfg(test)]
#[allow(clippy::approx_constant)]
mod tests {
    use proptest::prelude::*;
    use tc_core::{DType, HostBuffer, TensorDescriptor};
    use tc_device::{DeviceContext, DeviceId, TargetDescriptor, TargetResolver};
    use tc_op::{Relation, compare, elemwise_sum, full, full_like};
    use tc_runtime::{
        BuildError, DeviceBuffer, ExecuteError, KernelProgram, RuntimeExecutionError, build,
        execute,
    };

    use super::{
        HostBackend, HostKernel, HostProgram, KernelError, compare_contiguous,
        elemwise_sum_contiguous, fill_contiguous,
    };

    fn llvm() -> DeviceContext {
        DeviceContext::primary(DeviceId::new("llvm"))
    }

    fn target(device: &str) -> TargetDescriptor {
        TargetDescriptor::new(DeviceId::new(device))
    }

    fn placeholders(count: usize, shape: &[usize], dtype: DType) -> Vec<TensorDescriptor> {
        (0..count)
            .map(|idx| {
                TensorDescriptor::new(shape.to_vec(), dtype, format!("data{idx}"))
                    .expect("placeholder should build")
            })
            .collect()
    }

    #[test]
    fn elemwise_sum_adds_every_operand() {
        let a = [1.0f32, 2.0, 3.0];
        let b = [10.0f32, 20.0, 30.0];
        let c = [0.5f32, 0.5, 0.5];
        let mut out = [0.0f32; 3];
        elemwise_sum_contiguous(&[a.as_slice(), b.as_slice(), c.as_slice()], &mut out)
            .expect("sum should succeed");
        assert_eq!(out, [11.5, 22.5, 33.5]);
    }

    #[test]
    fn elemwise_sum_of_one_operand_is_a_copy() {
        let a = [4i32, -2, 9];
        let mut out = [0i32; 3];
        elemwise_sum_contiguous(&[a.as_slice()], &mut out).expect("copy should succeed");
        assert_eq!(out, a);
    }

    #[test]
    fn elemwise_sum_rejects_short_operand() {
        let a = [1i64, 2, 3];
        let b = [1i64, 2];
        let mut out = [0i64; 3];
        let err = elemwise_sum_contiguous(&[a.as_slice(), b.as_slice()], &mut out)
            .expect_err("short operand must fail closed");
        assert_eq!(
            err,
            KernelError::LengthMismatch {
                operand: 1,
                expected: 3,
                actual: 2
            }
        );

        let err = elemwise_sum_contiguous::<f64>(&[], &mut [0.0]).expect_err("no operands");
        assert_eq!(err, KernelError::NoOperands);
    }

    #[test]
    fn fill_casts_value_to_element_type() {
        let mut floats = [0.0f32; 4];
        fill_contiguous(&mut floats, 3.14);
        assert!(floats.iter().all(|v| *v == 3.14f32));

        let mut ints = [0i32; 4];
        fill_contiguous(&mut ints, 3.14);
        assert_eq!(ints, [3; 4]);
    }

    #[test]
    fn compare_writes_mask_in_output_type() {
        let lhs = [1.0f64, 5.0, 3.0];
        let rhs = [2.0f64, 5.0, 1.0];
        let mut out = [7i32; 3];
        compare_contiguous(Relation::Less, &lhs, &rhs, &mut out).expect("less");
        assert_eq!(out, [1, 0, 0]);

        let mut out = [7.0f32; 3];
        compare_contiguous(Relation::Greater, &lhs, &rhs, &mut out).expect("greater");
        assert_eq!(out, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn resolver_reports_configured_devices() {
        let backend = HostBackend::new();
        assert!(backend.resolve_target(&DeviceId::new("llvm")).available);
        assert!(!backend.resolve_target(&DeviceId::new("cuda")).available);
    }

    #[test]
    fn sum_builds_and_runs_on_llvm() {
        let backend = HostBackend::new();
        let inputs = placeholders(2, &[2, 2], DType::I32);
        let node = elemwise_sum(&inputs, 2).expect("node");
        let artifact = build(&backend, &node, &target("llvm"), "elemwise_sum", false)
            .expect("llvm has a lowering");
        assert_eq!(artifact.params().len(), 3);

        let a = HostBuffer::from_vec(vec![2, 2], vec![1, 2, 3, 4]).expect("a");
        let b = HostBuffer::from_vec(vec![2, 2], vec![10, 20, 30, 40]).expect("b");
        let out = execute(&backend, &artifact, &llvm(), &[a, b]).expect("execute");
        assert_eq!(out.as_slice::<i32>(), Some(&[11, 22, 33, 44][..]));
        assert_eq!(backend.launch_count(), 1);
    }

    #[test]
    fn full_and_full_like_fill_the_output() {
        let backend = HostBackend::new();

        let node = full(&[3, 4, 5], DType::F32, 3.14).expect("full");
        let artifact = build(&backend, &node, &target("llvm"), "full", false).expect("build");
        let out = execute(&backend, &artifact, &llvm(), &[]).expect("execute");
        assert_eq!(out.shape(), &[3, 4, 5]);
        assert!(out.typed::<f32>().expect("f32").iter().all(|v| *v == 3.14f32));

        let source = TensorDescriptor::new(vec![10], DType::I32, "A").expect("source");
        let node = full_like(&source, 7.0).expect("full_like");
        let artifact =
            build(&backend, &node, &target("llvm"), "full_like", false).expect("build");
        let zeros = HostBuffer::zeros(&[10], DType::I32);
        let out = execute(&backend, &artifact, &llvm(), &[zeros]).expect("execute");
        assert_eq!(out.as_slice::<i32>(), Some(&[7; 10][..]));
    }

    #[test]
    fn compare_runs_with_integer_output() {
        let backend = HostBackend::new();
        let inputs = placeholders(2, &[4], DType::F32);
        let node = compare(Relation::Greater, &inputs[0], &inputs[1], DType::I64).expect("node");
        let artifact = build(&backend, &node, &target("llvm"), "greater", false).expect("build");
        let lhs = HostBuffer::from_vec(vec![4], vec![1.0f32, 9.0, 3.0, 4.0]).expect("lhs");
        let rhs = HostBuffer::from_vec(vec![4], vec![2.0f32, 1.0, 3.0, 0.0]).expect("rhs");
        let out = execute(&backend, &artifact, &llvm(), &[lhs, rhs]).expect("execute");
        assert_eq!(out.as_slice::<i64>(), Some(&[0, 1, 0, 1][..]));
    }

    #[test]
    fn accelerator_targets_have_no_lowering_by_default() {
        let backend = HostBackend::with_devices(["llvm", "cuda"]);
        let node = full(&[2], DType::F32, 1.0).expect("node");
        let err = build(&backend, &node, &target("cuda"), "full", false)
            .expect_err("cuda must not lower on the host backend");
        assert!(matches!(err, BuildError::NoLowering { .. }));
        assert!(err.to_string().contains("cuda"));
    }

    #[test]
    fn emulation_runs_accelerator_targets_on_host_kernels() {
        let backend = HostBackend::with_devices(["cuda"]).with_accelerator_emulation(true);
        let node = full(&[2], DType::F64, 2.5).expect("node");
        let artifact = build(&backend, &node, &target("cuda"), "full", false).expect("build");
        let ctx = DeviceContext::primary(DeviceId::new("cuda"));
        let out = execute(&backend, &artifact, &ctx, &[]).expect("execute");
        assert_eq!(out.as_slice::<f64>(), Some(&[2.5, 2.5][..]));
    }

    #[test]
    fn compile_rejects_signature_drift() {
        use tc_runtime::Compiler;

        let backend = HostBackend::new();
        let inputs = placeholders(2, &[3], DType::F32);
        let node = elemwise_sum(&inputs, 2).expect("node");
        let schedule = backend
            .synthesize_schedule(&target("llvm"), std::slice::from_ref(&node), false)
            .expect("schedule");

        let mut io = node.io_descriptors();
        io[1] = TensorDescriptor::new(vec![3], DType::F64, "data1").expect("desc");
        let err = backend
            .compile(&schedule, &io, &DeviceId::new("llvm"), "elemwise_sum")
            .expect_err("drifted signature must fail");
        assert!(matches!(
            err,
            BuildError::SignatureMismatch { position: 1, .. }
        ));

        let err = backend
            .compile(&schedule, &io[..2], &DeviceId::new("llvm"), "elemwise_sum")
            .expect_err("missing output must fail");
        assert!(matches!(err, BuildError::ArityMismatch { .. }));

        let err = backend
            .synthesize_schedule(&target("llvm"), &[], false)
            .expect_err("empty schedule");
        assert_eq!(err, BuildError::EmptySchedule);
    }

    #[test]
    fn execute_on_detached_device_is_a_runtime_failure() {
        let backend = HostBackend::new().with_accelerator_emulation(true);
        let node = full(&[2], DType::F32, 1.0).expect("node");
        let artifact = build(&backend, &node, &target("metal"), "full", false).expect("build");
        let ctx = DeviceContext::primary(DeviceId::new("metal"));
        let err = execute(&backend, &artifact, &ctx, &[]).expect_err("metal is not attached");
        assert!(matches!(
            err,
            ExecuteError::Runtime(RuntimeExecutionError::Launch(_))
        ));
    }

    #[test]
    fn kernel_rejects_buffers_from_other_device() {
        let kernel = HostKernel::new(
            HostProgram::Fill { value: 1.0 },
            DeviceContext::primary(DeviceId::new("opencl")),
        );
        let mut args = [DeviceBuffer::new(llvm(), HostBuffer::zeros(&[2], DType::F32))];
        let err = kernel
            .launch(&mut args)
            .expect_err("cross-device launch must fail closed");
        assert!(matches!(err, RuntimeExecutionError::Device(_)));
    }

    #[test]
    fn kernel_output_dtype_mismatch_surfaces_as_launch_error() {
        let kernel = HostKernel::new(HostProgram::ElemwiseSum { operands: 1 }, llvm());
        let mut args = [
            DeviceBuffer::new(llvm(), HostBuffer::zeros(&[2], DType::F32)),
            DeviceBuffer::new(llvm(), HostBuffer::zeros(&[2], DType::I32)),
        ];
        let err = kernel.launch(&mut args).expect_err("dtype mismatch");
        assert!(matches!(err, RuntimeExecutionError::Launch(message) if message.contains("int32")));
    }

    proptest! {
        #[test]
        fn prop_sum_kernel_matches_scalar_fold(
            rows in prop::collection::vec(prop::collection::vec(-1_000i32..1_000, 6), 1..=6),
        ) {
            let operands: Vec<&[i32]> = rows.iter().map(Vec::as_slice).collect();
            let mut out = [0i32; 6];
            elemwise_sum_contiguous(&operands, &mut out).expect("sum");
            for (idx, value) in out.iter().enumerate() {
                let expected: i32 = rows.iter().map(|row| row[idx]).sum();
                prop_assert_eq!(*value, expected);
            }
        }

        #[test]
        fn prop_compare_is_binary_and_matches_relation(
            pairs in prop::collection::vec((-50i64..50, -50i64..50), 1..32),
            less in any::<bool>(),
        ) {
            let relation = if less { Relation::Less } else { Relation::Greater };
            let (lhs, rhs): (Vec<i64>, Vec<i64>) = pairs.into_iter().unzip();
            let mut out = vec![9.0f64; lhs.len()];
            compare_contiguous(relation, &lhs, &rhs, &mut out).expect("compare");
            for ((value, l), r) in out.iter().zip(&lhs).zip(&rhs) {
                let expected = if relation.holds(*l, *r) { 1.0 } else { 0.0 };
                prop_assert_eq!(*value, expected);
            }
        }
    }
}
